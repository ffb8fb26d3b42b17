//! Dependency chain between two jobs: B prepares a request, hands off to a
//! Critical download job A, parks on an event until A signals, then resumes
//! with the downloaded data.
//!
//! With one worker the interleaving is fully deterministic: all of B's
//! "Preparing" lines, then all of A's "Progress" lines (Critical outranks
//! Normal from the moment A is scheduled), then B's post-wait processing.

use weft_engine::{yield_now, Priority, Scheduler};

fn main() {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .expect("logger spec")
        .start()
        .expect("logger start");

    let scheduler = Scheduler::with_default_allocator(1).expect("scheduler construction");
    let downloaded = scheduler.create_event();

    let b_event = downloaded.clone();
    scheduler
        .schedule(Priority::Normal, move || {
            for i in 1..=100 {
                println!("Preparing request: {i}%");
                yield_now();
            }

            let current = Scheduler::current().expect("inside a worker");
            let a_event = b_event.clone();
            current
                .schedule(Priority::Critical, move || {
                    for i in 1..=100 {
                        println!("Progress: {i}%");
                        yield_now();
                    }
                    a_event.signal();
                })
                .expect("schedule download job");

            b_event.wait();
            println!("Processing downloaded data");
            current.shutdown();
        })
        .expect("schedule request job");

    scheduler.run();
    log::info!("scheduler drained");
}
