//! Strict-priority scheduling made visible: a burst of Critical jobs runs to
//! queue exhaustion while Low background ticks stand still, then the Low
//! tier resumes. Starvation of lower tiers is specified behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_engine::{yield_now, Priority, Scheduler};

const LOW_JOBS: usize = 3;
const LOW_TICKS: usize = 5;

fn main() {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .expect("logger spec")
        .start()
        .expect("logger start");

    let scheduler = Scheduler::with_default_allocator(1).expect("scheduler construction");
    let finished = Arc::new(AtomicUsize::new(0));

    for idx in 0..LOW_JOBS {
        let job_finished = finished.clone();
        scheduler
            .schedule(Priority::Low, move || {
                for tick in 0..LOW_TICKS {
                    println!("background job {idx}: tick {tick}");
                    if idx == 0 && tick == 1 {
                        let current = Scheduler::current().expect("inside a worker");
                        for burst in 0..4 {
                            current
                                .schedule(Priority::Critical, move || {
                                    println!("  critical burst {burst}: start");
                                    yield_now();
                                    println!("  critical burst {burst}: end");
                                })
                                .expect("schedule critical job");
                        }
                        println!("background job 0: scheduled 4 critical jobs");
                    }
                    yield_now();
                }
                job_finished.fetch_add(1, Ordering::SeqCst);
            })
            .expect("schedule background job");
    }

    let watcher_finished = finished.clone();
    scheduler
        .schedule(Priority::Low, move || {
            while watcher_finished.load(Ordering::SeqCst) < LOW_JOBS {
                yield_now();
            }
            Scheduler::current().expect("inside a worker").shutdown();
        })
        .expect("schedule watcher");

    scheduler.run();
    log::info!("scheduler drained");
    println!("all background jobs finished");
}
