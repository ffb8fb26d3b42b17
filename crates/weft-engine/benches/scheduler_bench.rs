//! Scheduler throughput benchmarks: bulk job drain and yield churn.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_engine::{yield_now, HeapStackAllocator, PooledStackAllocator, Priority, Scheduler};

fn drain_jobs(scheduler: &Scheduler, jobs: usize) {
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..jobs {
        let job_counter = counter.clone();
        scheduler
            .schedule(Priority::Normal, move || {
                job_counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
    }

    let watcher_counter = counter.clone();
    scheduler
        .schedule(Priority::Low, move || {
            while watcher_counter.load(Ordering::Relaxed) < jobs {
                yield_now();
            }
            Scheduler::current().unwrap().shutdown();
        })
        .unwrap();

    scheduler.run();
}

fn bench_schedule_drain(c: &mut Criterion) {
    c.bench_function("schedule_drain_1000_jobs", |b| {
        b.iter(|| {
            let scheduler = Scheduler::with_default_allocator(2).unwrap();
            drain_jobs(&scheduler, 1000);
        });
    });

    c.bench_function("schedule_drain_1000_jobs_pooled_stacks", |b| {
        b.iter(|| {
            let allocator = Arc::new(PooledStackAllocator::new(
                Arc::new(HeapStackAllocator),
                weft_engine::DEFAULT_STACK_SIZE,
                64,
            ));
            let scheduler = Scheduler::new(allocator, 2).unwrap();
            drain_jobs(&scheduler, 1000);
        });
    });
}

fn bench_yield_churn(c: &mut Criterion) {
    c.bench_function("yield_churn_8_jobs_x_1000", |b| {
        b.iter(|| {
            let scheduler = Scheduler::with_default_allocator(1).unwrap();
            let finished = Arc::new(AtomicUsize::new(0));
            for _ in 0..8 {
                let job_finished = finished.clone();
                scheduler
                    .schedule(Priority::Normal, move || {
                        for _ in 0..1000 {
                            yield_now();
                        }
                        job_finished.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
            }
            let watcher_finished = finished.clone();
            scheduler
                .schedule(Priority::Low, move || {
                    while watcher_finished.load(Ordering::Relaxed) < 8 {
                        yield_now();
                    }
                    Scheduler::current().unwrap().shutdown();
                })
                .unwrap();
            scheduler.run();
        });
    });
}

criterion_group!(benches, bench_schedule_drain, bench_yield_churn);
criterion_main!(benches);
