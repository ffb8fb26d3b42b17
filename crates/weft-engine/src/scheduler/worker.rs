//! Worker threads: the resume/yield/requeue loop.
//!
//! A worker repeatedly pops the highest-priority ready job, publishes it as
//! the thread's current job, and resumes its coroutine. When control comes
//! back, the job is either dead (completed), holds a pending park request
//! (ownership passes to the event's waiter list), or plainly yielded
//! (requeued at the tail of its own tier).
//!
//! The thread-locals here are scheduler-owned, worker-scoped state: set
//! immediately before a resume, cleared immediately after. They are what
//! lets `yield_now` and `Event::wait` find their own job without an explicit
//! parameter, and they are never cached by a coroutine across a yield.

use crate::coroutine::CoroutineState;
use crate::scheduler::job::{Job, JobId, JobState};
use crate::scheduler::Shared;
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

thread_local! {
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
    static CURRENT_SHARED: RefCell<Option<Weak<Shared>>> = const { RefCell::new(None) };
    static CURRENT_JOB: RefCell<Option<Arc<Job>>> = const { RefCell::new(None) };
}

/// ID of the worker the calling thread is serving as, if any. Worker 0 is
/// the thread that called `Scheduler::run`.
pub fn current_worker_id() -> Option<usize> {
    CURRENT_WORKER.with(|current| current.get())
}

/// ID of the job the calling thread is currently resuming, if any.
pub fn current_job_id() -> Option<JobId> {
    CURRENT_JOB.with(|current| current.borrow().as_ref().map(|job| job.id()))
}

pub(crate) fn current_job() -> Option<Arc<Job>> {
    CURRENT_JOB.with(|current| current.borrow().clone())
}

pub(crate) fn current_shared() -> Option<Arc<Shared>> {
    CURRENT_SHARED.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
}

/// Serve as worker `worker_id` until shutdown is observed.
pub(crate) fn run_loop(worker_id: usize, shared: Arc<Shared>) {
    CURRENT_WORKER.with(|current| current.set(Some(worker_id)));
    CURRENT_SHARED.with(|current| *current.borrow_mut() = Some(Arc::downgrade(&shared)));
    debug!("worker {worker_id} started");

    while let Some(job) = shared.queues.pop_or_park(&shared.shutdown) {
        execute(worker_id, &shared, job);
    }

    debug!("worker {worker_id} stopped");
    CURRENT_SHARED.with(|current| current.borrow_mut().take());
    CURRENT_WORKER.with(|current| current.set(None));
}

fn execute(worker_id: usize, shared: &Shared, job: Arc<Job>) {
    trace!("worker {} resuming job {}", worker_id, job.id().as_u64());
    job.set_state(JobState::Running);
    CURRENT_JOB.with(|current| *current.borrow_mut() = Some(job.clone()));

    let state = job.resume_coroutine();

    CURRENT_JOB.with(|current| current.borrow_mut().take());
    match state {
        CoroutineState::Dead => {
            job.complete();
            shared.registry.remove(&job.id());
            trace!("worker {} completed job {}", worker_id, job.id().as_u64());
        }
        _ => {
            if let Some(event) = job.take_park_request() {
                event.park(job);
            } else {
                job.set_state(JobState::Ready);
                shared.queues.push(job);
            }
        }
    }
}
