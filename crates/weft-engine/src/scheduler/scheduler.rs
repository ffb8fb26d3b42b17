//! The scheduler: worker pool, ready queues, and job lifecycle.

use crate::coroutine::{Coroutine, CoroutineError, DEFAULT_STACK_SIZE};
use crate::event::Event;
use crate::scheduler::job::{Job, JobId, JobState, Priority};
use crate::scheduler::queue::ReadyQueues;
use crate::scheduler::worker::{self, current_worker_id};
use crate::stack::{HeapStackAllocator, StackAllocator};
use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Errors from scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The injected allocator could not provide a coroutine stack.
    #[error("stack allocation of {size} bytes failed")]
    StackAllocationFailed {
        /// Requested stack size in bytes.
        size: usize,
    },

    /// Shutdown has begun; no further jobs are accepted.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// A worker thread could not be spawned; construction is aborted.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// State shared between all scheduler handles and workers.
pub(crate) struct Shared {
    pub(crate) queues: ReadyQueues,
    pub(crate) registry: DashMap<JobId, Arc<Job>>,
    pub(crate) shutdown: AtomicBool,
    allocator: Arc<dyn StackAllocator>,
    stack_size: usize,
    worker_count: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    /// Put a woken job back on the ready queue for its own priority.
    pub(crate) fn requeue(&self, job: Arc<Job>) {
        self.queues.push(job);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        Arc::new(Self {
            queues: ReadyQueues::new(),
            registry: DashMap::new(),
            shutdown: AtomicBool::new(false),
            allocator: Arc::new(HeapStackAllocator),
            stack_size: DEFAULT_STACK_SIZE,
            worker_count: 1,
            handles: Mutex::new(Vec::new()),
        })
    }
}

/// A cooperative, multi-threaded job scheduler over stackful coroutines.
///
/// `Scheduler` is a cheap-clone handle; clones share one worker pool and one
/// set of ready queues. Construction spawns `worker_count - 1` background
/// workers; [`Scheduler::run`] contributes the calling thread as the last
/// one. The scheduler stops only on an explicit [`Scheduler::shutdown`] —
/// empty queues never imply shutdown, since any running job may schedule
/// more work.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler whose coroutine stacks come from `allocator`.
    /// A `worker_count` of 0 defaults to the number of CPU cores.
    ///
    /// If a worker thread cannot be spawned, the already-spawned workers are
    /// shut down and joined, and the error is returned.
    pub fn new(
        allocator: Arc<dyn StackAllocator>,
        worker_count: usize,
    ) -> Result<Self, SchedulerError> {
        Self::with_stack_size(allocator, worker_count, DEFAULT_STACK_SIZE)
    }

    /// Like [`Scheduler::new`] with a custom per-job stack size.
    pub fn with_stack_size(
        allocator: Arc<dyn StackAllocator>,
        worker_count: usize,
        stack_size: usize,
    ) -> Result<Self, SchedulerError> {
        let worker_count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        let shared = Arc::new(Shared {
            queues: ReadyQueues::new(),
            registry: DashMap::new(),
            shutdown: AtomicBool::new(false),
            allocator,
            stack_size,
            worker_count,
            handles: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(worker_count.saturating_sub(1));
        for id in 1..worker_count {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("weft-worker-{id}"))
                .spawn(move || worker::run_loop(id, worker_shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    shared.shutdown.store(true, Ordering::Release);
                    shared.queues.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::WorkerSpawn(err));
                }
            }
        }
        *shared.handles.lock() = handles;

        debug!("scheduler created with {worker_count} workers");
        Ok(Self { shared })
    }

    /// Create a scheduler backed by [`HeapStackAllocator`].
    pub fn with_default_allocator(worker_count: usize) -> Result<Self, SchedulerError> {
        Self::new(Arc::new(HeapStackAllocator), worker_count)
    }

    /// The scheduler the calling thread is currently working for. Valid only
    /// inside a worker's call stack (including inside a running job).
    pub fn current() -> Option<Scheduler> {
        worker::current_shared().map(|shared| Scheduler { shared })
    }

    /// Wrap `callable` in a coroutine and enqueue it at `priority`.
    ///
    /// Thread-safe: callable from any worker (a job scheduling another job)
    /// or from outside the pool. Fails cleanly once shutdown has begun or
    /// when the stack allocation fails; neither is retried.
    pub fn schedule<F>(&self, priority: Priority, callable: F) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }
        let coroutine = Coroutine::new(callable, self.shared.stack_size, self.shared.allocator.clone())
            .map_err(|err| match err {
                CoroutineError::StackAllocationFailed { size } => {
                    SchedulerError::StackAllocationFailed { size }
                }
            })?;
        let job = Job::new(priority, coroutine);
        let id = job.id();
        self.shared.registry.insert(id, job.clone());

        // A shutdown may have begun since the check above; do not hand the
        // job to workers that are already draining out.
        if self.shared.shutdown.load(Ordering::Acquire) {
            self.shared.registry.remove(&id);
            return Err(SchedulerError::ShuttingDown);
        }
        trace!("scheduled job {} at {:?}", id.as_u64(), priority);
        self.shared.queues.push(job);
        Ok(id)
    }

    /// Serve as a worker on the calling thread until shutdown, then join the
    /// background workers. Returns only after an explicit shutdown request
    /// and full worker drain.
    pub fn run(&self) {
        worker::run_loop(0, self.shared.clone());
        self.join_workers();
        self.release_leftovers();
    }

    /// Request shutdown: no further jobs are accepted, workers stop at their
    /// next loop iteration, and parked workers are woken.
    ///
    /// Jobs still ready or parked on events are released without being
    /// resumed (their stacks are freed; locals' destructors do not run) and
    /// the count is logged. Idempotent; callable from inside a job or from
    /// any other thread. When called from outside the pool it also joins the
    /// background workers.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("scheduler shutdown requested");
        self.shared.queues.notify_all();
        if current_worker_id().is_none() {
            self.join_workers();
            self.release_leftovers();
        }
    }

    /// True once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Create an event whose signal re-enqueues waiters on this scheduler.
    pub fn create_event(&self) -> Event {
        Event::new(self.shared.clone())
    }

    /// State of a job, or `None` once it has completed and been reclaimed
    /// (or never existed).
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.shared.registry.get(&id).map(|job| job.state())
    }

    /// Number of jobs not yet completed.
    pub fn active_jobs(&self) -> usize {
        self.shared.registry.len()
    }

    /// Number of workers, counting the `run` caller.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.shared.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn release_leftovers(&self) {
        let leftover = self.shared.registry.len();
        if leftover > 0 {
            warn!("shutdown released {leftover} jobs that never completed");
            self.shared.registry.clear();
        }
    }
}
