//! Per-priority ready queues with strict-priority pop and idle parking.

use crate::scheduler::job::{Job, Priority};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One FIFO MPMC queue per priority tier plus a condvar for idle workers.
///
/// Pops scan Critical down to Low and take one job from the first non-empty
/// tier. A tier therefore runs to exhaustion before any lower tier makes
/// progress; this starvation is specified scheduler behavior.
pub(crate) struct ReadyQueues {
    queues: [Injector<Arc<Job>>; Priority::COUNT],
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
}

impl ReadyQueues {
    pub(crate) fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| Injector::new()),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
        }
    }

    /// Enqueue at the tail of the job's own priority tier and wake one idle
    /// worker. Taking the idle lock around the notify closes the window
    /// between a worker's failed pop and its wait.
    pub(crate) fn push(&self, job: Arc<Job>) {
        self.queues[job.priority().index()].push(job);
        let _guard = self.idle_lock.lock();
        self.idle_cv.notify_one();
    }

    /// Wake every parked worker (used for shutdown).
    pub(crate) fn notify_all(&self) {
        let _guard = self.idle_lock.lock();
        self.idle_cv.notify_all();
    }

    /// Pop one job from the highest non-empty tier.
    pub(crate) fn try_pop(&self) -> Option<Arc<Job>> {
        for queue in self.queues.iter().rev() {
            loop {
                match queue.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Pop a job, parking on the condvar while all tiers are empty. Returns
    /// `None` once `shutdown` is observed; emptiness alone never ends the
    /// wait, since any running job may schedule more work.
    pub(crate) fn pop_or_park(&self, shutdown: &AtomicBool) -> Option<Arc<Job>> {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            let mut guard = self.idle_lock.lock();
            // Re-check with the lock held; a push that raced the pop above
            // must take this lock before it can notify.
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            self.idle_cv.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{Coroutine, DEFAULT_STACK_SIZE};
    use crate::stack::HeapStackAllocator;
    use std::time::Duration;

    fn queued_job(priority: Priority) -> Arc<Job> {
        let coroutine =
            Coroutine::new(|| {}, DEFAULT_STACK_SIZE, Arc::new(HeapStackAllocator)).unwrap();
        Job::new(priority, coroutine)
    }

    #[test]
    fn test_fifo_within_a_tier() {
        let queues = ReadyQueues::new();
        let a = queued_job(Priority::Normal);
        let b = queued_job(Priority::Normal);
        let (a_id, b_id) = (a.id(), b.id());

        queues.push(a);
        queues.push(b);

        assert_eq!(queues.try_pop().unwrap().id(), a_id);
        assert_eq!(queues.try_pop().unwrap().id(), b_id);
        assert!(queues.try_pop().is_none());
    }

    #[test]
    fn test_strict_priority_order() {
        let queues = ReadyQueues::new();
        let low = queued_job(Priority::Low);
        let critical = queued_job(Priority::Critical);
        let normal = queued_job(Priority::Normal);
        let high = queued_job(Priority::High);

        queues.push(low.clone());
        queues.push(critical.clone());
        queues.push(normal.clone());
        queues.push(high.clone());

        assert_eq!(queues.try_pop().unwrap().id(), critical.id());
        assert_eq!(queues.try_pop().unwrap().id(), high.id());
        assert_eq!(queues.try_pop().unwrap().id(), normal.id());
        assert_eq!(queues.try_pop().unwrap().id(), low.id());
        assert!(queues.try_pop().is_none());
    }

    #[test]
    fn test_shutdown_ends_the_park() {
        let queues = Arc::new(ReadyQueues::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let queues = queues.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || queues.pop_or_park(&shutdown))
        };

        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::Release);
        queues.notify_all();

        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_push_wakes_a_parked_worker() {
        let queues = Arc::new(ReadyQueues::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let queues = queues.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || queues.pop_or_park(&shutdown))
        };

        std::thread::sleep(Duration::from_millis(50));
        let job = queued_job(Priority::Low);
        let id = job.id();
        queues.push(job);

        assert_eq!(handle.join().unwrap().unwrap().id(), id);
    }
}
