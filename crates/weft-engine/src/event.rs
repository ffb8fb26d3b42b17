//! One-shot events: cross-job wakeup with a waiter list.
//!
//! An [`Event`] goes from unsignaled to signaled exactly once; there is no
//! reset. A job that waits on an unsignaled event is parked — taken off
//! every ready queue and held on the event's waiter list — until a signal
//! re-enqueues it at its own priority. Waiting on an already-signaled event
//! returns immediately without suspending.

use crate::coroutine;
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::worker::current_job;
use crate::scheduler::Shared;
use log::{error, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for an Event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EventId(u64);

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

impl EventId {
    fn new() -> Self {
        EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

struct WaitList {
    signaled: bool,
    waiters: Vec<Arc<Job>>,
}

pub(crate) struct EventInner {
    id: EventId,
    shared: Arc<Shared>,
    state: Mutex<WaitList>,
}

impl EventInner {
    /// Finish parking `job` on this event. Called by the worker after the
    /// job's coroutine has suspended, so the job's stack is quiescent before
    /// it becomes reachable from other threads. Re-checks the signaled flag
    /// under the same lock `signal` drains under: a signal that landed while
    /// the coroutine was switching out re-enqueues the job instead of
    /// stranding it.
    pub(crate) fn park(&self, job: Arc<Job>) {
        let mut state = self.state.lock();
        if state.signaled {
            drop(state);
            trace!("event {}: signal raced the park, requeueing job {}", self.id.as_u64(), job.id().as_u64());
            job.set_state(JobState::Ready);
            self.shared.requeue(job);
        } else {
            job.set_state(JobState::Parked);
            state.waiters.push(job);
        }
    }
}

impl Drop for EventInner {
    fn drop(&mut self) {
        let waiters = self.state.get_mut().waiters.len();
        if waiters > 0 {
            warn!("event {} dropped with {} parked jobs; they will never resume", self.id.as_u64(), waiters);
        }
    }
}

/// A one-shot cross-job wakeup primitive.
///
/// Handles are cheap clones of shared state; the event is destroyed when the
/// last handle drops. Dropping it while jobs are still parked is a caller
/// error (the parked jobs can never resume) and is logged.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: EventId::new(),
                shared,
                state: Mutex::new(WaitList {
                    signaled: false,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// This event's unique ID.
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// True once [`Event::signal`] has been called.
    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Number of jobs currently parked on this event.
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Signal the event, re-enqueueing every parked waiter at its own
    /// priority exactly once. Signaling an already-signaled event is a
    /// no-op; there is no reset.
    pub fn signal(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.signaled {
                return;
            }
            state.signaled = true;
            std::mem::take(&mut state.waiters)
        };
        trace!("event {} signaled, waking {} jobs", self.inner.id.as_u64(), drained.len());
        for job in drained {
            job.set_state(JobState::Ready);
            self.inner.shared.requeue(job);
        }
    }

    /// Park the calling job until the event is signaled. Must be called from
    /// inside a running job; returns immediately, without suspending, when
    /// the event is already signaled.
    ///
    /// Calling this outside a running job is a caller error: debug builds
    /// assert, release builds log and return without touching scheduler
    /// state.
    pub fn wait(&self) {
        let Some(job) = current_job() else {
            debug_assert!(false, "Event::wait called outside of a running job");
            error!("Event::wait called outside of a running job; ignored");
            return;
        };
        if self.inner.state.lock().signaled {
            return;
        }
        trace!("job {} parking on event {}", job.id().as_u64(), self.inner.id.as_u64());
        job.request_park(self.inner.clone());
        coroutine::yield_now();
        // Only a signal wakes a parked job, and a registration that loses
        // the race requeues only when signaled — so the event is signaled
        // whenever control returns here.
        debug_assert!(self.is_signaled());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Shared;

    fn event() -> Event {
        Event::new(Shared::for_tests())
    }

    #[test]
    fn test_event_starts_unsignaled() {
        let event = event();
        assert!(!event.is_signaled());
        assert_eq!(event.waiter_count(), 0);
    }

    #[test]
    fn test_signal_is_idempotent() {
        let event = event();
        event.signal();
        assert!(event.is_signaled());
        event.signal();
        assert!(event.is_signaled());
        assert_eq!(event.waiter_count(), 0);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = event();
        let b = event();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clones_share_state() {
        let a = event();
        let b = a.clone();
        a.signal();
        assert!(b.is_signaled());
    }
}
