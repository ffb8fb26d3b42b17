//! Jobs: priority-tagged units of scheduled work.

use crate::coroutine::{Coroutine, CoroutineState};
use crate::event::EventInner;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Scheduling priority. The order is total; `Critical` outranks everything
/// and a tier runs to exhaustion before any lower tier is considered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Background work.
    Low,
    /// The default tier.
    Normal,
    /// Ahead of normal work.
    High,
    /// Runs before all other tiers, to queue exhaustion.
    Critical,
}

impl Priority {
    /// Number of priority tiers.
    pub const COUNT: usize = 4;

    /// All tiers, lowest first.
    pub const ALL: [Priority; Priority::COUNT] =
        [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Unique identifier for a Job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    /// Generate a new unique JobId.
    pub(crate) fn new() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// State of a Job. A job is always in exactly one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Queued at its priority, waiting for a worker.
    Ready,
    /// Held by one worker, its coroutine executing.
    Running,
    /// Registered on exactly one event's waiter list.
    Parked,
    /// The callable returned; the coroutine and its stack are released.
    Completed,
}

/// A callable plus priority plus owning coroutine — the scheduler's unit of
/// work.
pub(crate) struct Job {
    id: JobId,
    priority: Priority,
    state: Mutex<JobState>,
    /// Released (stack freed) when the coroutine dies.
    coroutine: Mutex<Option<Coroutine>>,
    /// Park request posted by `Event::wait` from inside the coroutine; the
    /// worker consumes it after the coroutine has actually suspended.
    park_request: Mutex<Option<Arc<EventInner>>>,
    completed: AtomicBool,
}

impl Job {
    pub(crate) fn new(priority: Priority, coroutine: Coroutine) -> Arc<Self> {
        Arc::new(Self {
            id: JobId::new(),
            priority,
            state: Mutex::new(JobState::Ready),
            coroutine: Mutex::new(Some(coroutine)),
            park_request: Mutex::new(None),
            completed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
    }

    /// Resume the owned coroutine; reports the state it suspended in.
    pub(crate) fn resume_coroutine(&self) -> CoroutineState {
        let mut guard = self.coroutine.lock();
        match guard.as_mut() {
            Some(coroutine) => coroutine.resume(),
            None => CoroutineState::Dead,
        }
    }

    /// Mark the job completed and release its coroutine.
    pub(crate) fn complete(&self) {
        self.coroutine.lock().take();
        self.completed.store(true, Ordering::Release);
        self.set_state(JobState::Completed);
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn request_park(&self, event: Arc<EventInner>) {
        *self.park_request.lock() = Some(event);
    }

    pub(crate) fn take_park_request(&self) -> Option<Arc<EventInner>> {
        self.park_request.lock().take()
    }
}
