//! Weft Fiber Engine
//!
//! A cooperative, multi-threaded job scheduler built on stackful coroutines:
//! - **Coroutines**: execution contexts with their own stacks that suspend
//!   and resume without blocking an OS thread (`coroutine` module)
//! - **Jobs**: priority-tagged callables moved between ready queues by a
//!   fixed pool of worker threads (`scheduler` module)
//! - **Events**: one-shot wakeups that park a job until another signals it
//!   (`event` module)
//! - **Stacks**: the injected allocator collaborator that provides all
//!   coroutine stack memory (`stack` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_engine::{Priority, Scheduler};
//!
//! let scheduler = Scheduler::with_default_allocator(4)?;
//! let done = scheduler.create_event();
//!
//! let signal = done.clone();
//! scheduler.schedule(Priority::Normal, move || {
//!     // ... do some work, yielding as needed ...
//!     weft_engine::yield_now();
//!     signal.signal();
//! })?;
//!
//! scheduler.schedule(Priority::Low, move || {
//!     done.wait();
//!     weft_engine::Scheduler::current().unwrap().shutdown();
//! })?;
//!
//! scheduler.run();
//! ```
//!
//! Scheduling is cooperative: a job that never yields occupies its worker
//! until it completes, and Critical jobs run to queue exhaustion before any
//! lower tier — both are contracts, not bugs.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod context;

/// Stackful coroutines: create/resume/yield over machine contexts.
pub mod coroutine;

/// One-shot events with waiter lists.
pub mod event;

/// The scheduler: worker pool, priority queues, and jobs.
pub mod scheduler;

/// Coroutine stack memory and the injected allocator abstraction.
pub mod stack;

pub use coroutine::{
    yield_now, Coroutine, CoroutineError, CoroutineState, DEFAULT_STACK_SIZE, MIN_STACK_SIZE,
};
pub use event::{Event, EventId};
pub use scheduler::{
    current_job_id, current_worker_id, JobId, JobState, Priority, Scheduler, SchedulerError,
};
pub use stack::{HeapStackAllocator, PooledStackAllocator, StackAllocator};
