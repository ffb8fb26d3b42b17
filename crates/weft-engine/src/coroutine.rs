//! Stackful coroutines: cooperative execution units with their own stacks.
//!
//! A [`Coroutine`] wraps a callable and runs it on a dedicated stack obtained
//! from an injected [`StackAllocator`]. [`Coroutine::resume`] transfers
//! control into the coroutine; [`yield_now`] suspends the running coroutine
//! and returns control to its most recent resumer. A suspended coroutine is
//! plain memory: its next resume may legally happen on a different OS thread,
//! so nothing in this module caches thread identity across a yield.

use crate::context::{self, Context};
use crate::stack::StackAllocator;
use log::{error, warn};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{addr_of, addr_of_mut, NonNull};
use std::sync::Arc;

/// Stack size used when the caller does not ask for a specific one.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Smallest stack the engine will allocate; requests below are rounded up.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Errors from coroutine construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoroutineError {
    /// The injected allocator could not provide the stack.
    #[error("stack allocation of {size} bytes failed")]
    StackAllocationFailed {
        /// Requested stack size in bytes.
        size: usize,
    },
}

/// Lifecycle state of a coroutine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoroutineState {
    /// Built but never resumed.
    Created,
    /// Currently executing on some thread.
    Running,
    /// Suspended at a [`yield_now`]; resumable from any thread.
    Suspended,
    /// The callable returned (or panicked); never resumable again.
    Dead,
}

struct CoroutineInner {
    state: CoroutineState,
    /// Saved state of the coroutine itself while suspended.
    ctx: Context,
    /// Saved state of the most recent resumer.
    return_ctx: Context,
    entry: Option<Box<dyn FnOnce() + Send + 'static>>,
    stack: NonNull<u8>,
    stack_size: usize,
    allocator: Arc<dyn StackAllocator>,
}

// A coroutine is run by exactly one thread at a time; between resumes its
// saved context and stack are inert memory.
unsafe impl Send for CoroutineInner {}

thread_local! {
    /// Resume nesting on this thread, innermost last. `yield_now` and the
    /// entry trampoline find "their" coroutine here; the slot is pushed
    /// immediately before each switch-in and popped right after control
    /// comes back.
    static ACTIVE: RefCell<Vec<NonNull<CoroutineInner>>> = const { RefCell::new(Vec::new()) };
}

/// A cooperative execution unit with its own stack.
///
/// The inner state is boxed so its address stays stable once the first
/// resume has woven it into a saved context.
pub struct Coroutine {
    inner: Box<CoroutineInner>,
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.inner.state)
            .field("stack_size", &self.inner.stack_size)
            .finish_non_exhaustive()
    }
}

impl Coroutine {
    /// Create a coroutine that will run `entry` on a fresh `stack_size`-byte
    /// stack from `allocator`. Arguments travel inside the closure's
    /// captures. Sizes below [`MIN_STACK_SIZE`] are rounded up.
    pub fn new<F>(
        entry: F,
        stack_size: usize,
        allocator: Arc<dyn StackAllocator>,
    ) -> Result<Self, CoroutineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = stack_size.max(MIN_STACK_SIZE);
        let stack = allocator
            .allocate(stack_size)
            .ok_or(CoroutineError::StackAllocationFailed { size: stack_size })?;
        let ctx = unsafe { context::prepare(stack.as_ptr(), stack_size, trampoline) };
        Ok(Self {
            inner: Box::new(CoroutineInner {
                state: CoroutineState::Created,
                ctx,
                return_ctx: Context::null(),
                entry: Some(Box::new(entry)),
                stack,
                stack_size,
                allocator,
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CoroutineState {
        self.inner.state
    }

    /// False once the callable has returned.
    pub fn is_alive(&self) -> bool {
        self.inner.state != CoroutineState::Dead
    }

    /// Stack size in bytes.
    pub fn stack_size(&self) -> usize {
        self.inner.stack_size
    }

    /// Transfer control into the coroutine. Returns when it yields or dies,
    /// reporting the state it left in.
    ///
    /// Resuming a `Running` or `Dead` coroutine is a caller error: debug
    /// builds assert, release builds log and leave all state untouched.
    pub fn resume(&mut self) -> CoroutineState {
        let inner: *mut CoroutineInner = &mut *self.inner;
        unsafe {
            match (*inner).state {
                CoroutineState::Created | CoroutineState::Suspended => {}
                CoroutineState::Running => {
                    debug_assert!(false, "resume of a coroutine that is already running");
                    error!("resume of a running coroutine ignored");
                    return CoroutineState::Running;
                }
                CoroutineState::Dead => {
                    debug_assert!(false, "resume of a dead coroutine");
                    error!("resume of a dead coroutine ignored");
                    return CoroutineState::Dead;
                }
            }
            (*inner).state = CoroutineState::Running;
            ACTIVE.with(|stack| stack.borrow_mut().push(NonNull::new_unchecked(inner)));
            context::switch(addr_of_mut!((*inner).return_ctx), addr_of!((*inner).ctx));
            ACTIVE.with(|stack| {
                stack.borrow_mut().pop();
            });
            (*inner).state
        }
    }
}

impl Drop for CoroutineInner {
    fn drop(&mut self) {
        match self.state {
            CoroutineState::Running => {
                debug_assert!(false, "dropping a running coroutine");
            }
            CoroutineState::Suspended => {
                warn!("dropping a suspended coroutine; its locals are released without running destructors");
            }
            CoroutineState::Created | CoroutineState::Dead => {}
        }
        unsafe { self.allocator.deallocate(self.stack, self.stack_size) };
    }
}

/// Suspend the running coroutine and return control to its most recent
/// resumer. Returns when the coroutine is next resumed — possibly on a
/// different thread.
///
/// Calling this outside a running coroutine is a caller error: debug builds
/// assert, release builds log and return immediately.
pub fn yield_now() {
    let Some(active) = ACTIVE.with(|stack| stack.borrow().last().copied()) else {
        debug_assert!(false, "yield_now called outside of a running coroutine");
        error!("yield_now called outside of a running coroutine; ignored");
        return;
    };
    let inner = active.as_ptr();
    unsafe {
        (*inner).state = CoroutineState::Suspended;
        context::switch(addr_of_mut!((*inner).ctx), addr_of!((*inner).return_ctx));
    }
}

/// First code executed on a fresh coroutine stack. Runs the callable,
/// contains any unwind (panics must never cross a context switch), then
/// marks the coroutine dead and switches back to the last resumer.
extern "C" fn trampoline() -> ! {
    let active = ACTIVE.with(|stack| {
        stack
            .borrow()
            .last()
            .copied()
            .expect("coroutine trampoline entered outside of a resume")
    });
    let inner = active.as_ptr();
    unsafe {
        if let Some(entry) = (*inner).entry.take() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(entry)) {
                error!("coroutine panicked: {}", panic_message(payload.as_ref()));
            }
        }
        (*inner).state = CoroutineState::Dead;
        context::switch(addr_of_mut!((*inner).ctx), addr_of!((*inner).return_ctx));
    }
    unreachable!("dead coroutine resumed");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::HeapStackAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn heap() -> Arc<dyn StackAllocator> {
        Arc::new(HeapStackAllocator)
    }

    #[test]
    fn test_run_to_completion() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let mut co = Coroutine::new(
            move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            },
            DEFAULT_STACK_SIZE,
            heap(),
        )
        .unwrap();

        assert_eq!(co.state(), CoroutineState::Created);
        assert!(co.is_alive());

        let state = co.resume();
        assert_eq!(state, CoroutineState::Dead);
        assert!(!co.is_alive());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_yield_and_resume() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = ticks.clone();
        let mut co = Coroutine::new(
            move || {
                for _ in 0..3 {
                    ticks2.fetch_add(1, Ordering::SeqCst);
                    yield_now();
                }
            },
            DEFAULT_STACK_SIZE,
            heap(),
        )
        .unwrap();

        assert_eq!(co.resume(), CoroutineState::Suspended);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(co.resume(), CoroutineState::Suspended);
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(co.resume(), CoroutineState::Suspended);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        // The final resume runs past the loop and the callable returns.
        assert_eq!(co.resume(), CoroutineState::Dead);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_captured_arguments() {
        let result = Arc::new(AtomicUsize::new(0));
        let result2 = result.clone();
        let input = 21usize;
        let mut co = Coroutine::new(
            move || {
                result2.store(input * 2, Ordering::SeqCst);
            },
            DEFAULT_STACK_SIZE,
            heap(),
        )
        .unwrap();

        co.resume();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_allocation_failure_is_an_error() {
        struct FailingAllocator;
        impl StackAllocator for FailingAllocator {
            fn allocate(&self, _size: usize) -> Option<std::ptr::NonNull<u8>> {
                None
            }
            unsafe fn deallocate(&self, _ptr: std::ptr::NonNull<u8>, _size: usize) {
                unreachable!("nothing was allocated");
            }
        }

        let err = Coroutine::new(|| {}, 64 * 1024, Arc::new(FailingAllocator)).unwrap_err();
        assert_eq!(err, CoroutineError::StackAllocationFailed { size: 64 * 1024 });
    }

    #[test]
    fn test_minimum_stack_size_is_enforced() {
        let co = Coroutine::new(|| {}, 1, heap()).unwrap();
        assert_eq!(co.stack_size(), MIN_STACK_SIZE);
    }

    #[test]
    fn test_nested_resume() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let order2 = order.clone();
        let mut outer = Coroutine::new(
            move || {
                order2.lock().push("outer start");
                let order3 = order2.clone();
                let mut other = Coroutine::new(
                    move || {
                        order3.lock().push("inner");
                    },
                    DEFAULT_STACK_SIZE,
                    Arc::new(HeapStackAllocator),
                )
                .unwrap();
                other.resume();
                order2.lock().push("outer end");
            },
            DEFAULT_STACK_SIZE,
            heap(),
        )
        .unwrap();

        outer.resume();
        assert_eq!(*order.lock(), vec!["outer start", "inner", "outer end"]);
    }

    #[test]
    fn test_panicking_callable_dies_cleanly() {
        let mut co = Coroutine::new(
            || panic!("job exploded"),
            DEFAULT_STACK_SIZE,
            heap(),
        )
        .unwrap();

        assert_eq!(co.resume(), CoroutineState::Dead);
        assert!(!co.is_alive());
    }

    #[test]
    fn test_drop_without_resume_frees_stack() {
        let co = Coroutine::new(|| {}, DEFAULT_STACK_SIZE, heap()).unwrap();
        drop(co);
    }
}
