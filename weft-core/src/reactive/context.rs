//! The active-subscriber stack.
//!
//! While a watcher evaluates its getter, property reads must register
//! dependency edges against it. The watcher is pushed onto a thread-local
//! stack for the duration of the evaluation; nested evaluation (a parent
//! component's render triggering a child's render) pushes on top, and the
//! outer watcher resumes when the inner one finishes.
//!
//! The pop is tied to a guard's `Drop` so the stack is restored on every
//! exit path, including panics. A stack left corrupted would poison all
//! subsequent dependency tracking for the rest of the process, so nothing
//! here pops manually.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use super::dep::DepTarget;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Weak<dyn DepTarget>>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard for one tracking window.
///
/// Pushes the target on creation, pops it on drop.
#[must_use = "dropping the guard ends the tracking scope"]
pub struct TrackGuard {
    _private: (),
}

impl TrackGuard {
    /// Enter a tracking scope for `target`.
    pub fn push(target: Weak<dyn DepTarget>) -> Self {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { _private: () }
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The watcher currently collecting dependencies, if any.
pub fn current_target() -> Option<Arc<dyn DepTarget>> {
    TARGET_STACK.with(|stack| stack.borrow().last().and_then(|weak| weak.upgrade()))
}

/// Whether any watcher is currently collecting dependencies.
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| !stack.borrow().is_empty())
}
