//! Deferred-callback queue (the tick boundary).
//!
//! [`next_tick`] registers a callback to run after the current synchronous
//! work completes. Callbacks registered within one task coalesce into a
//! single pending tick and run strictly in registration order.
//!
//! The primitive that actually defers execution is an external
//! collaborator: the embedding host installs a hook with [`set_tick_hook`]
//! which is invoked once whenever the queue transitions from empty to
//! pending. The host then calls [`flush_tick`] at its tick boundary (a
//! microtask, an event-loop turn, a frame callback). Hosts without a
//! deferral primitive, and tests, simply call [`flush_tick`] directly after
//! their synchronous mutations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

type Callback = Box<dyn FnOnce() + Send>;
type TickHook = dyn Fn() + Send + Sync;

static CALLBACKS: OnceLock<Mutex<Vec<Callback>>> = OnceLock::new();
static PENDING: AtomicBool = AtomicBool::new(false);
static TICK_HOOK: OnceLock<RwLock<Option<Arc<TickHook>>>> = OnceLock::new();

fn callbacks() -> &'static Mutex<Vec<Callback>> {
    CALLBACKS.get_or_init(|| Mutex::new(Vec::new()))
}

fn tick_hook() -> &'static RwLock<Option<Arc<TickHook>>> {
    TICK_HOOK.get_or_init(|| RwLock::new(None))
}

/// Register a callback for the next tick.
pub fn next_tick<F>(cb: F)
where
    F: FnOnce() + Send + 'static,
{
    callbacks().lock().push(Box::new(cb));
    if !PENDING.swap(true, Ordering::SeqCst) {
        let hook = tick_hook().read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Install the host's deferral primitive.
///
/// Called once per empty-to-pending transition of the queue; the host is
/// expected to arrange a later call to [`flush_tick`].
pub fn set_tick_hook<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    *tick_hook().write() = Some(Arc::new(hook));
}

/// Whether a tick is currently pending.
pub fn has_pending() -> bool {
    PENDING.load(Ordering::SeqCst)
}

/// Run all callbacks registered up to this point, in registration order.
///
/// Callbacks registered while the queue is draining land in the next tick,
/// not this one.
pub fn flush_tick() {
    PENDING.store(false, Ordering::SeqCst);
    let pending: Vec<Callback> = {
        let mut guard = callbacks().lock();
        std::mem::take(&mut *guard)
    };
    for cb in pending {
        cb();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::test_util::serial as lock;

    #[test]
    fn callbacks_run_in_registration_order() {
        let _g = lock();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            next_tick(move || order.lock().push(i));
        }
        flush_tick();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn registrations_coalesce_into_one_pending_tick() {
        let _g = lock();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        set_tick_hook(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        flush_tick(); // reset any pending state from other tests
        let before = fired.load(Ordering::SeqCst);
        next_tick(|| {});
        next_tick(|| {});
        next_tick(|| {});
        assert_eq!(fired.load(Ordering::SeqCst), before + 1);
        flush_tick();
    }

    #[test]
    fn callbacks_registered_while_draining_wait_for_next_tick() {
        let _g = lock();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        next_tick(move || {
            let ran_inner = ran_clone.clone();
            next_tick(move || {
                ran_inner.fetch_add(1, Ordering::SeqCst);
            });
        });
        flush_tick();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        flush_tick();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
