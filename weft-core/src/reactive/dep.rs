//! Dependency hubs.
//!
//! A [`Dep`] is the publisher side of the reactive system: one per reactive
//! property plus one per observed container. Watchers subscribe to deps
//! while they evaluate; mutating the underlying value notifies every
//! subscriber.
//!
//! Subscriptions are held as weak references so a dep never keeps a
//! torn-down watcher alive, but explicit [`Watcher::teardown`] is still
//! required for prompt removal: a dep never cleans its list on its own
//! except when a notify pass finds a dead entry.
//!
//! [`Watcher::teardown`]: super::Watcher::teardown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context;
use crate::config;

static DEP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_dep_id() -> u64 {
    DEP_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The subscriber side of a dependency edge.
///
/// Implemented by watchers; the indirection keeps the dep layer independent
/// of the watcher's internals.
pub trait DepTarget: Send + Sync {
    /// Monotonic id; defines flush order.
    fn id(&self) -> u64;

    /// Record `dep` in the target's dependency set and subscribe back.
    fn add_dep(&self, dep: &Arc<Dep>);

    /// A dependency changed; decide whether to mark dirty, run, or enqueue.
    fn update(&self);
}

/// A change-notification hub for one observable location.
pub struct Dep {
    id: u64,
    subs: Mutex<SmallVec<[Weak<dyn DepTarget>; 4]>>,
}

impl Dep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_dep_id(),
            subs: Mutex::new(SmallVec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Append a subscriber. Duplicate prevention is the caller's job: the
    /// watcher's id-set bookkeeping guarantees it subscribes at most once.
    pub fn add_sub(&self, sub: Weak<dyn DepTarget>) {
        self.subs.lock().push(sub);
    }

    /// Remove the subscriber with the given id.
    pub fn remove_sub(&self, id: u64) {
        self.subs
            .lock()
            .retain(|weak| weak.upgrade().is_some_and(|sub| sub.id() != id));
    }

    /// Register a dependency edge with the currently active watcher, in
    /// both directions. No-op outside a tracking scope.
    pub fn depend(self: &Arc<Self>) {
        if let Some(target) = context::current_target() {
            target.add_dep(self);
        }
    }

    /// Notify every live subscriber that the observed location changed.
    pub fn notify(&self) {
        // Stabilize the subscriber list first; updates may re-enter.
        let mut subs: Vec<Arc<dyn DepTarget>> = Vec::new();
        {
            let mut guard = self.subs.lock();
            guard.retain(|weak| {
                if let Some(sub) = weak.upgrade() {
                    subs.push(sub);
                    true
                } else {
                    false
                }
            });
        }
        if !config::is_async() {
            // Subs aren't sorted in the scheduler when running synchronously;
            // sort here so they still fire in id order.
            subs.sort_by_key(|sub| sub.id());
        }
        for sub in subs {
            sub.update();
        }
    }

    /// Number of live subscribers. Test and debug helper.
    pub fn sub_count(&self) -> usize {
        self.subs
            .lock()
            .iter()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subs", &self.sub_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct MockTarget {
        id: u64,
        updates: AtomicUsize,
    }

    impl MockTarget {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id,
                updates: AtomicUsize::new(0),
            })
        }
    }

    impl DepTarget for MockTarget {
        fn id(&self) -> u64 {
            self.id
        }

        fn add_dep(&self, _dep: &Arc<Dep>) {}

        fn update(&self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dep_ids_are_unique_and_monotonic() {
        let a = Dep::new();
        let b = Dep::new();
        assert!(a.id() < b.id());
    }

    #[test]
    fn notify_reaches_live_subscribers() {
        let dep = Dep::new();
        let target = MockTarget::new(1);
        dep.add_sub(Arc::downgrade(&target) as Weak<dyn DepTarget>);

        dep.notify();
        assert_eq!(target.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_prunes_dead_subscribers() {
        let dep = Dep::new();
        {
            let target = MockTarget::new(1);
            dep.add_sub(Arc::downgrade(&target) as Weak<dyn DepTarget>);
            assert_eq!(dep.sub_count(), 1);
        }
        dep.notify();
        assert_eq!(dep.sub_count(), 0);
    }

    #[test]
    fn remove_sub_unsubscribes_by_id() {
        let dep = Dep::new();
        let a = MockTarget::new(1);
        let b = MockTarget::new(2);
        dep.add_sub(Arc::downgrade(&a) as Weak<dyn DepTarget>);
        dep.add_sub(Arc::downgrade(&b) as Weak<dyn DepTarget>);

        dep.remove_sub(1);
        dep.notify();
        assert_eq!(a.updates.load(Ordering::SeqCst), 0);
        assert_eq!(b.updates.load(Ordering::SeqCst), 1);
    }
}
