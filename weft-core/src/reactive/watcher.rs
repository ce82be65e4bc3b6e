//! Watchers: the subscriber side of the reactive graph.
//!
//! A watcher owns a getter. Evaluating the getter inside a tracking scope
//! collects the exact set of deps the computation touched; when any of
//! them notifies, the watcher re-runs: immediately when `sync`, lazily
//! via a dirty flag when `lazy` (computed values), otherwise through the
//! [scheduler](super::scheduler).
//!
//! # How dependency cleanup works
//!
//! Each evaluation collects into a fresh generation (`new_deps`). When the
//! run finishes, any dep present in the previous generation but not the
//! new one gets this watcher unsubscribed, then the generations swap. A
//! getter that stops reading a branch therefore stops waking on it; stale
//! subscriptions never accumulate across re-renders.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::TrackGuard;
use super::dep::{Dep, DepTarget};
use super::traverse::traverse;
use super::value::{has_changed, Value};
use crate::error::{self, CoreError};

static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_watcher_id() -> u64 {
    WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub type Getter = Arc<dyn Fn() -> Result<Value, CoreError> + Send + Sync>;
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Behavior flags for a watcher.
#[derive(Default, Clone)]
pub struct WatcherOptions {
    /// Collect dependencies through the whole value tree, not just the
    /// bindings the getter touched.
    pub deep: bool,
    /// User-supplied watcher: getter errors and callback panics are
    /// reported and contained instead of propagating.
    pub user: bool,
    /// Do not evaluate until first read; re-evaluate only when dirty.
    pub lazy: bool,
    /// Re-run inline on notify instead of going through the scheduler.
    pub sync: bool,
    /// Invoked by the scheduler just before each flush run.
    pub before: Option<Hook>,
    /// Human-readable source of the getter, for diagnostics.
    pub expression: String,
}

struct DepState {
    deps: SmallVec<[Arc<Dep>; 8]>,
    new_deps: SmallVec<[Arc<Dep>; 8]>,
    dep_ids: HashSet<u64>,
    new_dep_ids: HashSet<u64>,
}

pub(crate) struct WatcherInner {
    id: u64,
    getter: Getter,
    cb: Option<WatchCallback>,
    expression: String,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<Hook>,
    updated_hook: RwLock<Option<Hook>>,
    active: AtomicBool,
    dirty: AtomicBool,
    value: Mutex<Value>,
    deps: Mutex<DepState>,
    self_weak: Weak<WatcherInner>,
}

/// A reactive subscriber: render loops, user watch bindings, and computed
/// values are all watchers with different flag combinations.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    pub fn new(getter: Getter, cb: Option<WatchCallback>, options: WatcherOptions) -> Self {
        let inner = Arc::new_cyclic(|self_weak| WatcherInner {
            id: next_watcher_id(),
            getter,
            cb,
            expression: options.expression,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            before: options.before,
            updated_hook: RwLock::new(None),
            active: AtomicBool::new(true),
            dirty: AtomicBool::new(options.lazy),
            value: Mutex::new(Value::Null),
            deps: Mutex::new(DepState {
                deps: SmallVec::new(),
                new_deps: SmallVec::new(),
                dep_ids: HashSet::new(),
                new_dep_ids: HashSet::new(),
            }),
            self_weak: self_weak.clone(),
        });
        let watcher = Self { inner };
        if !watcher.inner.lazy {
            let value = watcher.inner.get();
            *watcher.inner.value.lock() = value;
        }
        watcher
    }

    /// Watch a dotted path (`"a.b.c"`) on an owner value. An invalid path
    /// is reported and yields a getter that always reads `Null`.
    pub fn from_path(
        owner: &Value,
        path: &str,
        cb: WatchCallback,
        mut options: WatcherOptions,
    ) -> Self {
        if options.expression.is_empty() {
            options.expression = path.to_string();
        }
        let getter: Getter = match parse_path(path) {
            Some(segments) => {
                let owner = owner.clone();
                Arc::new(move || {
                    let mut current = owner.clone();
                    for segment in &segments {
                        current = match current {
                            Value::Object(obj) => obj.get(segment),
                            _ => return Ok(Value::Null),
                        };
                    }
                    Ok(current)
                })
            }
            None => {
                error::report(&CoreError::InvalidPath(path.to_string()));
                Arc::new(|| Ok(Value::Null))
            }
        };
        Self::new(getter, Some(cb), options)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    pub fn is_sync(&self) -> bool {
        self.inner.sync
    }

    /// Last computed value.
    pub fn value(&self) -> Value {
        self.inner.value.lock().clone()
    }

    /// Component mount wires its post-flush hook here.
    pub fn set_updated_hook(&self, hook: Hook) {
        *self.inner.updated_hook.write() = Some(hook);
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.inner.before {
            before();
        }
    }

    pub(crate) fn call_updated(&self) {
        let hook = self.inner.updated_hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Re-evaluate and invoke the callback; the scheduler's flush entry.
    pub fn run(&self) {
        self.inner.run();
    }

    /// For lazy watchers: recompute the cached value and clear the dirty
    /// flag. Caller decides when (on read of a dirty computed).
    pub fn evaluate(&self) {
        let value = self.inner.get();
        *self.inner.value.lock() = value;
        self.inner.dirty.store(false, Ordering::SeqCst);
    }

    /// Re-register this watcher's deps with the *currently active* target.
    /// Lets an outer watcher depend on everything a computed depends on.
    pub fn depend(&self) {
        let deps: Vec<Arc<Dep>> = self.inner.deps.lock().deps.iter().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep and go inert. Idempotent.
    pub fn teardown(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            let mut state = self.inner.deps.lock();
            for dep in &state.deps {
                dep.remove_sub(self.inner.id);
            }
            state.deps.clear();
            state.dep_ids.clear();
            state.new_deps.clear();
            state.new_dep_ids.clear();
        }
    }

    /// Live dep count. Test and debug helper.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.lock().deps.len()
    }
}

impl WatcherInner {
    /// Evaluate the getter inside a tracking scope, collecting deps into
    /// the new generation, then swap generations.
    fn get(&self) -> Value {
        let value = {
            let _guard = TrackGuard::push(self.self_weak.clone() as Weak<dyn DepTarget>);
            let value = match (self.getter)() {
                Ok(v) => v,
                Err(e) => {
                    error::report(&CoreError::Getter {
                        expression: self.expression.clone(),
                        message: e.to_string(),
                    });
                    // User getters degrade to Null; framework getters keep
                    // the last good value so downstream state stays sane.
                    if self.user {
                        Value::Null
                    } else {
                        self.value.lock().clone()
                    }
                }
            };
            if self.deep {
                traverse(&value);
            }
            value
        };
        self.cleanup_deps();
        value
    }

    fn cleanup_deps(&self) {
        let mut state = self.deps.lock();
        let DepState {
            deps,
            new_deps,
            dep_ids,
            new_dep_ids,
        } = &mut *state;
        for dep in deps.iter() {
            if !new_dep_ids.contains(&dep.id()) {
                dep.remove_sub(self.id);
            }
        }
        std::mem::swap(deps, new_deps);
        std::mem::swap(dep_ids, new_dep_ids);
        new_deps.clear();
        new_dep_ids.clear();
    }

    fn run(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let value = self.get();
        let old = std::mem::replace(&mut *self.value.lock(), value.clone());
        // Reference-typed values can mutate without changing identity, and
        // deep watchers exist precisely to see such mutations, so both
        // force the callback.
        if has_changed(&old, &value) || value.is_reference() || self.deep {
            if let Some(cb) = &self.cb {
                if self.user {
                    let result = catch_unwind(AssertUnwindSafe(|| cb(&value, &old)));
                    if let Err(payload) = result {
                        error::report(&CoreError::UserCallback {
                            context: self.expression.clone(),
                            message: panic_message(&payload),
                        });
                    }
                } else {
                    cb(&value, &old);
                }
            }
        }
    }
}

impl DepTarget for WatcherInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn add_dep(&self, dep: &Arc<Dep>) {
        let mut state = self.deps.lock();
        let id = dep.id();
        if state.new_dep_ids.insert(id) {
            state.new_deps.push(dep.clone());
            if !state.dep_ids.contains(&id) {
                dep.add_sub(self.self_weak.clone() as Weak<dyn DepTarget>);
            }
        }
    }

    fn update(&self) {
        if self.lazy {
            self.dirty.store(true, Ordering::SeqCst);
        } else if self.sync {
            self.run();
        } else if let Some(inner) = self.self_weak.upgrade() {
            super::scheduler::queue_watcher(Watcher { inner });
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("active", &self.is_active())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

fn parse_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '_' || c == '$');
    if !valid {
        return None;
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::{observe, ReactiveObject};
    use std::sync::atomic::AtomicUsize;

    fn state(pairs: &[(&str, i64)]) -> ReactiveObject {
        let obj = ReactiveObject::from_iter(pairs.iter().map(|(k, v)| (*k, *v)));
        observe(&Value::Object(obj.clone()));
        obj
    }

    fn sync_options() -> WatcherOptions {
        WatcherOptions {
            sync: true,
            ..Default::default()
        }
    }

    #[test]
    fn sync_watcher_fires_on_change() {
        let obj = state(&[("count", 0)]);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let getter_obj = obj.clone();
        let watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("count"))),
            Some(Arc::new(move |new, old| {
                assert!(has_changed(old, new));
                fires_clone.fetch_add(1, Ordering::SeqCst);
            })),
            sync_options(),
        );

        obj.set("count", 1);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.value().as_f64(), Some(1.0));
    }

    #[test]
    fn equal_write_does_not_fire() {
        let obj = state(&[("count", 7)]);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("count"))),
            Some(Arc::new(move |_, _| {
                fires_clone.fetch_add(1, Ordering::SeqCst);
            })),
            sync_options(),
        );

        obj.set("count", 7);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn getter_error_degrades_by_watcher_kind() {
        let obj = state(&[("count", 1)]);

        let getter_obj = obj.clone();
        let getter: Getter = Arc::new(move || {
            let n = getter_obj.get("count").as_f64().unwrap_or(0.0);
            if n > 1.0 {
                Err(CoreError::Render("boom".to_string()))
            } else {
                Ok(Value::from(n))
            }
        });

        let user = Watcher::new(
            getter.clone(),
            None,
            WatcherOptions {
                sync: true,
                user: true,
                ..Default::default()
            },
        );
        let framework = Watcher::new(getter, None, sync_options());
        assert_eq!(user.value().as_f64(), Some(1.0));

        obj.set("count", 2); // both getters now fail
        assert!(user.value().is_null());
        assert_eq!(framework.value().as_f64(), Some(1.0)); // keeps the last good value
    }

    #[test]
    fn conditional_getter_drops_stale_deps() {
        let obj = state(&[("flag", 1), ("a", 0), ("b", 0)]);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let getter_obj = obj.clone();
        let watcher = Watcher::new(
            Arc::new(move || {
                if getter_obj.get("flag").as_f64() == Some(1.0) {
                    Ok(getter_obj.get("a"))
                } else {
                    Ok(getter_obj.get("b"))
                }
            }),
            Some(Arc::new(move |_, _| {
                fires_clone.fetch_add(1, Ordering::SeqCst);
            })),
            sync_options(),
        );
        assert_eq!(watcher.dep_count(), 2); // flag + a

        obj.set("flag", 0); // switches to the b branch
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.dep_count(), 2); // flag + b

        obj.set("a", 99); // abandoned branch; must not fire
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        obj.set("b", 5);
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn teardown_stops_notifications() {
        let obj = state(&[("count", 0)]);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let getter_obj = obj.clone();
        let watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("count"))),
            Some(Arc::new(move |_, _| {
                fires_clone.fetch_add(1, Ordering::SeqCst);
            })),
            sync_options(),
        );

        watcher.teardown();
        assert_eq!(watcher.dep_count(), 0);
        obj.set("count", 1);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lazy_watcher_marks_dirty_instead_of_running() {
        let obj = state(&[("count", 1)]);
        let evaluations = Arc::new(AtomicUsize::new(0));

        let evals = evaluations.clone();
        let getter_obj = obj.clone();
        let watcher = Watcher::new(
            Arc::new(move || {
                evals.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(
                    getter_obj.get("count").as_f64().unwrap_or(0.0) * 2.0,
                ))
            }),
            None,
            WatcherOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert!(watcher.is_dirty());
        assert_eq!(evaluations.load(Ordering::SeqCst), 0);

        watcher.evaluate();
        assert!(!watcher.is_dirty());
        assert_eq!(watcher.value().as_f64(), Some(2.0));

        obj.set("count", 3);
        assert!(watcher.is_dirty());
        assert_eq!(evaluations.load(Ordering::SeqCst), 1); // no eager re-eval

        watcher.evaluate();
        assert_eq!(watcher.value().as_f64(), Some(6.0));
    }

    #[test]
    fn deep_watcher_sees_nested_mutation() {
        let nested = ReactiveObject::from_iter([("x", 1)]);
        let obj = ReactiveObject::from_iter([("child", Value::Object(nested.clone()))]);
        observe(&Value::Object(obj.clone()));
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("child"))),
            Some(Arc::new(move |_, _| {
                fires_clone.fetch_add(1, Ordering::SeqCst);
            })),
            WatcherOptions {
                deep: true,
                sync: true,
                ..Default::default()
            },
        );

        nested.set("x", 2);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn user_callback_panic_is_contained() {
        let obj = state(&[("count", 0)]);

        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("count"))),
            Some(Arc::new(|_, _| panic!("user callback exploded"))),
            WatcherOptions {
                user: true,
                sync: true,
                expression: "count".to_string(),
                ..Default::default()
            },
        );

        obj.set("count", 1); // must not unwind into the setter
        assert_eq!(obj.get_untracked("count").as_f64(), Some(1.0));
    }

    #[test]
    fn path_watcher_reads_nested_fields() {
        let inner = ReactiveObject::from_iter([("name", "ada")]);
        let obj = ReactiveObject::from_iter([("user", Value::Object(inner.clone()))]);
        let root = Value::Object(obj);
        observe(&root);
        let fires = Arc::new(AtomicUsize::new(0));

        let fires_clone = fires.clone();
        let watcher = Watcher::from_path(
            &root,
            "user.name",
            Arc::new(move |new, _| {
                assert_eq!(new.as_str(), Some("lovelace"));
                fires_clone.fetch_add(1, Ordering::SeqCst);
            }),
            sync_options(),
        );
        assert_eq!(watcher.value().as_str(), Some("ada"));

        inner.set("name", "lovelace");
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_path_yields_null_getter() {
        let root = Value::Object(ReactiveObject::new());
        let watcher = Watcher::from_path(
            &root,
            "a[0].b",
            Arc::new(|_, _| {}),
            WatcherOptions::default(),
        );
        assert!(watcher.value().is_null());
    }
}
