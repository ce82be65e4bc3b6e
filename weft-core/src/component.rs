//! Components: a render function bound to reactive state through one
//! render watcher per instance.
//!
//! # Mount state machine
//!
//! uninitialized → mounted → (updated)* → destroyed
//!
//! `mount` creates the render watcher; its first evaluation renders and
//! patches the tree while collecting dependencies. Root mounts attach to a
//! backend node and fire `mounted` immediately; child mounts render in
//! memory and fire `mounted` later, through the patch insert queue, once a
//! parent actually attaches them. Re-renders always arrive through the
//! scheduler flush: `before_update` via the watcher's `before` hook,
//! `updated` via the scheduler's child-first post-pass. A failed render is
//! reported and the previous tree stays up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{self, CoreError};
use crate::reactive::observer::{observe, ReactiveObject};
use crate::reactive::scheduler;
use crate::reactive::value::Value;
use crate::reactive::watcher::{Hook, Watcher, WatcherOptions};
use crate::vdom::backend::NodeRef;
use crate::vdom::patch::Patcher;
use crate::vdom::vnode::{ComponentHooks, VNode, VNodeData};

static COMPONENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type RenderFn = Arc<dyn Fn(&ReactiveObject) -> Result<VNode, CoreError> + Send + Sync>;

/// Optional lifecycle callbacks, all fired outside the patch engine's
/// critical sections.
#[derive(Default, Clone)]
pub struct LifecycleHooks {
    pub before_create: Option<Hook>,
    pub created: Option<Hook>,
    pub before_mount: Option<Hook>,
    pub mounted: Option<Hook>,
    pub before_update: Option<Hook>,
    pub updated: Option<Hook>,
    pub before_destroy: Option<Hook>,
    pub destroyed: Option<Hook>,
    pub activated: Option<Hook>,
    pub deactivated: Option<Hook>,
}

/// What a component is: a name, a render function, lifecycle hooks.
#[derive(Clone)]
pub struct ComponentDescriptor {
    pub name: String,
    pub render: RenderFn,
    pub hooks: LifecycleHooks,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, render: RenderFn) -> Self {
        Self {
            name: name.into(),
            render,
            hooks: LifecycleHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

struct ComponentInner {
    id: u64,
    descriptor: ComponentDescriptor,
    state: ReactiveObject,
    patcher: Patcher,
    tree: Mutex<Option<VNode>>,
    watcher: Mutex<Option<Watcher>>,
    root_elm: Mutex<Option<NodeRef>>,
    mount_target: Mutex<Option<NodeRef>>,
    mounted: AtomicBool,
    destroyed: AtomicBool,
    inactive: AtomicBool,
    pending_insert: Mutex<Vec<VNode>>,
}

/// One live component instance. Cloning shares the instance.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Create an instance over already-built state. Runs `before_create`,
    /// observes the state (so it rejects undeclared-key writes), then
    /// `created`.
    pub fn new(descriptor: ComponentDescriptor, state: ReactiveObject, patcher: Patcher) -> Self {
        if let Some(hook) = &descriptor.hooks.before_create {
            hook();
        }
        if let Some(observer) = observe(&Value::Object(state.clone())) {
            observer.inc_vm_count();
        }
        let component = Self {
            inner: Arc::new(ComponentInner {
                id: COMPONENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                descriptor,
                state,
                patcher,
                tree: Mutex::new(None),
                watcher: Mutex::new(None),
                root_elm: Mutex::new(None),
                mount_target: Mutex::new(None),
                mounted: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                inactive: AtomicBool::new(false),
                pending_insert: Mutex::new(Vec::new()),
            }),
        };
        if let Some(hook) = &component.inner.descriptor.hooks.created {
            hook();
        }
        component
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn state(&self) -> &ReactiveObject {
        &self.inner.state
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Backend handle of the rendered root, once mounted.
    pub fn root_elm(&self) -> Option<NodeRef> {
        *self.inner.root_elm.lock()
    }

    /// Mount the component.
    ///
    /// With a target the rendered tree replaces it and `mounted` fires
    /// right away. Without one the tree is built in memory and `mounted`
    /// is deferred until a parent patch attaches it.
    pub fn mount(&self, target: Option<NodeRef>) {
        if self.inner.watcher.lock().is_some() || self.is_destroyed() {
            return;
        }
        if let Some(hook) = &self.inner.descriptor.hooks.before_mount {
            hook();
        }
        *self.inner.mount_target.lock() = target;

        let weak = Arc::downgrade(&self.inner);
        let getter_weak = weak.clone();
        let before_weak = weak.clone();
        let watcher = Watcher::new(
            Arc::new(move || {
                if let Some(inner) = getter_weak.upgrade() {
                    render_and_patch(&inner);
                }
                Ok(Value::Null)
            }),
            None,
            WatcherOptions {
                before: Some(Arc::new(move || {
                    if let Some(inner) = before_weak.upgrade() {
                        if inner.mounted.load(Ordering::SeqCst)
                            && !inner.destroyed.load(Ordering::SeqCst)
                        {
                            if let Some(hook) = &inner.descriptor.hooks.before_update {
                                hook();
                            }
                        }
                    }
                })),
                expression: format!("<{}> render", self.inner.descriptor.name),
                ..Default::default()
            },
        );
        let updated_weak = weak;
        watcher.set_updated_hook(Arc::new(move || {
            if let Some(inner) = updated_weak.upgrade() {
                if inner.mounted.load(Ordering::SeqCst)
                    && !inner.destroyed.load(Ordering::SeqCst)
                {
                    if let Some(hook) = &inner.descriptor.hooks.updated {
                        hook();
                    }
                }
            }
        }));
        *self.inner.watcher.lock() = Some(watcher);

        if target.is_some() {
            self.inner.mounted.store(true, Ordering::SeqCst);
            if let Some(hook) = &self.inner.descriptor.hooks.mounted {
                hook();
            }
        }
    }

    /// Tear the instance down: stop watching, run destroy hooks through
    /// the tree, release the state binding. Idempotent. The root element
    /// is left in place for the enclosing patch to remove.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hook) = &self.inner.descriptor.hooks.before_destroy {
            hook();
        }
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.teardown();
        }
        if let Some(observer) = self.inner.state.observer() {
            observer.dec_vm_count();
        }
        if let Some(tree) = self.inner.tree.lock().as_ref() {
            self.inner.patcher.destroy(tree);
        }
        self.inner.mounted.store(false, Ordering::SeqCst);
        if let Some(hook) = &self.inner.descriptor.hooks.destroyed {
            hook();
        }
    }

    /// Reactivate a kept-alive instance immediately.
    pub fn activate(&self) {
        if self.inner.inactive.swap(false, Ordering::SeqCst) {
            if let Some(hook) = &self.inner.descriptor.hooks.activated {
                hook();
            }
        }
    }

    /// Defer reactivation to the end of the current scheduler flush, after
    /// all queued watchers have run.
    pub fn queue_activation(&self) {
        let this = self.clone();
        scheduler::queue_activated(Arc::new(move || this.activate()));
    }

    pub fn deactivate(&self) {
        if !self.inner.inactive.swap(true, Ordering::SeqCst) {
            if let Some(hook) = &self.inner.descriptor.hooks.deactivated {
                hook();
            }
        }
    }

    pub fn is_inactive(&self) -> bool {
        self.inner.inactive.load(Ordering::SeqCst)
    }

    /// Build a vnode that embeds this component in a parent's render
    /// output. The patcher recognizes the hook bundle and routes create,
    /// patch, insert, and destroy through the instance.
    pub fn vnode(&self) -> VNode {
        let mut data = VNodeData::default();
        data.hook = Some(Arc::new(ComponentVNodeHooks {
            component: self.clone(),
        }));
        VNode {
            tag: Some(format!("component:{}", self.inner.descriptor.name)),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Render, then patch the result over the previous tree. Runs inside the
/// render watcher's tracking scope, so every state read registers.
fn render_and_patch(inner: &Arc<ComponentInner>) {
    if inner.destroyed.load(Ordering::SeqCst) {
        return;
    }
    let mut new_tree = match (inner.descriptor.render)(&inner.state) {
        Ok(tree) => tree,
        Err(e) => {
            error::report(&CoreError::Render(format!(
                "<{}>: {e}",
                inner.descriptor.name
            )));
            if inner.tree.lock().is_some() {
                return; // previous tree stays up
            }
            VNode::empty()
        }
    };

    let mut tree_guard = inner.tree.lock();
    match tree_guard.take() {
        None => {
            let target = *inner.mount_target.lock();
            match target {
                Some(target) => inner.patcher.patch_mount(target, &mut new_tree),
                None => {
                    let queue = inner.patcher.create_tree(&mut new_tree);
                    *inner.pending_insert.lock() = queue;
                }
            }
        }
        Some(mut old_tree) => {
            inner.patcher.patch(&mut old_tree, &mut new_tree);
        }
    }
    *inner.root_elm.lock() = new_tree.elm;
    *tree_guard = Some(new_tree);
}

struct ComponentVNodeHooks {
    component: Component,
}

impl ComponentHooks for ComponentVNodeHooks {
    fn init(&self, vnode: &mut VNode, _patcher: &Patcher) {
        if self.component.is_destroyed() {
            return;
        }
        self.component.mount(None);
        vnode.elm = self.component.root_elm();
    }

    fn prepatch(&self, old: &mut VNode, new: &mut VNode) {
        // State is owned by the instance; the embedding vnode carries
        // nothing to reconcile. The subtree updates through the
        // component's own watcher.
        new.elm = old.elm;
    }

    fn postpatch(&self, _old: &VNode, _new: &VNode) {}

    fn insert(&self, _vnode: &VNode) {
        let inner = &self.component.inner;
        if !inner.mounted.swap(true, Ordering::SeqCst) {
            if let Some(hook) = &inner.descriptor.hooks.mounted {
                hook();
            }
        } else if self.component.is_inactive() {
            self.component.queue_activation();
        }
    }

    fn destroy(&self, _vnode: &VNode) {
        self.component.destroy();
    }

    fn pending_insert(&self) -> Vec<VNode> {
        std::mem::take(&mut *self.component.inner.pending_insert.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::vdom::backend::Backend;
    use crate::vdom::memory::MemoryBackend;
    use crate::vdom::vnode::VNodeData;

    fn setup() -> (Patcher, Arc<Mutex<MemoryBackend>>) {
        let backend = Arc::new(Mutex::new(MemoryBackend::new()));
        let patcher = Patcher::with_default_modules(backend.clone() as Arc<Mutex<dyn Backend>>);
        (patcher, backend)
    }

    fn text_render() -> RenderFn {
        Arc::new(|state: &ReactiveObject| {
            let msg = state.get("msg").as_str().unwrap_or_default().to_string();
            Ok(VNode::element(
                "p",
                VNodeData::default(),
                vec![VNode::text_node(msg)],
            ))
        })
    }

    fn hook_recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Hook {
        let log = log.clone();
        Arc::new(move || log.lock().push(name))
    }

    #[test]
    fn root_mount_runs_lifecycle_in_order() {
        let _g = crate::test_util::serial();
        let (patcher, backend) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks {
            before_create: Some(hook_recorder(&log, "before_create")),
            created: Some(hook_recorder(&log, "created")),
            before_mount: Some(hook_recorder(&log, "before_mount")),
            mounted: Some(hook_recorder(&log, "mounted")),
            ..Default::default()
        };
        let state = ReactiveObject::from_iter([("msg", "hi")]);
        let component = Component::new(
            ComponentDescriptor::new("greeter", text_render()).with_hooks(hooks),
            state,
            patcher,
        );

        let root = backend.lock().root();
        component.mount(Some(root));
        assert_eq!(
            *log.lock(),
            vec!["before_create", "created", "before_mount", "mounted"]
        );
        assert!(component.is_mounted());

        let b = backend.lock();
        let elm = component.root_elm().unwrap();
        assert_eq!(b.render_to_string(elm), "<p>hi</p>");
    }

    #[test]
    fn state_change_rerenders_through_the_scheduler() {
        let _g = crate::test_util::serial();
        config::set_async(false);
        let (patcher, backend) = setup();
        let state = ReactiveObject::from_iter([("msg", "one")]);
        let component = Component::new(
            ComponentDescriptor::new("counter", text_render()),
            state.clone(),
            patcher,
        );
        let root = backend.lock().root();
        component.mount(Some(root));

        state.set("msg", "two");
        let b = backend.lock();
        assert_eq!(
            b.render_to_string(component.root_elm().unwrap()),
            "<p>two</p>"
        );
        drop(b);
        config::set_async(true);
    }

    #[test]
    fn update_hooks_wrap_the_rerender() {
        let _g = crate::test_util::serial();
        config::set_async(false);
        let (patcher, backend) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks {
            before_update: Some(hook_recorder(&log, "before_update")),
            updated: Some(hook_recorder(&log, "updated")),
            ..Default::default()
        };
        let state = ReactiveObject::from_iter([("msg", "a")]);
        let component = Component::new(
            ComponentDescriptor::new("c", text_render()).with_hooks(hooks),
            state.clone(),
            patcher,
        );
        let root = backend.lock().root();
        component.mount(Some(root));
        assert!(log.lock().is_empty()); // initial render is not an update

        state.set("msg", "b");
        assert_eq!(*log.lock(), vec!["before_update", "updated"]);
        config::set_async(true);
    }

    #[test]
    fn render_error_keeps_previous_tree() {
        let _g = crate::test_util::serial();
        config::set_async(false);
        let (patcher, backend) = setup();
        let render: RenderFn = Arc::new(|state: &ReactiveObject| {
            let n = state.get("n").as_f64().unwrap_or(0.0);
            if n > 0.0 {
                Err(CoreError::Render("boom in render".to_string()))
            } else {
                Ok(VNode::element(
                    "p",
                    VNodeData::default(),
                    vec![VNode::text_node("ok")],
                ))
            }
        });
        let state = ReactiveObject::from_iter([("n", 0)]);
        let component = Component::new(
            ComponentDescriptor::new("fallible", render),
            state.clone(),
            patcher,
        );
        let root = backend.lock().root();
        component.mount(Some(root));
        let elm = component.root_elm().unwrap();

        state.set("n", 1); // render fails; previous output must survive
        let b = backend.lock();
        assert_eq!(b.render_to_string(elm), "<p>ok</p>");
        drop(b);
        config::set_async(true);
    }

    #[test]
    fn destroy_stops_rerenders_and_runs_hooks() {
        let _g = crate::test_util::serial();
        config::set_async(false);
        let (patcher, backend) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks {
            before_destroy: Some(hook_recorder(&log, "before_destroy")),
            destroyed: Some(hook_recorder(&log, "destroyed")),
            ..Default::default()
        };
        let state = ReactiveObject::from_iter([("msg", "x")]);
        let component = Component::new(
            ComponentDescriptor::new("doomed", text_render()).with_hooks(hooks),
            state.clone(),
            patcher,
        );
        let root = backend.lock().root();
        component.mount(Some(root));
        let elm = component.root_elm().unwrap();

        component.destroy();
        assert_eq!(*log.lock(), vec!["before_destroy", "destroyed"]);
        assert!(component.is_destroyed());

        state.set("msg", "y"); // torn down; no re-render
        let b = backend.lock();
        assert_eq!(b.render_to_string(elm), "<p>x</p>");
        drop(b);

        component.destroy(); // idempotent
        assert_eq!(log.lock().len(), 2);
        config::set_async(true);
    }

    #[test]
    fn child_mounted_defers_until_parent_attaches() {
        let _g = crate::test_util::serial();
        let (patcher, backend) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let child = Component::new(
            ComponentDescriptor::new("child", text_render()).with_hooks(LifecycleHooks {
                mounted: Some(hook_recorder(&log, "child_mounted")),
                ..Default::default()
            }),
            ReactiveObject::from_iter([("msg", "inner")]),
            patcher.clone(),
        );

        let child_for_render = child.clone();
        let parent_render: RenderFn = Arc::new(move |_state| {
            Ok(VNode::element(
                "div",
                VNodeData::default(),
                vec![child_for_render.vnode()],
            ))
        });
        let parent = Component::new(
            ComponentDescriptor::new("parent", parent_render).with_hooks(LifecycleHooks {
                mounted: Some(hook_recorder(&log, "parent_mounted")),
                ..Default::default()
            }),
            ReactiveObject::new(),
            patcher,
        );

        let root = backend.lock().root();
        parent.mount(Some(root));

        // Child before parent, and the child's subtree really rendered.
        assert_eq!(*log.lock(), vec!["child_mounted", "parent_mounted"]);
        let b = backend.lock();
        assert_eq!(
            b.render_to_string(parent.root_elm().unwrap()),
            "<div><p>inner</p></div>"
        );
    }

    #[test]
    fn deactivate_and_activate_toggle_with_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = LifecycleHooks {
            activated: Some(hook_recorder(&log, "activated")),
            deactivated: Some(hook_recorder(&log, "deactivated")),
            ..Default::default()
        };
        let (patcher, _backend) = setup();
        let component = Component::new(
            ComponentDescriptor::new("kept", text_render()).with_hooks(hooks),
            ReactiveObject::from_iter([("msg", "m")]),
            patcher,
        );

        component.deactivate();
        component.deactivate(); // no double fire
        component.activate();
        component.activate();
        assert_eq!(*log.lock(), vec!["deactivated", "activated"]);
    }
}
