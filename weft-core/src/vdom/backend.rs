//! Render backends and per-aspect patch modules.
//!
//! The patcher never touches a concrete tree; every node operation goes
//! through the [`Backend`] capability trait. A backend over real DOM
//! bindings, a terminal renderer, or the in-crate
//! [`MemoryBackend`](super::MemoryBackend) all plug in the same way.
//!
//! Aspects of a node that are not its shape (attributes, classes, inline
//! style, listeners) are handled by [`PatchModule`]s invoked at create,
//! update, destroy, and remove time. The core ships [`AttrsModule`];
//! hosts register the rest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::vnode::VNode;

/// Opaque handle to one backend node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeRef(pub u64);

/// Node operations a render target must provide.
pub trait Backend: Send {
    fn create_element(&mut self, tag: &str, ns: Option<&str>) -> NodeRef;
    fn create_text(&mut self, text: &str) -> NodeRef;
    fn create_comment(&mut self, text: &str) -> NodeRef;

    /// Insert `node` into `parent` before `reference`; append when
    /// `reference` is `None`.
    fn insert_before(&mut self, parent: NodeRef, node: NodeRef, reference: Option<NodeRef>);
    fn append_child(&mut self, parent: NodeRef, child: NodeRef);
    fn remove_child(&mut self, parent: NodeRef, child: NodeRef);

    fn parent_node(&self, node: NodeRef) -> Option<NodeRef>;
    fn next_sibling(&self, node: NodeRef) -> Option<NodeRef>;
    fn children(&self, node: NodeRef) -> Vec<NodeRef>;

    fn tag_name(&self, node: NodeRef) -> Option<String>;
    fn is_element(&self, node: NodeRef) -> bool;
    fn is_text(&self, node: NodeRef) -> bool;
    fn is_comment(&self, node: NodeRef) -> bool;
    fn node_text(&self, node: NodeRef) -> Option<String>;

    fn set_text_content(&mut self, node: NodeRef, text: &str);
    fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str);
    fn remove_attribute(&mut self, node: NodeRef, name: &str);
    /// Scoped-style marker applied to elements rendered under a scope id.
    fn set_style_scope(&mut self, node: NodeRef, scope: &str);
}

/// Countdown gate for node removal.
///
/// A node leaves the tree only after every interested party signals
/// [`done`](RemoveHandle::done): each patch module gets one slot (letting
/// it delay removal, e.g. for a leave transition) plus one slot for the
/// patcher itself.
#[derive(Clone)]
pub struct RemoveHandle {
    inner: Arc<RemoveInner>,
}

struct RemoveInner {
    remaining: AtomicUsize,
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RemoveHandle {
    pub fn new(listeners: usize, remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(RemoveInner {
                remaining: AtomicUsize::new(listeners),
                remove: Mutex::new(Some(Box::new(remove))),
            }),
        }
    }

    /// Register one more party that must signal before removal.
    pub fn add_listener(&self) {
        self.inner.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Signal this party is finished; the last signal performs the removal.
    pub fn done(&self) {
        if self.inner.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(remove) = self.inner.remove.lock().take() {
                remove();
            }
        }
    }
}

/// Hooks for one aspect of a node's data, invoked by the patcher.
#[allow(unused_variables)]
pub trait PatchModule: Send + Sync {
    /// The node was just created; apply this aspect from scratch.
    fn create(&self, backend: &mut dyn Backend, vnode: &VNode) {}

    /// The node is being patched in place; reconcile old data to new.
    fn update(&self, backend: &mut dyn Backend, old: &VNode, new: &VNode) {}

    /// The node's subtree is going away.
    fn destroy(&self, vnode: &VNode) {}

    /// The node itself is leaving the tree. Implementations that need to
    /// delay removal hold the handle and call `done` later.
    fn remove(&self, vnode: &VNode, handle: &RemoveHandle) {
        handle.done();
    }
}

/// Reference module: reconciles the `attrs` map and the style scope.
pub struct AttrsModule;

impl PatchModule for AttrsModule {
    fn create(&self, backend: &mut dyn Backend, vnode: &VNode) {
        let Some(elm) = vnode.elm else { return };
        let Some(data) = &vnode.data else { return };
        for (name, value) in &data.attrs {
            backend.set_attribute(elm, name, value);
        }
        if let Some(scope) = &data.style_scope {
            backend.set_style_scope(elm, scope);
        }
    }

    fn update(&self, backend: &mut dyn Backend, old: &VNode, new: &VNode) {
        let Some(elm) = new.elm else { return };
        let (Some(old_data), Some(new_data)) = (&old.data, &new.data) else {
            return;
        };
        for (name, value) in &new_data.attrs {
            if old_data.attrs.get(name) != Some(value) {
                backend.set_attribute(elm, name, value);
            }
        }
        for name in old_data.attrs.keys() {
            if !new_data.attrs.contains_key(name) {
                backend.remove_attribute(elm, name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn remove_handle_fires_after_all_listeners() {
        let removed = Arc::new(AtomicBool::new(false));
        let removed_clone = removed.clone();
        let handle = RemoveHandle::new(2, move || {
            removed_clone.store(true, Ordering::SeqCst);
        });

        handle.done();
        assert!(!removed.load(Ordering::SeqCst));
        handle.done();
        assert!(removed.load(Ordering::SeqCst));
    }

    #[test]
    fn add_listener_extends_the_countdown() {
        let removed = Arc::new(AtomicBool::new(false));
        let removed_clone = removed.clone();
        let handle = RemoveHandle::new(1, move || {
            removed_clone.store(true, Ordering::SeqCst);
        });

        handle.add_listener();
        handle.done();
        assert!(!removed.load(Ordering::SeqCst));
        handle.done();
        assert!(removed.load(Ordering::SeqCst));
    }
}
