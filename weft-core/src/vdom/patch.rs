//! The patch engine: reconciles a previous virtual tree with a new one,
//! issuing the minimal backend operations.
//!
//! # How the child diff works
//!
//! [`Patcher::patch_vnode`] compares keyed child lists with four cursor
//! pairs (old start/end, new start/end). Matching ends advance cursors
//! with an in-place patch; a head/tail cross is a single move. Only when
//! none of the four comparisons hit does it build a key→index map over the
//! remaining old span: a key hit is patched and moved into place, a miss
//! (or a key collision with an incompatible element) creates a fresh node.
//! Consumed old slots are left as sentinels so the cursors skip them. When
//! the cursors cross, whatever remains on one side is bulk-inserted or
//! bulk-removed.
//!
//! # Insert queue
//!
//! "Now attached" notifications cannot fire while a subtree is still being
//! assembled off-tree. Each top-level pass collects them into a queue;
//! component boundaries hand their internal queue up via
//! [`ComponentHooks::pending_insert`], and the queue flushes only at the
//! outermost call once everything is really in the tree. In-memory mounts
//! ([`Patcher::create_tree`]) return the queue to the caller instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{Backend, NodeRef, PatchModule, RemoveHandle};
use super::vnode::{same_vnode, Key, VNode};
use crate::error::{self, CoreError};

/// The reconciler: a backend plus a module pipeline. Cloning is cheap and
/// shares both.
#[derive(Clone)]
pub struct Patcher {
    backend: Arc<Mutex<dyn Backend>>,
    modules: Arc<Vec<Box<dyn PatchModule>>>,
}

impl Patcher {
    pub fn new(backend: Arc<Mutex<dyn Backend>>, modules: Vec<Box<dyn PatchModule>>) -> Self {
        Self {
            backend,
            modules: Arc::new(modules),
        }
    }

    /// A patcher with the built-in module set ([`AttrsModule`]).
    ///
    /// [`AttrsModule`]: super::backend::AttrsModule
    pub fn with_default_modules(backend: Arc<Mutex<dyn Backend>>) -> Self {
        Self::new(backend, vec![Box::new(super::backend::AttrsModule)])
    }

    pub fn backend(&self) -> &Arc<Mutex<dyn Backend>> {
        &self.backend
    }

    fn with_backend<R>(&self, f: impl FnOnce(&mut dyn Backend) -> R) -> R {
        let mut guard = self.backend.lock();
        f(&mut *guard)
    }

    /// Render a tree in memory, unattached. Returns the pending insert
    /// queue; the caller flushes it (or hands it upward) once the tree is
    /// actually attached.
    pub fn create_tree(&self, vnode: &mut VNode) -> Vec<VNode> {
        let mut queue = Vec::new();
        self.create_elm(vnode, &mut queue, None, None);
        queue
    }

    /// Initial root mount: render `vnode` and swap it in for `target`.
    /// A target without a parent cannot be replaced; the tree is appended
    /// inside it instead.
    pub fn patch_mount(&self, target: NodeRef, vnode: &mut VNode) {
        tracing::debug!(target: "weft_core", ?target, "initial mount");
        let mut queue = Vec::new();
        let parent = self.with_backend(|b| b.parent_node(target));
        match parent {
            Some(_) => {
                let next = self.with_backend(|b| b.next_sibling(target));
                self.create_elm(vnode, &mut queue, parent, next);
                self.remove_node(target);
            }
            None => {
                self.create_elm(vnode, &mut queue, Some(target), None);
            }
        }
        self.invoke_insert_hooks(queue);
    }

    /// Adopt an existing backend tree rooted at `target` for `vnode`.
    /// Returns `false` (after one diagnostic) when the trees do not line
    /// up; the caller falls back to [`patch_mount`](Self::patch_mount).
    pub fn hydrate_mount(&self, target: NodeRef, vnode: &mut VNode) -> bool {
        let mut queue = Vec::new();
        if self.hydrate(target, vnode, &mut queue) {
            self.invoke_insert_hooks(queue);
            true
        } else {
            error::report(&CoreError::HydrationMismatch {
                tag: vnode.tag.clone().unwrap_or_else(|| "#text".to_string()),
            });
            false
        }
    }

    /// Update pass: reconcile `old` (the currently rendered tree, consumed
    /// by this call) with `new`. Incompatible roots are replaced outright.
    pub fn patch(&self, old: &mut VNode, new: &mut VNode) {
        let mut queue = Vec::new();
        if same_vnode(old, new) {
            self.patch_vnode(old, new, &mut queue);
        } else {
            let parent = old
                .elm
                .and_then(|e| self.with_backend(|b| b.parent_node(e)));
            let next = old
                .elm
                .and_then(|e| self.with_backend(|b| b.next_sibling(e)));
            self.create_elm(new, &mut queue, parent, next);
            if parent.is_some() {
                self.remove_vnodes(std::slice::from_ref(&*old).iter());
            } else {
                self.invoke_destroy_hook(old);
            }
        }
        self.invoke_insert_hooks(queue);
    }

    /// Tear down a tree: destroy hooks only, the caller decides whether
    /// the root element stays in place.
    pub fn destroy(&self, vnode: &VNode) {
        self.invoke_destroy_hook(vnode);
    }

    /// Fire the deferred "now attached" notifications.
    pub fn invoke_insert_hooks(&self, queue: Vec<VNode>) {
        for vnode in queue {
            if let Some(hook) = vnode.hook() {
                hook.insert(&vnode);
            }
        }
    }

    fn create_elm(
        &self,
        vnode: &mut VNode,
        queue: &mut Vec<VNode>,
        parent: Option<NodeRef>,
        ref_node: Option<NodeRef>,
    ) {
        if self.create_component(vnode, queue, parent, ref_node) {
            return;
        }
        if let Some(tag) = vnode.tag.clone() {
            let ns = vnode.ns.clone();
            let elm = self.with_backend(|b| b.create_element(&tag, ns.as_deref()));
            vnode.elm = Some(elm);
            self.create_children(vnode, queue);
            if vnode.data.is_some() {
                self.invoke_create_hooks(vnode, queue);
            }
            self.insert_node(parent, elm, ref_node);
        } else if vnode.is_comment {
            let elm =
                self.with_backend(|b| b.create_comment(vnode.text.as_deref().unwrap_or("")));
            vnode.elm = Some(elm);
            self.insert_node(parent, elm, ref_node);
        } else {
            let elm = self.with_backend(|b| b.create_text(vnode.text.as_deref().unwrap_or("")));
            vnode.elm = Some(elm);
            self.insert_node(parent, elm, ref_node);
        }
    }

    /// Component vnodes do not create their own element: `init` mounts the
    /// component's subtree in memory and parks its root handle on the
    /// vnode; only the attachment happens here.
    fn create_component(
        &self,
        vnode: &mut VNode,
        queue: &mut Vec<VNode>,
        parent: Option<NodeRef>,
        ref_node: Option<NodeRef>,
    ) -> bool {
        let Some(hook) = vnode.hook() else {
            return false;
        };
        hook.init(vnode, self);
        if let Some(elm) = vnode.elm {
            queue.extend(hook.pending_insert());
            queue.push(vnode.clone());
            self.insert_node(parent, elm, ref_node);
            true
        } else {
            false
        }
    }

    fn create_children(&self, vnode: &mut VNode, queue: &mut Vec<VNode>) {
        let parent = vnode.elm;
        let ns = vnode.ns.clone();
        for child in &mut vnode.children {
            if child.ns.is_none() && child.tag.is_some() {
                child.ns = ns.clone();
            }
            self.create_elm(child, queue, parent, None);
        }
        if vnode.children.is_empty() {
            if let (Some(elm), Some(text)) = (vnode.elm, vnode.text.clone()) {
                self.with_backend(|b| b.set_text_content(elm, &text));
            }
        }
    }

    fn invoke_create_hooks(&self, vnode: &VNode, queue: &mut Vec<VNode>) {
        {
            let mut backend = self.backend.lock();
            for module in self.modules.iter() {
                module.create(&mut *backend, vnode);
            }
        }
        if vnode.hook().is_some() {
            queue.push(vnode.clone());
        }
    }

    fn insert_node(&self, parent: Option<NodeRef>, node: NodeRef, reference: Option<NodeRef>) {
        let Some(parent) = parent else { return };
        self.with_backend(|b| match reference {
            // A stale anchor (already detached) degrades to append.
            Some(r) if b.parent_node(r) == Some(parent) => {
                b.insert_before(parent, node, Some(r));
            }
            _ => b.append_child(parent, node),
        });
    }

    fn remove_node(&self, node: NodeRef) {
        self.with_backend(|b| {
            if let Some(parent) = b.parent_node(node) {
                b.remove_child(parent, node);
            }
        });
    }

    fn remove_vnodes<'a>(&self, vnodes: impl Iterator<Item = &'a VNode>) {
        for vnode in vnodes {
            if vnode.tag.is_some() {
                self.invoke_destroy_hook(vnode);
                self.remove_and_invoke_remove_hook(vnode);
            } else if let Some(elm) = vnode.elm {
                self.remove_node(elm);
            }
        }
    }

    fn remove_and_invoke_remove_hook(&self, vnode: &VNode) {
        let Some(elm) = vnode.elm else { return };
        let patcher = self.clone();
        let handle = RemoveHandle::new(self.modules.len() + 1, move || {
            patcher.remove_node(elm);
        });
        for module in self.modules.iter() {
            module.remove(vnode, &handle);
        }
        handle.done();
    }

    fn invoke_destroy_hook(&self, vnode: &VNode) {
        if let Some(hook) = vnode.hook() {
            hook.destroy(vnode);
        }
        for module in self.modules.iter() {
            module.destroy(vnode);
        }
        for child in &vnode.children {
            self.invoke_destroy_hook(child);
        }
    }

    /// Patch `new` in place over `old` (already known to be the same node).
    /// `old`'s children are consumed; `new` becomes the current tree.
    pub(crate) fn patch_vnode(&self, old: &mut VNode, new: &mut VNode, queue: &mut Vec<VNode>) {
        new.elm = old.elm;

        // A static subtree re-rendered as a clone (or render-once) is
        // byte-identical by construction; adopt the old rendering whole.
        if old.is_static
            && new.is_static
            && old.key == new.key
            && (new.is_cloned || new.is_once)
        {
            new.children = std::mem::take(&mut old.children);
            return;
        }

        if let Some(hook) = new.hook() {
            hook.prepatch(old, new);
        }

        let Some(elm) = new.elm else { return };

        if new.data.is_some() && new.tag.is_some() {
            let mut backend = self.backend.lock();
            for module in self.modules.iter() {
                module.update(&mut *backend, old, new);
            }
        }

        if new.text.is_none() {
            let has_old = !old.children.is_empty();
            let has_new = !new.children.is_empty();
            if has_old && has_new {
                self.update_children(elm, &mut old.children, &mut new.children, queue);
            } else if has_new {
                check_duplicate_keys(&new.children);
                if old.text.is_some() {
                    self.with_backend(|b| b.set_text_content(elm, ""));
                }
                for child in &mut new.children {
                    self.create_elm(child, queue, Some(elm), None);
                }
            } else if has_old {
                self.remove_vnodes(old.children.iter());
            } else if old.text.is_some() {
                self.with_backend(|b| b.set_text_content(elm, ""));
            }
        } else if old.text != new.text {
            self.with_backend(|b| b.set_text_content(elm, new.text.as_deref().unwrap_or("")));
        }

        if let Some(hook) = new.hook() {
            hook.postpatch(old, new);
        }
    }

    fn update_children(
        &self,
        parent: NodeRef,
        old_children: &mut Vec<VNode>,
        new_children: &mut [VNode],
        queue: &mut Vec<VNode>,
    ) {
        check_duplicate_keys(new_children);

        // Consumed old slots become None so the cursors skip them.
        let mut old: Vec<Option<VNode>> = old_children.drain(..).map(Some).collect();
        let mut old_start: isize = 0;
        let mut old_end: isize = old.len() as isize - 1;
        let mut new_start: isize = 0;
        let mut new_end: isize = new_children.len() as isize - 1;
        let mut key_map: Option<HashMap<Key, usize>> = None;

        while old_start <= old_end && new_start <= new_end {
            let (os, oe, ns, ne) = (
                old_start as usize,
                old_end as usize,
                new_start as usize,
                new_end as usize,
            );
            if old[os].is_none() {
                old_start += 1;
                continue;
            }
            if old[oe].is_none() {
                old_end -= 1;
                continue;
            }

            if same_vnode(old[os].as_ref().unwrap(), &new_children[ns]) {
                self.patch_vnode(old[os].as_mut().unwrap(), &mut new_children[ns], queue);
                old_start += 1;
                new_start += 1;
            } else if same_vnode(old[oe].as_ref().unwrap(), &new_children[ne]) {
                self.patch_vnode(old[oe].as_mut().unwrap(), &mut new_children[ne], queue);
                old_end -= 1;
                new_end -= 1;
            } else if same_vnode(old[os].as_ref().unwrap(), &new_children[ne]) {
                // Old head moved right: patch, then reinsert after old tail.
                let anchor = old[oe]
                    .as_ref()
                    .unwrap()
                    .elm
                    .and_then(|e| self.with_backend(|b| b.next_sibling(e)));
                self.patch_vnode(old[os].as_mut().unwrap(), &mut new_children[ne], queue);
                if let Some(moved) = new_children[ne].elm {
                    self.insert_node(Some(parent), moved, anchor);
                }
                old_start += 1;
                new_end -= 1;
            } else if same_vnode(old[oe].as_ref().unwrap(), &new_children[ns]) {
                // Old tail moved left: patch, then reinsert before old head.
                let anchor = old[os].as_ref().unwrap().elm;
                self.patch_vnode(old[oe].as_mut().unwrap(), &mut new_children[ns], queue);
                if let Some(moved) = new_children[ns].elm {
                    self.insert_node(Some(parent), moved, anchor);
                }
                old_end -= 1;
                new_start += 1;
            } else {
                if key_map.is_none() {
                    key_map = Some(build_key_index(&old, os, oe));
                }
                let found = match &new_children[ns].key {
                    Some(key) => key_map.as_ref().unwrap().get(key).copied(),
                    None => find_old_index(&old, os, oe, &new_children[ns]),
                };
                let anchor = old[os].as_ref().unwrap().elm;
                match found {
                    Some(i)
                        if old[i].is_some()
                            && same_vnode(old[i].as_ref().unwrap(), &new_children[ns]) =>
                    {
                        let mut moved = old[i].take().unwrap();
                        self.patch_vnode(&mut moved, &mut new_children[ns], queue);
                        if let Some(elm) = new_children[ns].elm {
                            self.insert_node(Some(parent), elm, anchor);
                        }
                    }
                    // Not found, a consumed slot, or the same key bound to
                    // an incompatible element: treat as a brand-new node.
                    _ => {
                        self.create_elm(&mut new_children[ns], queue, Some(parent), anchor);
                    }
                }
                new_start += 1;
            }
        }

        if old_start > old_end {
            // Leftover new nodes: insert before the first already-patched
            // node to the right of the range (append when none).
            let anchor = new_children
                .get((new_end + 1) as usize)
                .and_then(|v| v.elm);
            for i in new_start..=new_end {
                self.create_elm(&mut new_children[i as usize], queue, Some(parent), anchor);
            }
        } else if new_start > new_end {
            let leftovers: Vec<VNode> = (old_start..=old_end)
                .filter_map(|i| old[i as usize].take())
                .collect();
            self.remove_vnodes(leftovers.iter());
        }
    }

    fn hydrate(&self, elm: NodeRef, vnode: &mut VNode, queue: &mut Vec<VNode>) -> bool {
        vnode.elm = Some(elm);
        if vnode.hook().is_some() {
            // Components re-render client side; adopting their output
            // would need the instance state the backend tree cannot carry.
            return false;
        }
        if let Some(tag) = vnode.tag.clone() {
            let tag_matches = self.with_backend(|b| {
                b.is_element(elm)
                    && b.tag_name(elm)
                        .is_some_and(|t| t.eq_ignore_ascii_case(&tag))
            });
            if !tag_matches {
                tracing::debug!(target: "weft_core", tag, "hydration tag mismatch");
                return false;
            }
            if vnode.children.is_empty() {
                if let Some(text) = vnode.text.clone() {
                    self.with_backend(|b| b.set_text_content(elm, &text));
                }
            } else {
                let existing = self.with_backend(|b| b.children(elm));
                if existing.is_empty() {
                    // Server omitted the subtree; render it client side.
                    self.create_children(vnode, queue);
                } else if existing.len() == vnode.children.len() {
                    for (child_elm, child) in existing.into_iter().zip(vnode.children.iter_mut())
                    {
                        if !self.hydrate(child_elm, child, queue) {
                            return false;
                        }
                    }
                } else {
                    tracing::debug!(target: "weft_core", tag, "hydration child count mismatch");
                    return false;
                }
            }
            if vnode.data.is_some() {
                self.invoke_create_hooks(vnode, queue);
            }
            true
        } else if vnode.is_comment {
            self.with_backend(|b| b.is_comment(elm))
        } else {
            if !self.with_backend(|b| b.is_text(elm)) {
                return false;
            }
            let existing = self.with_backend(|b| b.node_text(elm));
            if existing.as_deref() != vnode.text.as_deref() {
                let text = vnode.text.clone().unwrap_or_default();
                self.with_backend(|b| b.set_text_content(elm, &text));
            }
            true
        }
    }
}

fn build_key_index(old: &[Option<VNode>], start: usize, end: usize) -> HashMap<Key, usize> {
    let mut map = HashMap::new();
    for (i, slot) in old.iter().enumerate().take(end + 1).skip(start) {
        if let Some(vnode) = slot {
            if let Some(key) = &vnode.key {
                map.entry(key.clone()).or_insert(i);
            }
        }
    }
    map
}

fn find_old_index(
    old: &[Option<VNode>],
    start: usize,
    end: usize,
    target: &VNode,
) -> Option<usize> {
    (start..=end).find(|&i| {
        old[i]
            .as_ref()
            .is_some_and(|candidate| candidate.key.is_none() && same_vnode(candidate, target))
    })
}

fn check_duplicate_keys(children: &[VNode]) {
    let mut seen: HashSet<&Key> = HashSet::new();
    for child in children {
        if let Some(key) = &child.key {
            if !seen.insert(key) {
                error::report(&CoreError::DuplicateKey {
                    key: key.to_string(),
                });
            }
        }
    }
}
