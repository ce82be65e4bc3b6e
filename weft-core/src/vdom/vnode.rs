//! Virtual nodes.
//!
//! A [`VNode`] describes one node of the desired tree: an element (has a
//! `tag`), a text node (`text` only), or a comment placeholder. Once
//! rendered it carries the backend handle (`elm`) of the concrete node it
//! corresponds to.
//!
//! Diff identity is [`same_vnode`]: two vnodes describe "the same node"
//! when their keys and tags agree, both are (or are not) comments, both do
//! (or do not) carry data, and, for `<input>`, their types are
//! compatible. Same key with a different tag is a full replacement.

use std::sync::Arc;

use indexmap::IndexMap;

use super::backend::NodeRef;
use super::patch::Patcher;

/// Sibling identity for keyed diffing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Str(String),
    Num(i64),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Num(n)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Num(n) => write!(f, "{n}"),
        }
    }
}

pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Component integration points carried on a vnode.
///
/// `init` renders and mounts the component's own subtree (in memory) and
/// sets the vnode's `elm`; `insert` fires once that subtree is actually
/// attached at the top level, possibly much later than `init` when the
/// component sits inside a parent that is itself still being created.
/// `pending_insert` hands the component's internally collected insert
/// queue to the enclosing patch so the deferral crosses the boundary.
pub trait ComponentHooks: Send + Sync {
    fn init(&self, vnode: &mut VNode, patcher: &Patcher);
    fn prepatch(&self, old: &mut VNode, new: &mut VNode);
    fn postpatch(&self, old: &VNode, new: &VNode);
    fn insert(&self, vnode: &VNode);
    fn destroy(&self, vnode: &VNode);
    fn pending_insert(&self) -> Vec<VNode>;
}

/// Per-node render data: attributes, class/style, listeners, scoping, and
/// the component hook bundle.
#[derive(Clone, Default)]
pub struct VNodeData {
    pub attrs: IndexMap<String, String>,
    pub class: Option<String>,
    pub style: IndexMap<String, String>,
    pub on: IndexMap<String, EventHandler>,
    pub style_scope: Option<String>,
    pub hook: Option<Arc<dyn ComponentHooks>>,
}

impl VNodeData {
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

impl std::fmt::Debug for VNodeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VNodeData")
            .field("attrs", &self.attrs)
            .field("class", &self.class)
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

/// One node of the virtual tree.
#[derive(Clone, Default)]
pub struct VNode {
    pub tag: Option<String>,
    pub data: Option<VNodeData>,
    pub children: Vec<VNode>,
    pub text: Option<String>,
    pub key: Option<Key>,
    pub ns: Option<String>,
    /// Backend handle once rendered.
    pub elm: Option<NodeRef>,
    pub is_comment: bool,
    /// Static subtree: never changes between renders; eligible for reuse.
    pub is_static: bool,
    /// Produced by [`VNode::clone_node`] rather than a fresh render.
    pub is_cloned: bool,
    /// Render-once subtree; treated like static after the first render.
    pub is_once: bool,
}

impl VNode {
    pub fn element(tag: impl Into<String>, data: VNodeData, children: Vec<VNode>) -> Self {
        VNode {
            tag: Some(tag.into()),
            data: Some(data),
            children,
            ..Default::default()
        }
    }

    pub fn text_node(text: impl Into<String>) -> Self {
        VNode {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        VNode {
            text: Some(text.into()),
            is_comment: true,
            ..Default::default()
        }
    }

    /// The placeholder produced for failed renders and empty slots.
    pub fn empty() -> Self {
        Self::comment("")
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    pub fn mark_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Clone for static-subtree reuse across renders. The clone keeps the
    /// rendered `elm` and is flagged so the patcher knows it may skip it.
    pub fn clone_node(&self) -> VNode {
        let mut cloned = self.clone();
        cloned.is_cloned = true;
        cloned
    }

    pub fn hook(&self) -> Option<Arc<dyn ComponentHooks>> {
        self.data.as_ref().and_then(|d| d.hook.clone())
    }

    fn input_type(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.attrs.get("type"))
            .map(String::as_str)
    }
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VNode")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .field("text", &self.text)
            .field("children", &self.children.len())
            .field("elm", &self.elm)
            .finish()
    }
}

/// Whether two vnodes describe the same node for diffing purposes.
pub fn same_vnode(a: &VNode, b: &VNode) -> bool {
    a.key == b.key
        && a.tag == b.tag
        && a.is_comment == b.is_comment
        && a.data.is_some() == b.data.is_some()
        && same_input_type(a, b)
}

// Browsers do not allow every input type change in place; types within the
// text-editing family are mutually patchable, everything else must match
// exactly.
fn same_input_type(a: &VNode, b: &VNode) -> bool {
    if a.tag.as_deref() != Some("input") {
        return true;
    }
    let type_a = a.input_type();
    let type_b = b.input_type();
    type_a == type_b || (is_text_input_type(type_a) && is_text_input_type(type_b))
}

fn is_text_input_type(t: Option<&str>) -> bool {
    matches!(
        t,
        Some("text" | "number" | "password" | "search" | "email" | "tel" | "url")
    )
}
