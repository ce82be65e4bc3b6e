//! In-memory render backend.
//!
//! A plain node arena with parent/child links, used by headless hosts,
//! tests, and benches. Every structural operation is counted so tests can
//! assert diff minimality: a keyed rotation should move nodes, not
//! recreate them.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::backend::{Backend, NodeRef};

#[derive(Debug)]
enum NodeKind {
    Element {
        tag: String,
        ns: Option<String>,
        attrs: IndexMap<String, String>,
        style_scope: Option<String>,
        text: Option<String>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct MemNode {
    kind: NodeKind,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

/// Structural operation counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OpCounters {
    pub creates: usize,
    pub removes: usize,
    /// Re-insertions of nodes that were already attached somewhere.
    pub moves: usize,
}

/// An instrumented in-memory tree.
pub struct MemoryBackend {
    nodes: HashMap<u64, MemNode>,
    next_id: u64,
    root: NodeRef,
    counters: OpCounters,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut backend = Self {
            nodes: HashMap::new(),
            next_id: 0,
            root: NodeRef(0),
            counters: OpCounters::default(),
        };
        let root = backend.alloc(NodeKind::Element {
            tag: "#root".to_string(),
            ns: None,
            attrs: IndexMap::new(),
            style_scope: None,
            text: None,
        });
        backend.root = root;
        backend.counters = OpCounters::default();
        backend
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeRef {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            MemNode {
                kind,
                parent: None,
                children: Vec::new(),
            },
        );
        self.counters.creates += 1;
        NodeRef(id)
    }

    fn detach(&mut self, node: NodeRef) {
        let parent = self.nodes.get(&node.0).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent.0) {
                p.children.retain(|c| *c != node);
            }
            if let Some(n) = self.nodes.get_mut(&node.0) {
                n.parent = None;
            }
        }
    }

    fn attach(&mut self, parent: NodeRef, node: NodeRef, index: Option<usize>) {
        let was_attached = self
            .nodes
            .get(&node.0)
            .is_some_and(|n| n.parent.is_some());
        if was_attached {
            self.counters.moves += 1;
        }
        self.detach(node);
        if let Some(p) = self.nodes.get_mut(&parent.0) {
            match index {
                Some(i) if i <= p.children.len() => p.children.insert(i, node),
                _ => p.children.push(node),
            }
        }
        if let Some(n) = self.nodes.get_mut(&node.0) {
            n.parent = Some(parent);
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn counters(&self) -> OpCounters {
        self.counters.clone()
    }

    pub fn reset_counters(&mut self) {
        self.counters = OpCounters::default();
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        match self.nodes.get(&node.0)?.kind {
            NodeKind::Element { ref attrs, .. } => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Tags of an element's children, text nodes rendered as `#text`.
    pub fn child_tags(&self, parent: NodeRef) -> Vec<String> {
        self.children(parent)
            .into_iter()
            .map(|c| match &self.nodes[&c.0].kind {
                NodeKind::Element { tag, .. } => tag.clone(),
                NodeKind::Text(_) => "#text".to_string(),
                NodeKind::Comment(_) => "#comment".to_string(),
            })
            .collect()
    }

    /// HTML-ish serialization, for test assertions.
    pub fn render_to_string(&self, node: NodeRef) -> String {
        let Some(mem) = self.nodes.get(&node.0) else {
            return String::new();
        };
        match &mem.kind {
            NodeKind::Text(text) => text.clone(),
            NodeKind::Comment(text) => format!("<!--{text}-->"),
            NodeKind::Element {
                tag,
                attrs,
                text,
                ..
            } => {
                let mut out = format!("<{tag}");
                for (name, value) in attrs {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                out.push('>');
                if let Some(text) = text {
                    out.push_str(text);
                }
                for child in &mem.children {
                    out.push_str(&self.render_to_string(*child));
                }
                out.push_str(&format!("</{tag}>"));
                out
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn create_element(&mut self, tag: &str, ns: Option<&str>) -> NodeRef {
        self.alloc(NodeKind::Element {
            tag: tag.to_string(),
            ns: ns.map(str::to_string),
            attrs: IndexMap::new(),
            style_scope: None,
            text: None,
        })
    }

    fn create_text(&mut self, text: &str) -> NodeRef {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    fn create_comment(&mut self, text: &str) -> NodeRef {
        self.alloc(NodeKind::Comment(text.to_string()))
    }

    fn insert_before(&mut self, parent: NodeRef, node: NodeRef, reference: Option<NodeRef>) {
        let index = reference.and_then(|r| {
            self.nodes
                .get(&parent.0)
                .and_then(|p| p.children.iter().position(|c| *c == r))
        });
        self.attach(parent, node, index);
    }

    fn append_child(&mut self, parent: NodeRef, child: NodeRef) {
        self.attach(parent, child, None);
    }

    fn remove_child(&mut self, parent: NodeRef, child: NodeRef) {
        if let Some(p) = self.nodes.get_mut(&parent.0) {
            p.children.retain(|c| *c != child);
        }
        if let Some(n) = self.nodes.get_mut(&child.0) {
            n.parent = None;
        }
        self.counters.removes += 1;
    }

    fn parent_node(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(&node.0).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent_node(node)?;
        let siblings = &self.nodes.get(&parent.0)?.children;
        let pos = siblings.iter().position(|c| *c == node)?;
        siblings.get(pos + 1).copied()
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes
            .get(&node.0)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn tag_name(&self, node: NodeRef) -> Option<String> {
        match &self.nodes.get(&node.0)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    fn is_element(&self, node: NodeRef) -> bool {
        matches!(
            self.nodes.get(&node.0).map(|n| &n.kind),
            Some(NodeKind::Element { .. })
        )
    }

    fn is_text(&self, node: NodeRef) -> bool {
        matches!(
            self.nodes.get(&node.0).map(|n| &n.kind),
            Some(NodeKind::Text(_))
        )
    }

    fn is_comment(&self, node: NodeRef) -> bool {
        matches!(
            self.nodes.get(&node.0).map(|n| &n.kind),
            Some(NodeKind::Comment(_))
        )
    }

    fn node_text(&self, node: NodeRef) -> Option<String> {
        match &self.nodes.get(&node.0)?.kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text.clone()),
            NodeKind::Element { text, .. } => text.clone(),
        }
    }

    fn set_text_content(&mut self, node: NodeRef, text: &str) {
        // Setting text content drops any existing children, like the DOM.
        let children = self.children(node);
        for child in children {
            if let Some(n) = self.nodes.get_mut(&node.0) {
                n.children.retain(|c| *c != child);
            }
            if let Some(c) = self.nodes.get_mut(&child.0) {
                c.parent = None;
            }
        }
        match self.nodes.get_mut(&node.0).map(|n| &mut n.kind) {
            Some(NodeKind::Text(t)) | Some(NodeKind::Comment(t)) => *t = text.to_string(),
            Some(NodeKind::Element { text: t, .. }) => {
                *t = if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                }
            }
            None => {}
        }
    }

    fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str) {
        if let Some(NodeKind::Element { attrs, .. }) =
            self.nodes.get_mut(&node.0).map(|n| &mut n.kind)
        {
            attrs.insert(name.to_string(), value.to_string());
        }
    }

    fn remove_attribute(&mut self, node: NodeRef, name: &str) {
        if let Some(NodeKind::Element { attrs, .. }) =
            self.nodes.get_mut(&node.0).map(|n| &mut n.kind)
        {
            attrs.shift_remove(name);
        }
    }

    fn set_style_scope(&mut self, node: NodeRef, scope: &str) {
        if let Some(NodeKind::Element { style_scope, .. }) =
            self.nodes.get_mut(&node.0).map(|n| &mut n.kind)
        {
            *style_scope = Some(scope.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_positions_and_counts_moves() {
        let mut b = MemoryBackend::new();
        let root = b.root();
        let a = b.create_element("a", None);
        let c = b.create_element("c", None);
        b.append_child(root, a);
        b.append_child(root, c);

        let mid = b.create_element("b", None);
        b.insert_before(root, mid, Some(c));
        assert_eq!(b.child_tags(root), vec!["a", "b", "c"]);
        assert_eq!(b.counters().moves, 0); // fresh nodes are not moves

        b.insert_before(root, c, Some(a));
        assert_eq!(b.child_tags(root), vec!["c", "a", "b"]);
        assert_eq!(b.counters().moves, 1);
    }

    #[test]
    fn remove_child_detaches_and_counts() {
        let mut b = MemoryBackend::new();
        let root = b.root();
        let a = b.create_element("a", None);
        b.append_child(root, a);
        b.remove_child(root, a);
        assert!(b.child_tags(root).is_empty());
        assert_eq!(b.parent_node(a), None);
        assert_eq!(b.counters().removes, 1);
    }

    #[test]
    fn render_to_string_serializes_the_tree() {
        let mut b = MemoryBackend::new();
        let root = b.root();
        let div = b.create_element("div", None);
        b.set_attribute(div, "id", "app");
        let text = b.create_text("hi");
        b.append_child(div, text);
        b.append_child(root, div);
        assert_eq!(b.render_to_string(div), "<div id=\"app\">hi</div>");
    }
}
