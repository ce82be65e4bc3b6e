//! Virtual tree representation and reconciliation.
//!
//! [`VNode`] trees are produced by render functions; [`Patcher`] diffs the
//! previous tree against the next one and drives a [`Backend`] with the
//! minimal node operations. Per-aspect concerns (attributes, classes,
//! listeners) plug in as [`PatchModule`]s.

pub mod backend;
pub mod memory;
pub mod patch;
pub mod vnode;

pub use backend::{AttrsModule, Backend, NodeRef, PatchModule, RemoveHandle};
pub use memory::{MemoryBackend, OpCounters};
pub use patch::Patcher;
pub use vnode::{same_vnode, ComponentHooks, EventHandler, Key, VNode, VNodeData};
