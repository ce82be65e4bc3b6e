//! Weft Core
//!
//! This crate provides the core runtime for the Weft component framework.
//! It implements:
//!
//! - Reactive state containers with automatic dependency tracking
//! - Watchers, computed values, and a batching scheduler
//! - A keyed virtual-tree reconciler over pluggable render backends
//! - Component mounting and lifecycle orchestration
//!
//! The crate is backend-agnostic: rendering goes through the
//! [`vdom::Backend`] trait, and an in-memory backend is included for
//! headless hosts and tests.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: value model, observers, deps, watchers, and the scheduler
//! - `task`: the deferred-callback queue that defines the tick boundary
//! - `vdom`: virtual nodes, the patch algorithm, and render backends
//! - `component`: component descriptors, mounting, and lifecycle hooks
//! - `error`: the error taxonomy and diagnostic channel
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::reactive::{observe, ReactiveObject, Value, Watcher, WatcherOptions};
//! use std::sync::Arc;
//!
//! // Create reactive state
//! let state = ReactiveObject::from_iter([("count", 0)]);
//! observe(&Value::Object(state.clone()));
//!
//! // Watch a binding
//! let getter_state = state.clone();
//! let watcher = Watcher::new(
//!     Arc::new(move || Ok(getter_state.get("count"))),
//!     Some(Arc::new(|new, old| {
//!         println!("count: {:?} -> {:?}", old, new);
//!     })),
//!     WatcherOptions::default(),
//! );
//!
//! // Mutate; the watcher runs on the next tick
//! state.set("count", 5);
//! weft_core::task::flush_tick();
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod reactive;
pub mod task;
pub mod vdom;

pub use component::{Component, ComponentDescriptor, LifecycleHooks};
pub use error::{clear_error_handler, set_error_handler, CoreError};
pub use reactive::{
    del_prop, next_tick, observe, set_prop, ReactiveArray, ReactiveObject, RefValue, Value,
    Watcher, WatcherOptions,
};
pub use vdom::{Backend, MemoryBackend, Patcher, VNode};

#[cfg(test)]
pub(crate) mod test_util {
    use parking_lot::{Mutex, MutexGuard};

    /// Serializes tests that touch process-global queues (tick queue,
    /// scheduler state).
    pub fn serial() -> MutexGuard<'static, ()> {
        static GUARD: Mutex<()> = Mutex::new(());
        GUARD.lock()
    }
}
