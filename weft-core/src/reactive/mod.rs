//! The reactivity engine.
//!
//! State lives in reactive containers ([`ReactiveObject`],
//! [`ReactiveArray`]) and cells ([`RefValue`]). Reads performed while a
//! [`Watcher`] evaluates register dependency edges through per-location
//! [`Dep`] hubs; writes notify those hubs, and notified watchers either
//! run inline (sync), mark themselves dirty (lazy), or batch through the
//! [scheduler].
//!
//! [`Dep`]: dep::Dep

pub mod context;
pub mod dep;
pub mod observer;
pub mod scheduler;
pub mod traverse;
pub mod value;
pub mod watcher;

pub use context::TrackGuard;
pub use dep::{Dep, DepTarget};
pub use observer::{
    del_prop, depend_array, observe, observe_with, set_prop, Observer, PropKey, ReactiveArray,
    ReactiveObject,
};
pub use scheduler::{flush_scheduler_queue, queue_activated, queue_watcher, MAX_UPDATE_COUNT};
pub use traverse::traverse;
pub use value::{has_changed, RefValue, Value};
pub use watcher::{Getter, Hook, WatchCallback, Watcher, WatcherOptions};

pub use crate::task::next_tick;
