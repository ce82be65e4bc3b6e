//! Process-wide configuration flags.

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether updates are batched asynchronously through the tick queue.
///
/// When disabled, watchers run synchronously as soon as they are notified
/// (subscriber lists are then sorted at notification time to preserve the
/// id ordering the scheduler would otherwise provide). Intended for tests
/// and server-side hosts that have no tick boundary.
static ASYNC: AtomicBool = AtomicBool::new(true);

pub fn set_async(value: bool) {
    ASYNC.store(value, Ordering::SeqCst);
}

pub fn is_async() -> bool {
    ASYNC.load(Ordering::SeqCst)
}
