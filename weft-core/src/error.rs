//! Error taxonomy and the diagnostic channel.
//!
//! The core distinguishes four kinds of failure:
//!
//! 1. Render/computation errors: a render function or framework getter
//!    failed. Not recoverable locally; the render pass is abandoned and the
//!    previous tree is reused.
//!
//! 2. User callback errors: a user-registered watch callback or lifecycle
//!    hook misbehaved. Always caught and reported; the surrounding flush
//!    continues.
//!
//! 3. Scheduler runaway: a watcher keeps re-triggering itself within one
//!    flush. Reported once, then the watcher is suppressed for the rest of
//!    the flush.
//!
//! 4. Structural diagnostics: duplicate sibling keys, writes to skipped or
//!    missing targets, hydration mismatches. Non-fatal; the operation
//!    becomes a no-op or proceeds best-effort.
//!
//! Everything is routed through [`report`], which logs via `tracing` and
//! forwards to an optionally installed handler. The handler is the
//! error-boundary integration point for a surrounding component framework.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use thiserror::Error;

/// Errors and diagnostics produced by the reactivity and patch engines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A render function returned an error. The previous tree is reused.
    #[error("render function failed: {0}")]
    Render(String),

    /// A watcher getter failed.
    #[error("getter for watcher \"{expression}\" failed: {message}")]
    Getter { expression: String, message: String },

    /// A user-supplied callback panicked or reported an error.
    #[error("error in {context}: {message}")]
    UserCallback { context: String, message: String },

    /// A watcher re-triggered itself more than the allowed number of times
    /// within a single flush.
    #[error("infinite update loop in watcher \"{expression}\" (id {id}): more than {limit} re-entries in one flush")]
    InfiniteUpdateLoop {
        id: u64,
        expression: String,
        limit: u32,
    },

    /// Two siblings in one child list share a key. Which element a later
    /// move or patch targets is undefined.
    #[error("duplicate key {key:?} detected in child list; updates targeting it are ambiguous")]
    DuplicateKey { key: String },

    /// A watch path string was not a dot-delimited identifier path.
    #[error("invalid watch path \"{0}\": only dot-delimited identifier paths are supported")]
    InvalidPath(String),

    /// `set_prop`/`del_prop` was aimed at a value that is not a container.
    #[error("cannot {op} a reactive property on a non-container value")]
    InvalidTarget { op: &'static str },

    /// A write targeted a skipped (raw) or sealed container.
    #[error("{op} on a skipped or sealed container is a no-op")]
    RawTarget { op: &'static str },

    /// A write targeted a property the container did not have at wrap time.
    /// Plain `set` cannot make it reactive; `set_prop` must be used.
    #[error("property \"{key}\" does not exist on the target; use set_prop to add it reactively")]
    UnknownProperty { key: String },

    /// The existing backend tree did not match the virtual tree during
    /// hydration; the caller falls back to a full client render.
    #[error("hydration mismatch at <{tag}>: bailing to full render")]
    HydrationMismatch { tag: String },
}

type Handler = dyn Fn(&CoreError) + Send + Sync;

static HANDLER: OnceLock<RwLock<Option<Arc<Handler>>>> = OnceLock::new();

fn handler_slot() -> &'static RwLock<Option<Arc<Handler>>> {
    HANDLER.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide error handler.
///
/// The handler sees every reported error after it has been logged. A
/// component framework can use this as its error-boundary channel.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&CoreError) + Send + Sync + 'static,
{
    *handler_slot().write() = Some(Arc::new(handler));
}

/// Remove the installed error handler, if any.
pub fn clear_error_handler() {
    *handler_slot().write() = None;
}

/// Report an error on the diagnostic channel.
///
/// Render errors are logged at `error` level, everything else at `warn`.
/// The tree is kept consistent by the callers; nothing here unwinds.
pub fn report(err: &CoreError) {
    match err {
        CoreError::Render(_) | CoreError::Getter { .. } => {
            tracing::error!(target: "weft_core", error = %err, "core error");
        }
        _ => {
            tracing::warn!(target: "weft_core", error = %err, "core diagnostic");
        }
    }
    let handler = handler_slot().read().clone();
    if let Some(handler) = handler {
        handler(err);
    }
}
