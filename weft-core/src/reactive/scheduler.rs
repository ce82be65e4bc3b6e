//! The watcher scheduler.
//!
//! Async watchers do not run at notify time; they are queued, deduplicated
//! by id, and flushed in one batch at the next tick. Running in ascending
//! id order guarantees parents before children (a parent is always created
//! first) and user watchers before the render watcher of the same
//! component (user watchers are created earlier in setup).
//!
//! A watcher that keeps re-queuing itself during its own flush is a
//! feedback loop (its callback mutates its own source). After
//! [`MAX_UPDATE_COUNT`] re-entries the loop is reported once and the
//! watcher is suppressed for the remainder of the flush, so one bad
//! binding cannot wedge the whole batch.
//!
//! When [`config::set_async(false)`](crate::config::set_async) is in
//! effect the queue flushes synchronously on first enqueue instead of
//! waiting for a tick; test suites use this for deterministic assertions.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::watcher::{Hook, Watcher};
use crate::config;
use crate::error::{self, CoreError};
use crate::task;

/// Re-entry ceiling per watcher per flush.
pub const MAX_UPDATE_COUNT: u32 = 100;

struct SchedulerState {
    queue: Vec<Watcher>,
    has: HashSet<u64>,
    circular: HashMap<u64, u32>,
    runaway: HashSet<u64>,
    activated: Vec<Hook>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

static STATE: OnceLock<Mutex<SchedulerState>> = OnceLock::new();

fn state() -> &'static Mutex<SchedulerState> {
    STATE.get_or_init(|| {
        Mutex::new(SchedulerState {
            queue: Vec::new(),
            has: HashSet::new(),
            circular: HashMap::new(),
            runaway: HashSet::new(),
            activated: Vec::new(),
            waiting: false,
            flushing: false,
            index: 0,
        })
    })
}

/// Enqueue a watcher for the next flush.
///
/// Duplicates of an already-queued watcher are dropped. Outside a flush
/// the watcher is appended (the whole queue is sorted once at flush
/// start); during a flush it is spliced in at its id position after the
/// cursor, so it still runs in this flush, in order.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let should_flush = {
        let mut st = state().lock();
        if st.has.contains(&id) || st.runaway.contains(&id) {
            return;
        }
        st.has.insert(id);
        if !st.flushing {
            st.queue.push(watcher);
        } else {
            let mut pos = st.queue.len();
            while pos > st.index + 1 && st.queue[pos - 1].id() > id {
                pos -= 1;
            }
            st.queue.insert(pos, watcher);
        }
        if !st.waiting {
            st.waiting = true;
            true
        } else {
            false
        }
    };
    if should_flush {
        if config::is_async() {
            task::next_tick(flush_scheduler_queue);
        } else {
            flush_scheduler_queue();
        }
    }
}

/// Register a hook to run after the current flush completes, before
/// updated hooks. Used for reactivation of kept-alive subtrees.
pub fn queue_activated(hook: Hook) {
    state().lock().activated.push(hook);
}

/// Drain the queue: run every queued watcher in id order, then the
/// activated hooks in queue order, then updated hooks child-first.
pub fn flush_scheduler_queue() {
    {
        let mut st = state().lock();
        if st.flushing {
            return;
        }
        st.flushing = true;
        st.queue.sort_by_key(Watcher::id);
        st.index = 0;
    }

    let mut index = 0;
    loop {
        let watcher = {
            let mut st = state().lock();
            if index >= st.queue.len() {
                break;
            }
            st.index = index;
            let watcher = st.queue[index].clone();
            st.has.remove(&watcher.id());
            watcher
        };

        // The lock is not held across the run: watchers re-read reactive
        // state and may enqueue more work.
        watcher.call_before();
        watcher.run();

        {
            let mut st = state().lock();
            let id = watcher.id();
            if st.has.contains(&id) {
                let count = st.circular.entry(id).or_insert(0);
                *count += 1;
                if *count > MAX_UPDATE_COUNT {
                    error::report(&CoreError::InfiniteUpdateLoop {
                        id,
                        expression: watcher.expression().to_string(),
                        limit: MAX_UPDATE_COUNT,
                    });
                    st.runaway.insert(id);
                    st.has.remove(&id);
                    if let Some(pos) = st.queue[index + 1..]
                        .iter()
                        .position(|queued| queued.id() == id)
                    {
                        st.queue.remove(index + 1 + pos);
                    }
                }
            }
        }
        index += 1;
    }

    let (flushed, activated) = {
        let mut st = state().lock();
        let flushed = std::mem::take(&mut st.queue);
        let activated = std::mem::take(&mut st.activated);
        st.has.clear();
        st.circular.clear();
        st.runaway.clear();
        st.waiting = false;
        st.flushing = false;
        st.index = 0;
        (flushed, activated)
    };

    for hook in activated {
        hook();
    }
    // Child-first: a child's id is larger than its parent's, so reverse
    // queue order surfaces leaf updates before ancestors.
    for watcher in flushed.iter().rev() {
        if watcher.is_active() {
            watcher.call_updated();
        }
    }
}

/// Queued-but-not-yet-flushed watcher count. Test and debug helper.
pub fn pending_count() -> usize {
    state().lock().queue.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::{observe, ReactiveObject};
    use crate::reactive::value::Value;
    use crate::reactive::watcher::WatcherOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::test_util::serial as lock;

    fn state_obj(pairs: &[(&str, i64)]) -> ReactiveObject {
        let obj = ReactiveObject::from_iter(pairs.iter().map(|(k, v)| (*k, *v)));
        observe(&Value::Object(obj.clone()));
        obj
    }

    fn counting_watcher(obj: &ReactiveObject, key: &'static str, runs: Arc<AtomicUsize>) -> Watcher {
        let getter_obj = obj.clone();
        Watcher::new(
            Arc::new(move || Ok(getter_obj.get(key))),
            Some(Arc::new(move |_, _| {
                runs.fetch_add(1, Ordering::SeqCst);
            })),
            WatcherOptions::default(),
        )
    }

    #[test]
    fn multiple_writes_coalesce_into_one_run() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("a", 0), ("b", 0)]);
        let runs = Arc::new(AtomicUsize::new(0));

        let runs_clone = runs.clone();
        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || {
                let a = getter_obj.get("a").as_f64().unwrap_or(0.0);
                let b = getter_obj.get("b").as_f64().unwrap_or(0.0);
                Ok(Value::from(a + b))
            }),
            Some(Arc::new(move |_, _| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            })),
            WatcherOptions::default(),
        );

        obj.set("a", 1);
        obj.set("b", 2);
        obj.set("a", 3);
        assert_eq!(runs.load(Ordering::SeqCst), 0); // nothing until the tick

        task::flush_tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watchers_flush_in_creation_order() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("x", 0)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut watchers = Vec::new();
        for tag in 0..3 {
            let order = order.clone();
            let getter_obj = obj.clone();
            watchers.push(Watcher::new(
                Arc::new(move || Ok(getter_obj.get("x"))),
                Some(Arc::new(move |_, _| order.lock().push(tag))),
                WatcherOptions::default(),
            ));
        }

        obj.set("x", 1);
        task::flush_tick();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn enqueue_order_does_not_override_id_order() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("a", 0), ("b", 0)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_first = order.clone();
        let getter_obj = obj.clone();
        let _first = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("a"))),
            Some(Arc::new(move |_, _| order_first.lock().push("first"))),
            WatcherOptions::default(),
        );
        let order_second = order.clone();
        let getter_obj = obj.clone();
        let _second = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("b"))),
            Some(Arc::new(move |_, _| order_second.lock().push("second"))),
            WatcherOptions::default(),
        );

        // The later-created watcher is notified (and queued) first; the
        // flush must still run ascending by id.
        obj.set("b", 1);
        obj.set("a", 1);
        task::flush_tick();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn midflush_enqueue_of_an_earlier_watcher_runs_in_the_same_flush() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("a", 0), ("b", 0)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_early = order.clone();
        let getter_obj = obj.clone();
        let _early = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("a"))),
            Some(Arc::new(move |_, _| order_early.lock().push("early"))),
            WatcherOptions::default(),
        );
        let order_late = order.clone();
        let cb_obj = obj.clone();
        let getter_obj = obj.clone();
        let _late = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("b"))),
            Some(Arc::new(move |_, _| {
                order_late.lock().push("late");
                // Queues the lower-id watcher while the flush is running.
                cb_obj.set("a", 1);
            })),
            WatcherOptions::default(),
        );

        obj.set("b", 1);
        task::flush_tick();
        // Spliced in right after the cursor, so it runs in this flush
        // rather than waiting for the next tick.
        assert_eq!(*order.lock(), vec!["late", "early"]);
        assert_eq!(pending_count(), 0);
    }

    #[test]
    fn feedback_loop_is_suppressed_and_flush_terminates() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("n", 0)]);
        let runs = Arc::new(AtomicUsize::new(0));

        let runs_clone = runs.clone();
        let cb_obj = obj.clone();
        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("n"))),
            Some(Arc::new(move |new, _| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                // Mutates its own source: a feedback loop.
                let n = new.as_f64().unwrap_or(0.0);
                cb_obj.set("n", n + 1.0);
            })),
            WatcherOptions {
                expression: "n".to_string(),
                ..Default::default()
            },
        );

        obj.set("n", 1);
        task::flush_tick(); // must terminate
        let total = runs.load(Ordering::SeqCst);
        assert!(total > MAX_UPDATE_COUNT as usize);
        assert!(total <= MAX_UPDATE_COUNT as usize + 2);
    }

    #[test]
    fn activated_hooks_run_after_the_flush() {
        let _g = lock();
        config::set_async(true);
        let obj = state_obj(&[("x", 0)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_w = order.clone();
        let getter_obj = obj.clone();
        let _watcher = Watcher::new(
            Arc::new(move || Ok(getter_obj.get("x"))),
            Some(Arc::new(move |_, _| order_w.lock().push("run"))),
            WatcherOptions::default(),
        );

        obj.set("x", 1);
        let order_a = order.clone();
        queue_activated(Arc::new(move || order_a.lock().push("activated")));
        task::flush_tick();
        assert_eq!(*order.lock(), vec!["run", "activated"]);
    }

    #[test]
    fn sync_mode_flushes_without_a_tick() {
        let _g = lock();
        config::set_async(false);
        let obj = state_obj(&[("x", 0)]);
        let runs = Arc::new(AtomicUsize::new(0));
        let _watcher = counting_watcher(&obj, "x", runs.clone());

        obj.set("x", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(pending_count(), 0);
        config::set_async(true);
    }
}
