//! Deep dependency collection.
//!
//! A deep watcher has to re-fire when anything inside its value changes,
//! not just the top-level bindings its getter touched. [`traverse`] walks
//! the whole value tree with *tracked* reads while the watcher is still
//! the active target, so every nested field dep and container dep gets an
//! edge to it.
//!
//! Cycles are broken with a seen-set of container ids: once a container's
//! dep has been collected there is nothing more a second visit could add.

use std::collections::HashSet;

use super::value::Value;

/// Recursively touch every reachable value so the active watcher picks up
/// all nested dependencies.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<u64>) {
    match value {
        Value::Object(obj) => {
            if let Some(ob) = obj.observer() {
                if !seen.insert(ob.dep().id()) {
                    return;
                }
            }
            for key in obj.keys() {
                let child = obj.get(&key);
                traverse_inner(&child, seen);
            }
        }
        Value::Array(arr) => {
            if let Some(ob) = arr.observer() {
                if !seen.insert(ob.dep().id()) {
                    return;
                }
            }
            for child in arr.snapshot() {
                traverse_inner(&child, seen);
            }
        }
        Value::Ref(r) => {
            let inner = r.get();
            traverse_inner(&inner, seen);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::observer::{observe, ReactiveArray, ReactiveObject};

    #[test]
    fn traverse_handles_cycles() {
        let a = ReactiveObject::new();
        let b = ReactiveObject::new();
        a.insert("other", Value::Object(b.clone()));
        b.insert("other", Value::Object(a.clone()));
        observe(&Value::Object(a.clone()));
        // Must terminate.
        traverse(&Value::Object(a));
    }

    #[test]
    fn traverse_descends_through_arrays_and_refs() {
        use crate::reactive::value::RefValue;
        let leaf = ReactiveObject::from_iter([("x", 1)]);
        let arr = ReactiveArray::from_iter([Value::Object(leaf.clone())]);
        let root = ReactiveObject::from_iter([(
            "items",
            Value::Ref(RefValue::new(Value::Array(arr))),
        )]);
        observe(&Value::Object(root.clone()));
        traverse(&Value::Object(root));
        assert!(leaf.observer().is_some());
    }
}
