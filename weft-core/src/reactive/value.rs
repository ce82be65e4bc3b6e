//! The dynamic value model.
//!
//! Property interception cannot be bolted onto arbitrary structs, so the
//! reactive layer works over an explicit value tree: scalars are stored by
//! value, containers ([`ReactiveObject`], [`ReactiveArray`]) are shared
//! handles whose reads and writes go through tracking accessors, and
//! [`RefValue`] is a standalone reactive cell that containers unwrap
//! transparently.
//!
//! Change detection uses [`has_changed`], which treats `NaN == NaN` as
//! equal and compares containers by identity. Containers that compare
//! equal by identity may still have mutated internally, which is why
//! watchers fire unconditionally for reference-typed values.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::Dep;
use super::observer::{ReactiveArray, ReactiveObject};

/// A dynamic value: scalar, reactive cell, or container handle.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(Arc<str>),
    Ref(RefValue),
    Object(ReactiveObject),
    Array(ReactiveArray),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Containers: values that can be observed.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    /// Reference types: identity comparison cannot see internal mutation.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_) | Value::Ref(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Value equality with the reactive system's comparison rules:
    /// scalars by value with `NaN == NaN`, containers and refs by identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Whether a write from `old` to `new` is an actual change.
pub fn has_changed(old: &Value, new: &Value) -> bool {
    !old.same(new)
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Num(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Num(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Num(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<ReactiveObject> for Value {
    fn from(v: ReactiveObject) -> Self {
        Value::Object(v)
    }
}

impl From<ReactiveArray> for Value {
    fn from(v: ReactiveArray) -> Self {
        Value::Array(v)
    }
}

impl From<RefValue> for Value {
    fn from(v: RefValue) -> Self {
        Value::Ref(v)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Num(n) => write!(f, "Num({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Ref(r) => write!(f, "Ref({:?})", r.get_untracked()),
            Value::Object(o) => write!(f, "Object(#{})", o.dep_id()),
            Value::Array(a) => write!(f, "Array(#{})", a.dep_id()),
        }
    }
}

/// A standalone reactive cell.
///
/// Refs are never wrapped as containers; object accessors unwrap them
/// transparently so a ref-valued property reads and writes like a scalar.
#[derive(Clone)]
pub struct RefValue {
    inner: Arc<RefInner>,
}

struct RefInner {
    dep: Arc<Dep>,
    value: RwLock<Value>,
}

impl RefValue {
    pub fn new(value: Value) -> Self {
        Self {
            inner: Arc::new(RefInner {
                dep: Dep::new(),
                value: RwLock::new(value),
            }),
        }
    }

    /// Tracked read.
    pub fn get(&self) -> Value {
        self.inner.dep.depend();
        self.inner.value.read().clone()
    }

    pub fn get_untracked(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Write; notifies subscribers when the value actually changed.
    pub fn set(&self, value: Value) {
        {
            let old = self.inner.value.read();
            if !has_changed(&old, &value) {
                return;
            }
        }
        *self.inner.value.write() = value;
        self.inner.dep.notify();
    }

    pub fn dep(&self) -> &Arc<Dep> {
        &self.inner.dep
    }

    pub fn ptr_eq(&self, other: &RefValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_compares_equal_to_nan() {
        let a = Value::Num(f64::NAN);
        let b = Value::Num(f64::NAN);
        assert!(!has_changed(&a, &b));
        assert!(has_changed(&a, &Value::Num(0.0)));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = ReactiveObject::new();
        let b = a.clone();
        assert!(!has_changed(&Value::Object(a.clone()), &Value::Object(b)));
        assert!(has_changed(
            &Value::Object(a),
            &Value::Object(ReactiveObject::new())
        ));
    }

    #[test]
    fn ref_set_is_noop_on_equal_value() {
        let r = RefValue::new(Value::from(1));
        let dep_subs_before = r.dep().sub_count();
        r.set(Value::from(1));
        assert_eq!(r.dep().sub_count(), dep_subs_before);
        assert_eq!(r.get_untracked().as_f64(), Some(1.0));
        r.set(Value::from(2));
        assert_eq!(r.get_untracked().as_f64(), Some(2.0));
    }
}
