//! Reactive containers and the observe entry point.
//!
//! A [`ReactiveObject`] wraps an insertion-ordered field map; a
//! [`ReactiveArray`] wraps a vector. Containers start *plain*: reads and
//! writes behave like ordinary storage. [`observe`] attaches an
//! [`Observer`] (one container-level [`Dep`] plus a root-binding count)
//! idempotently, recursing into nested containers, and from then on every
//! field read registers dependencies and every write notifies.
//!
//! Arrays are special-cased the same way the accessor model forces: the
//! structural mutators (`push`, `pop`, `shift`, `unshift`, `splice`,
//! `sort_by`, `reverse`) observe any inserted elements and notify the
//! container dep, while element replacement must go through
//! [`ReactiveArray::set_index`] (splice) because index assignment cannot
//! be intercepted. Reads of an array walk its elements to register on any
//! observed element containers ([`depend_array`]).
//!
//! Containers marked raw ("do not observe", for framework internals) and
//! sealed containers are never observed. Ref values are never treated as
//! containers; object accessors unwrap them transparently.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::context;
use super::dep::Dep;
use super::value::{has_changed, Value};
use crate::error::{self, CoreError};

static CONTAINER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_container_id() -> u64 {
    CONTAINER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Container-level observation state: one dep for structural changes
/// (property addition/removal, array mutation) plus a count of how many
/// root bindings use the container as their state object.
pub struct Observer {
    dep: Arc<Dep>,
    vm_count: AtomicUsize,
    shallow: bool,
}

impl Observer {
    fn new(shallow: bool) -> Arc<Self> {
        Arc::new(Self {
            dep: Dep::new(),
            vm_count: AtomicUsize::new(0),
            shallow,
        })
    }

    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    pub fn vm_count(&self) -> usize {
        self.vm_count.load(Ordering::SeqCst)
    }

    pub fn inc_vm_count(&self) {
        self.vm_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_vm_count(&self) {
        self.vm_count.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FieldCell {
    dep: Arc<Dep>,
    value: Value,
}

struct ObjectInner {
    container_id: u64,
    fields: RwLock<IndexMap<String, FieldCell>>,
    observer: OnceLock<Arc<Observer>>,
    raw: AtomicBool,
    sealed: AtomicBool,
}

/// A reactive map from string keys to values.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Arc<ObjectInner>,
}

impl ReactiveObject {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                container_id: next_container_id(),
                fields: RwLock::new(IndexMap::new()),
                observer: OnceLock::new(),
                raw: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_iter<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut fields = obj.inner.fields.write();
            for (key, value) in pairs {
                fields.insert(
                    key.into(),
                    FieldCell {
                        dep: Dep::new(),
                        value: value.into(),
                    },
                );
            }
        }
        obj
    }

    /// Stable identity for debugging and cycle detection.
    pub fn dep_id(&self) -> u64 {
        self.inner.container_id
    }

    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mark the container "do not observe". Framework internals use this
    /// to keep bookkeeping structures out of the dependency graph.
    pub fn mark_raw(&self) {
        self.inner.raw.store(true, Ordering::SeqCst);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::SeqCst)
    }

    /// Seal the container: it can no longer be observed.
    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::SeqCst)
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.observer.get().cloned()
    }

    fn is_observed(&self) -> bool {
        self.inner.observer.get().is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    /// Tracked read.
    ///
    /// Registers the field dep with the active watcher; if the value is an
    /// observed container, also registers its container dep (structural
    /// changes to the nested value wake the reader too); arrays get their
    /// elements walked since index reads cannot be intercepted. Missing
    /// keys read as `Null`.
    pub fn get(&self, key: &str) -> Value {
        let (value, field_dep) = {
            let fields = self.inner.fields.read();
            match fields.get(key) {
                Some(cell) => (cell.value.clone(), Some(cell.dep.clone())),
                None => (Value::Null, None),
            }
        };
        let shallow = self
            .observer()
            .map(|ob| ob.is_shallow())
            .unwrap_or(false);
        if self.is_observed() && context::is_tracking() {
            if let Some(dep) = field_dep {
                dep.depend();
            }
            match &value {
                Value::Object(obj) => {
                    if let Some(ob) = obj.observer() {
                        ob.dep().depend();
                    }
                }
                Value::Array(arr) => {
                    if let Some(ob) = arr.observer() {
                        ob.dep().depend();
                    }
                    depend_array(arr);
                }
                _ => {}
            }
        }
        match value {
            Value::Ref(r) if !shallow => r.get(),
            other => other,
        }
    }

    /// Untracked read.
    pub fn get_untracked(&self, key: &str) -> Value {
        let value = self
            .inner
            .fields
            .read()
            .get(key)
            .map(|cell| cell.value.clone())
            .unwrap_or(Value::Null);
        match value {
            Value::Ref(r) => r.get_untracked(),
            other => other,
        }
    }

    /// Write to an existing field.
    ///
    /// No-op when the value is unchanged (`NaN` counts as equal to `NaN`).
    /// A ref-valued field assigned a non-ref writes through the ref.
    /// Writing a key the container did not have at wrap time cannot become
    /// reactive retroactively; it is reported and dropped. [`set_prop`]
    /// is the supported way to add properties.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let shallow = self
            .observer()
            .map(|ob| ob.is_shallow())
            .unwrap_or(false);
        enum Outcome {
            Missing,
            Unchanged,
            WriteThrough(super::value::RefValue),
            Stored(Arc<Dep>),
        }
        let outcome = {
            let mut fields = self.inner.fields.write();
            match fields.get_mut(key) {
                None => Outcome::Missing,
                Some(cell) => {
                    if !has_changed(&cell.value, &value) {
                        Outcome::Unchanged
                    } else if let (Value::Ref(r), false) =
                        (&cell.value, matches!(value, Value::Ref(_)))
                    {
                        if shallow {
                            cell.value = value.clone();
                            Outcome::Stored(cell.dep.clone())
                        } else {
                            Outcome::WriteThrough(r.clone())
                        }
                    } else {
                        cell.value = value.clone();
                        Outcome::Stored(cell.dep.clone())
                    }
                }
            }
        };
        match outcome {
            Outcome::Missing => {
                error::report(&CoreError::UnknownProperty {
                    key: key.to_string(),
                });
            }
            Outcome::Unchanged => {}
            Outcome::WriteThrough(r) => r.set(value),
            Outcome::Stored(dep) => {
                if self.is_observed() {
                    if !shallow {
                        observe(&value);
                    }
                    dep.notify();
                }
            }
        }
    }

    /// Builder-style insert for plain (not yet observed) containers; on an
    /// observed container this behaves like [`set_prop`].
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if self.contains_key(&key) {
            self.set(&key, value);
            return;
        }
        {
            let mut fields = self.inner.fields.write();
            fields.insert(
                key,
                FieldCell {
                    dep: Dep::new(),
                    value: value.clone(),
                },
            );
        }
        if let Some(ob) = self.observer() {
            if !ob.is_shallow() {
                observe(&value);
            }
            ob.dep().notify();
        }
    }

    fn remove(&self, key: &str) -> bool {
        let removed = self.inner.fields.write().shift_remove(key).is_some();
        if removed {
            if let Some(ob) = self.observer() {
                ob.dep().notify();
            }
        }
        removed
    }

    /// Dep backing one field; test and debug helper.
    pub fn field_dep(&self, key: &str) -> Option<Arc<Dep>> {
        self.inner.fields.read().get(key).map(|cell| cell.dep.clone())
    }

    fn observe_children(&self, shallow: bool) {
        if shallow {
            return;
        }
        let children: Vec<Value> = self
            .inner
            .fields
            .read()
            .values()
            .map(|cell| cell.value.clone())
            .collect();
        for child in &children {
            observe_unwrapping(child);
        }
    }
}

impl Default for ReactiveObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.container_id)
            .field("keys", &self.keys())
            .field("observed", &self.is_observed())
            .finish()
    }
}

struct ArrayInner {
    container_id: u64,
    items: RwLock<Vec<Value>>,
    observer: OnceLock<Arc<Observer>>,
    raw: AtomicBool,
    sealed: AtomicBool,
}

/// A reactive vector.
#[derive(Clone)]
pub struct ReactiveArray {
    inner: Arc<ArrayInner>,
}

impl ReactiveArray {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                container_id: next_container_id(),
                items: RwLock::new(Vec::new()),
                observer: OnceLock::new(),
                raw: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_iter<V>(items: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        let arr = Self::new();
        arr.inner
            .items
            .write()
            .extend(items.into_iter().map(Into::into));
        arr
    }

    pub fn dep_id(&self) -> u64 {
        self.inner.container_id
    }

    pub fn ptr_eq(&self, other: &ReactiveArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn mark_raw(&self) {
        self.inner.raw.store(true, Ordering::SeqCst);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::SeqCst)
    }

    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::SeqCst)
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.observer.get().cloned()
    }

    fn is_observed(&self) -> bool {
        self.inner.observer.get().is_some()
    }

    fn track_container(&self) {
        if context::is_tracking() {
            if let Some(ob) = self.observer() {
                ob.dep().depend();
            }
        }
    }

    /// Tracked element read; registers on the container dep (there is no
    /// per-index dep).
    pub fn get(&self, index: usize) -> Value {
        self.track_container();
        self.inner
            .items
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.track_container();
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked snapshot of the elements.
    pub fn snapshot(&self) -> Vec<Value> {
        self.track_container();
        self.inner.items.read().clone()
    }

    fn after_mutation(&self, inserted: &[Value]) {
        if let Some(ob) = self.observer() {
            if !ob.is_shallow() {
                for value in inserted {
                    observe(value);
                }
            }
            ob.dep().notify();
        }
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.inner.items.write().push(value.clone());
        self.after_mutation(std::slice::from_ref(&value));
    }

    pub fn pop(&self) -> Option<Value> {
        let removed = self.inner.items.write().pop();
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Remove the first element.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut items = self.inner.items.write();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Prepend an element.
    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        self.inner.items.write().insert(0, value.clone());
        self.after_mutation(std::slice::from_ref(&value));
    }

    /// Remove `delete_count` elements starting at `start`, inserting
    /// `items` in their place. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Vec<Value> {
        let removed = {
            let mut vec = self.inner.items.write();
            let start = start.min(vec.len());
            let end = (start + delete_count).min(vec.len());
            vec.splice(start..end, items.iter().cloned()).collect()
        };
        self.after_mutation(&items);
        removed
    }

    /// Element replacement by index; index assignment cannot be
    /// intercepted, so this is splice under the hood.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) {
        self.splice(index, 1, vec![value.into()]);
    }

    pub fn reverse(&self) {
        self.inner.items.write().reverse();
        self.after_mutation(&[]);
    }

    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> std::cmp::Ordering,
    {
        self.inner.items.write().sort_by(compare);
        self.after_mutation(&[]);
    }

    fn observe_children(&self, shallow: bool) {
        if shallow {
            return;
        }
        let children = self.inner.items.read().clone();
        for child in &children {
            observe_unwrapping(child);
        }
    }
}

impl Default for ReactiveArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveArray")
            .field("id", &self.inner.container_id)
            .field("len", &self.inner.items.read().len())
            .field("observed", &self.is_observed())
            .finish()
    }
}

/// Attempt to observe a value, returning the container's observer.
///
/// Idempotent: repeated calls on an already-observed container return the
/// existing observer, so dep identities are stable. Scalars, refs, raw
/// containers, and sealed containers are skipped.
pub fn observe(value: &Value) -> Option<Arc<Observer>> {
    observe_with(value, false)
}

/// Observe a child value, looking through ref cells: a ref-held container
/// still needs to be reactive even though the ref itself is not one.
fn observe_unwrapping(value: &Value) {
    match value {
        Value::Ref(r) => {
            observe(&r.get_untracked());
        }
        other => {
            observe(other);
        }
    }
}

/// [`observe`] with a shallow option: only the container itself is
/// observed, nested values are left plain and refs are not unwrapped.
pub fn observe_with(value: &Value, shallow: bool) -> Option<Arc<Observer>> {
    match value {
        Value::Object(obj) => {
            if let Some(existing) = obj.observer() {
                return Some(existing);
            }
            if obj.is_raw() || obj.is_sealed() {
                return None;
            }
            let ob = Observer::new(shallow);
            // Install before recursing so self-referential structures
            // terminate.
            let ob = match obj.inner.observer.set(ob.clone()) {
                Ok(()) => ob,
                Err(_) => return obj.observer(),
            };
            obj.observe_children(shallow);
            Some(ob)
        }
        Value::Array(arr) => {
            if let Some(existing) = arr.observer() {
                return Some(existing);
            }
            if arr.is_raw() || arr.is_sealed() {
                return None;
            }
            let ob = Observer::new(shallow);
            let ob = match arr.inner.observer.set(ob.clone()) {
                Ok(()) => ob,
                Err(_) => return arr.observer(),
            };
            arr.observe_children(shallow);
            Some(ob)
        }
        _ => None,
    }
}

/// Register the active watcher on every observed element of an array.
///
/// Index reads cannot be intercepted, so touching the array has to
/// register on anything inside it that could change independently.
pub fn depend_array(arr: &ReactiveArray) {
    let items = arr.inner.items.read().clone();
    for item in &items {
        match item {
            Value::Object(obj) => {
                if let Some(ob) = obj.observer() {
                    ob.dep().depend();
                }
            }
            Value::Array(nested) => {
                if let Some(ob) = nested.observer() {
                    ob.dep().depend();
                }
                depend_array(nested);
            }
            _ => {}
        }
    }
}

/// Key for [`set_prop`]/[`del_prop`]: object field name or array index.
#[derive(Debug, Clone)]
pub enum PropKey<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for PropKey<'a> {
    fn from(key: &'a str) -> Self {
        PropKey::Name(key)
    }
}

impl From<usize> for PropKey<'_> {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

/// Add or replace a property on an observed container so the change still
/// notifies. Required because a key absent at wrap time has no accessor
/// pair; plain assignment can never become reactive retroactively.
pub fn set_prop<'a>(target: &Value, key: impl Into<PropKey<'a>>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    match (target, key) {
        (Value::Array(arr), PropKey::Index(index)) => {
            if index >= arr.inner.items.read().len() {
                // Grow to fit, like a sparse index assignment.
                let len = arr.inner.items.read().len();
                let mut fill: Vec<Value> = vec![Value::Null; index - len];
                fill.push(value);
                arr.splice(len, 0, fill);
            } else {
                arr.set_index(index, value);
            }
        }
        (Value::Object(obj), PropKey::Name(key)) => {
            if obj.is_raw() {
                error::report(&CoreError::RawTarget { op: "set" });
                return;
            }
            if obj.contains_key(key) {
                obj.set(key, value);
                return;
            }
            if let Some(ob) = obj.observer() {
                if ob.vm_count() > 0 {
                    // Root state objects must declare their keys up front.
                    error::report(&CoreError::UnknownProperty {
                        key: key.to_string(),
                    });
                    return;
                }
            }
            obj.insert(key, value);
        }
        _ => {
            error::report(&CoreError::InvalidTarget { op: "set" });
        }
    }
}

/// Delete a property from an observed container, with notification.
pub fn del_prop<'a>(target: &Value, key: impl Into<PropKey<'a>>) {
    match (target, key.into()) {
        (Value::Array(arr), PropKey::Index(index)) => {
            arr.splice(index, 1, Vec::new());
        }
        (Value::Object(obj), PropKey::Name(key)) => {
            if obj.is_raw() {
                error::report(&CoreError::RawTarget { op: "delete" });
                return;
            }
            obj.remove(key);
        }
        _ => {
            error::report(&CoreError::InvalidTarget { op: "delete" });
        }
    }
}
