use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use reef_types::ResourceUrl;

use crate::error::ValueError;
use crate::value::Value;

/// Property names starting and ending with `_` are reserved for codec
/// metadata (currently only the bound-URL marker).
pub(crate) const URL_METADATA_KEY: &str = "_url_";

type Watcher = Arc<dyn Fn(&ObjectValue) -> bool + Send + Sync>;

/// A mutable, shareable property map.
///
/// `ObjectValue` is a handle: clones share the same underlying state, and
/// identity ([`ObjectValue::same`]) is handle identity. An object may be
/// bound to a resource URL exactly once, which is how URL-identified
/// collections mint element identities.
///
/// Watchers registered with [`ObjectValue::on_mutation`] run after every
/// property change of the object *or of any object nested below it*: a
/// child object stored as (or inside) a property value notifies the objects
/// holding it, transitively. A watcher that returns `false` is deregistered.
/// The persistence adapter uses this to re-save a collection when any part
/// of one of its mutable elements changes.
#[derive(Clone)]
pub struct ObjectValue {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    props: Mutex<BTreeMap<String, Value>>,
    url: OnceLock<ResourceUrl>,
    watchers: Mutex<Vec<Option<Watcher>>>,
    /// Objects currently holding this one as (part of) a property value.
    /// One entry per holding slot, so an object held twice stays linked
    /// when one slot is cleared.
    parents: Mutex<Vec<Weak<ObjectInner>>>,
}

/// Token identifying a registered mutation watcher.
#[derive(Debug)]
pub struct WatcherHandle(usize);

impl ObjectValue {
    /// Create a new empty object.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                props: Mutex::new(BTreeMap::new()),
                url: OnceLock::new(),
                watchers: Mutex::new(Vec::new()),
                parents: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an object from `(name, value)` pairs.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ValueError>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let obj = Self::new();
        for (name, value) in entries {
            obj.set(name.into(), value)?;
        }
        Ok(obj)
    }

    /// Identity equality: `true` if both handles refer to the same object.
    pub fn same(&self, other: &ObjectValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Structural equality over property names and values.
    pub fn structural_eq(&self, other: &ObjectValue) -> bool {
        if self.same(other) {
            return true;
        }
        let a = self.inner.props.lock().expect("lock poisoned").clone();
        let b = other.inner.props.lock().expect("lock poisoned").clone();
        a == b
    }

    /// Read a property.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner
            .props
            .lock()
            .expect("lock poisoned")
            .get(name)
            .cloned()
    }

    /// Set a property, notifying mutation watchers.
    pub fn set(&self, name: impl Into<String>, value: Value) -> Result<(), ValueError> {
        let name = name.into();
        if name == URL_METADATA_KEY {
            return Err(ValueError::ReservedProperty(name));
        }
        let previous = {
            let mut props = self.inner.props.lock().expect("lock poisoned");
            props.insert(name, value.clone())
        };
        if let Some(previous) = &previous {
            self.orphan(previous);
        }
        self.adopt(&value);
        self.notify_watchers();
        Ok(())
    }

    /// Remove a property, notifying mutation watchers if it existed.
    pub fn remove(&self, name: &str) -> Option<Value> {
        let removed = self
            .inner
            .props
            .lock()
            .expect("lock poisoned")
            .remove(name);
        if let Some(removed) = &removed {
            self.orphan(removed);
            self.notify_watchers();
        }
        removed
    }

    /// Returns `true` if the object currently has the named property.
    pub fn has_property(&self, name: &str) -> bool {
        self.inner
            .props
            .lock()
            .expect("lock poisoned")
            .contains_key(name)
    }

    /// The object's property names, sorted.
    pub fn property_names(&self) -> Vec<String> {
        self.inner
            .props
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.inner.props.lock().expect("lock poisoned").len()
    }

    /// Returns `true` if the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the property map.
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.inner.props.lock().expect("lock poisoned").clone()
    }

    /// Bind the object's resource URL. Fails if one is already bound.
    pub fn bind_url(&self, url: ResourceUrl) -> Result<(), ValueError> {
        self.inner
            .url
            .set(url)
            .map_err(|_| ValueError::UrlAlreadyBound)
    }

    /// The bound resource URL, if any.
    pub fn url(&self) -> Option<&ResourceUrl> {
        self.inner.url.get()
    }

    /// Register a mutation watcher. The watcher runs after every property
    /// change of this object or of any object nested below it; returning
    /// `false` deregisters it.
    pub fn on_mutation<F>(&self, watcher: F) -> WatcherHandle
    where
        F: Fn(&ObjectValue) -> bool + Send + Sync + 'static,
    {
        let mut watchers = self.inner.watchers.lock().expect("lock poisoned");
        watchers.push(Some(Arc::new(watcher)));
        WatcherHandle(watchers.len() - 1)
    }

    /// Deregister a mutation watcher.
    pub fn remove_watcher(&self, handle: WatcherHandle) {
        let mut watchers = self.inner.watchers.lock().expect("lock poisoned");
        if let Some(slot) = watchers.get_mut(handle.0) {
            *slot = None;
        }
    }

    /// Deep copy into a fresh handle with no bound URL and no watchers.
    pub fn deep_clone(&self) -> ObjectValue {
        let props = self.inner.props.lock().expect("lock poisoned").clone();
        let copy = ObjectValue::new();
        for (name, value) in props {
            let value = value.deep_clone();
            copy.adopt(&value);
            copy.inner
                .props
                .lock()
                .expect("lock poisoned")
                .insert(name, value);
        }
        copy
    }

    /// Objects reachable from `value` without crossing another object — the
    /// ones whose mutations this object must hear directly. Tuples are
    /// looked through; an object's own children link to *it*.
    fn direct_children(value: &Value, out: &mut Vec<ObjectValue>) {
        match value {
            Value::Object(obj) => out.push(obj.clone()),
            Value::Tuple(items) => {
                for item in items {
                    Self::direct_children(item, out);
                }
            }
            _ => {}
        }
    }

    /// Link every object in `value` back to this one.
    fn adopt(&self, value: &Value) {
        let mut children = Vec::new();
        Self::direct_children(value, &mut children);
        for child in children {
            child
                .inner
                .parents
                .lock()
                .expect("lock poisoned")
                .push(Arc::downgrade(&self.inner));
        }
    }

    /// Drop one back-link per object in `value`.
    fn orphan(&self, value: &Value) {
        let mut children = Vec::new();
        Self::direct_children(value, &mut children);
        for child in children {
            let mut parents = child.inner.parents.lock().expect("lock poisoned");
            if let Some(index) = parents
                .iter()
                .position(|p| p.as_ptr() == Arc::as_ptr(&self.inner))
            {
                parents.swap_remove(index);
            }
        }
    }

    fn notify_watchers(&self) {
        let mut visited = Vec::new();
        self.notify_recursive(&mut visited);
    }

    // Watchers run outside the property lock so they can re-enter the
    // object (e.g. to serialize it). Notifications also propagate to every
    // object holding this one; the visited list breaks reference cycles.
    fn notify_recursive(&self, visited: &mut Vec<*const ObjectInner>) {
        let ptr = Arc::as_ptr(&self.inner);
        if visited.contains(&ptr) {
            return;
        }
        visited.push(ptr);

        let snapshot: Vec<(usize, Watcher)> = {
            let watchers = self.inner.watchers.lock().expect("lock poisoned");
            watchers
                .iter()
                .enumerate()
                .filter_map(|(i, w)| w.clone().map(|w| (i, w)))
                .collect()
        };
        let mut expired = Vec::new();
        for (index, watcher) in snapshot {
            if !watcher(self) {
                expired.push(index);
            }
        }
        if !expired.is_empty() {
            let mut watchers = self.inner.watchers.lock().expect("lock poisoned");
            for index in expired {
                watchers[index] = None;
            }
        }

        let parents: Vec<ObjectValue> = {
            let mut parents = self.inner.parents.lock().expect("lock poisoned");
            parents.retain(|p| p.strong_count() > 0);
            parents
                .iter()
                .filter_map(Weak::upgrade)
                .map(|inner| ObjectValue { inner })
                .collect()
        };
        for parent in parents {
            parent.notify_recursive(visited);
        }
    }
}

impl Default for ObjectValue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self.inner.props.lock().expect("lock poisoned");
        f.debug_struct("ObjectValue")
            .field("props", &*props)
            .field("url", &self.inner.url.get())
            .finish()
    }
}
