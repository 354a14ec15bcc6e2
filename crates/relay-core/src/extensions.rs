//! Typed extension bag.
//!
//! [`Extensions`] stores at most one value per type. Policies use it to hand
//! data to each other (the timing marker, per-request body timeouts) and to
//! attach read-only fields to responses without widening the base types.
//!
//! Values are stored behind `Arc`, so cloning a context shares its extension
//! values instead of copying them. A marker inserted before `next` is the same
//! marker the transport sees, even if an intermediate policy cloned the
//! context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed map of shared values.
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Creates an empty extension bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a typed value, replacing any previous value of the same type.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_core::Extensions;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Tenant(&'static str);
    ///
    /// let mut ext = Extensions::new();
    /// ext.insert(Tenant("acme"));
    /// assert_eq!(ext.get::<Tenant>(), Some(&Tenant("acme")));
    /// ```
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Stores an already shared value.
    pub fn insert_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.map.insert(TypeId::of::<T>(), value);
    }

    /// Returns a reference to the value of type `T`, if present.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns a shared handle to the value of type `T`, if present.
    #[must_use]
    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Removes the value of type `T`, returning its shared handle.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns `true` if a value of type `T` is present.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copies every entry of `other` into `self`, overwriting on conflict.
    pub fn extend(&mut self, other: &Self) {
        for (key, value) in &other.map {
            self.map.insert(*key, Arc::clone(value));
        }
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_insert_get_remove() {
        let mut ext = Extensions::new();
        assert!(!ext.contains::<Marker>());

        ext.insert(Marker(7));
        assert!(ext.contains::<Marker>());
        assert_eq!(ext.get::<Marker>(), Some(&Marker(7)));

        let removed = ext.remove::<Marker>();
        assert_eq!(removed.as_deref(), Some(&Marker(7)));
        assert!(ext.is_empty());
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut ext = Extensions::new();
        ext.insert(Marker(1));
        ext.insert(Marker(2));
        assert_eq!(ext.len(), 1);
        assert_eq!(ext.get::<Marker>(), Some(&Marker(2)));
    }

    #[test]
    fn test_clones_share_values() {
        let mut ext = Extensions::new();
        ext.insert(AtomicUsize::new(0));
        let cloned = ext.clone();

        cloned
            .get::<AtomicUsize>()
            .unwrap()
            .fetch_add(3, Ordering::SeqCst);
        assert_eq!(ext.get::<AtomicUsize>().unwrap().load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_extend_overwrites() {
        let mut a = Extensions::new();
        a.insert(Marker(1));
        let mut b = Extensions::new();
        b.insert(Marker(9));
        b.insert(String::from("x"));

        a.extend(&b);
        assert_eq!(a.get::<Marker>(), Some(&Marker(9)));
        assert_eq!(a.get::<String>().map(String::as_str), Some("x"));
    }
}
