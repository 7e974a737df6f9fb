//! Document trait and the tracked handle returned for writes.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// A singleton aggregate persisted as one row per type.
///
/// `Default` is the factory used when the store holds no row yet.
pub trait Document: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Name under which the row and its cache entry are stored.
    fn document_type() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// The mutable instance of a document loaded in a unit of work.
///
/// Every `get_mutable` call for the same type within one unit of work returns
/// a clone of the same handle; mutations through any clone are what gets
/// persisted on commit.
pub struct Tracked<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Tracked<T> {
    pub(crate) fn new(document: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(document)),
        }
    }

    /// Borrow the document.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Borrow the document mutably.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> Tracked<T> {
    /// Clone the current state out of the handle.
    pub fn snapshot(&self) -> T {
        self.inner.read().clone()
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tracked").field(&*self.inner.read()).finish()
    }
}
