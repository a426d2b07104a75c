//! Tracked host objects, addressable from the script engine by id.
//!
//! The table hands out [`TrackedRef`] wrappers. The engine only ever sees the
//! wrapper's id; when it calls back into a specific instance the host resolves
//! the id here. Ids come from a per-table counter starting at 1 and are never
//! reused, so a released id stays invalid forever.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use ferry_types::ObjectId;

use crate::error::ObjectTableError;

type TrackedObject = Arc<dyn Any + Send + Sync>;

struct TableInner {
    next_id: AtomicU64,
    objects: Mutex<HashMap<ObjectId, TrackedObject>>,
}

impl TableInner {
    fn release(&self, id: ObjectId) -> Result<(), ObjectTableError> {
        let removed = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(_) => {
                tracing::debug!(object = %id, "Released tracked object");
                Ok(())
            }
            None => Err(ObjectTableError::NotFound(id)),
        }
    }
}

/// Id-to-object map owned by a single dispatcher.
///
/// Cloning shares the same table.
#[derive(Clone)]
pub struct ObjectTable {
    inner: Arc<TableInner>,
}

impl ObjectTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                next_id: AtomicU64::new(1),
                objects: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Track `value` under a fresh id.
    pub fn create<T: Send + Sync + 'static>(&self, value: T) -> TrackedRef<T> {
        self.track(Arc::new(value))
    }

    /// Track an existing shared object under a fresh id.
    ///
    /// Tracking the same `Arc` twice yields two independent entries.
    pub fn track<T: Send + Sync + 'static>(&self, value: Arc<T>) -> TrackedRef<T> {
        let id = ObjectId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let erased: TrackedObject = value.clone();
        let previous = self
            .inner
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, erased);
        assert!(previous.is_none(), "object id {id} allocated twice");
        tracing::debug!(object = %id, kind = type_name::<T>(), "Tracking object");

        TrackedRef {
            id,
            value,
            table: Arc::downgrade(&self.inner),
        }
    }

    /// Look up a live object by id.
    pub fn find(&self, id: ObjectId) -> Result<TrackedObject, ObjectTableError> {
        self.inner
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ObjectTableError::NotFound(id))
    }

    /// Look up a live object and downcast it to `T`.
    pub fn find_as<T: Send + Sync + 'static>(
        &self,
        id: ObjectId,
    ) -> Result<Arc<T>, ObjectTableError> {
        self.find(id)?
            .downcast::<T>()
            .map_err(|_| ObjectTableError::TypeMismatch {
                id,
                expected: type_name::<T>(),
            })
    }

    /// Revoke an id. Releasing an unknown or already released id is `NotFound`.
    pub fn release(&self, id: ObjectId) -> Result<(), ObjectTableError> {
        self.inner.release(id)
    }

    /// Revoke the entry behind `reference`, which must come from this table.
    pub fn release_ref<T>(&self, reference: &TrackedRef<T>) -> Result<(), ObjectTableError> {
        if !self.owns(reference) {
            return Err(ObjectTableError::ForeignReference(reference.id));
        }
        self.inner.release(reference.id)
    }

    /// Whether `reference` was created by this table.
    #[must_use]
    pub fn owns<T>(&self, reference: &TrackedRef<T>) -> bool {
        Weak::ptr_eq(&reference.table, &Arc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTable")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

/// A host object exposed to the script engine by id.
///
/// Clones are the same wrapper: they share the id. Serializing the wrapper
/// writes its id as a sentinel record, never the object itself.
pub struct TrackedRef<T> {
    id: ObjectId,
    value: Arc<T>,
    table: Weak<TableInner>,
}

impl<T> TrackedRef<T> {
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Revoke this wrapper's id in its owning table.
    ///
    /// A second call, or a call after the table is gone, returns `NotFound`.
    pub fn dispose(&self) -> Result<(), ObjectTableError> {
        match self.table.upgrade() {
            Some(table) => table.release(self.id),
            None => Err(ObjectTableError::NotFound(self.id)),
        }
    }
}

impl<T> Clone for TrackedRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            table: Weak::clone(&self.table),
        }
    }
}

impl<T> fmt::Debug for TrackedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedRef")
            .field("id", &self.id)
            .field("kind", &type_name::<T>())
            .finish()
    }
}
