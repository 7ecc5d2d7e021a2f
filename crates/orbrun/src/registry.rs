//! # Object Registry
//!
//! Server-side ownership table for live remote objects. The registry holds one
//! strong reference per entry; a call in flight clones that reference for its
//! own duration, so a concurrent delete never destroys an instance mid-call.
//!
//! Uses DashMap so lookups from dispatch threads never contend on a global lock
//! with registration, erasure or reconciliation.
//!
//! ## Invariants
//!
//! - Ids start at 1 and are never reused within one registry lifetime.
//! - `ObjectId::FACTORY` and `ObjectId::INVALID` are never issued.
//! - An id is valid only while present in the table.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use orbrpc::ObjectId;
use orbrpc::ObjectResolver;
use tracing::info;

use crate::interface::Dispatch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NotFound(ObjectId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "{} not found", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Shared, type-erased instance as stored in the table.
pub type Instance = Arc<dyn Any + Send + Sync>;

struct Entry {
    type_name: String,
    owner: Option<u64>,
    instance: Instance,
    dispatch: Arc<dyn Dispatch>,
}

pub struct Registry {
    entries: DashMap<ObjectId, Entry>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers an instance together with the table that dispatches its calls.
    ///
    /// `owner` is the session id of the client on whose behalf the object was
    /// made, or `None` for objects the server created itself.
    pub fn register(
        &self,
        instance: Instance,
        dispatch: Arc<dyn Dispatch>,
        owner: Option<u64>,
    ) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let type_name = dispatch.type_name().to_string();
        info!(%id, %type_name, ?owner, "registered object");
        self.entries.insert(id, Entry { type_name, owner, instance, dispatch });
        id
    }

    /// Returns a strong reference to the instance registered under `id`.
    pub fn lookup(&self, id: ObjectId) -> Result<Instance> {
        self.entries
            .get(&id)
            .map(|entry| entry.instance.clone())
            .ok_or(Error::NotFound(id))
    }

    /// Typed lookup; `None` if the entry holds another type.
    pub fn lookup_as<T: Any + Send + Sync>(&self, id: ObjectId) -> Result<Option<Arc<T>>> {
        Ok(self.lookup(id)?.downcast::<T>().ok())
    }

    /// Instance and dispatch table, both held strongly for one call.
    pub(crate) fn lookup_entry(&self, id: ObjectId) -> Result<(Instance, Arc<dyn Dispatch>)> {
        self.entries
            .get(&id)
            .map(|entry| (entry.instance.clone(), entry.dispatch.clone()))
            .ok_or(Error::NotFound(id))
    }

    /// Removes the entry. Returns whether anything was removed.
    pub fn erase(&self, id: ObjectId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                info!(%id, type_name = %entry.type_name, "erased object");
                true
            }
            None => false,
        }
    }

    /// Bulk reclamation on behalf of client `owner`.
    ///
    /// With `is_active`, `ids` is the full set the client still holds and every
    /// other entry owned by that client is erased. Otherwise `ids` is exactly
    /// the set to erase. Returns the erased ids in ascending order.
    pub fn reconcile(&self, owner: u64, ids: &[ObjectId], is_active: bool) -> Vec<ObjectId> {
        let mut erased = Vec::new();

        if is_active {
            let keep: HashSet<ObjectId> = ids.iter().copied().collect();
            self.entries.retain(|id, entry| {
                let stale = entry.owner == Some(owner) && !keep.contains(id);
                if stale {
                    erased.push(*id);
                }
                !stale
            });
        } else {
            for &id in ids {
                if self.entries.remove(&id).is_some() {
                    erased.push(id);
                }
            }
        }

        erased.sort();
        erased.dedup();
        info!(owner, is_active, erased = ?erased, "reconciled objects");
        erased
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn type_name(&self, id: ObjectId) -> Option<String> {
        self.entries.get(&id).map(|entry| entry.type_name.clone())
    }

    pub fn owner(&self, id: ObjectId) -> Option<u64> {
        self.entries.get(&id).and_then(|entry| entry.owner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectResolver for Registry {
    fn resolve(&self, id: ObjectId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.lookup(id).ok()
    }
}
