//! In-process store with optimistic concurrency and watch notifications.
//!
//! Besides the engine-facing [`ResourceStore`] operations it exposes the
//! author-side operations (create, spec update, deletion request) that an
//! external actor would perform.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{ResourceStore, SecretSource, StoreError};
use crate::types::{Identity, Kind, Resource};

#[derive(Debug)]
struct MemoryState<K: Kind> {
    records: BTreeMap<Identity, Resource<K>>,
    last_version: u64,
    watchers: Vec<mpsc::Sender<Identity>>,
}

impl<K: Kind> MemoryState<K> {
    fn bump(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn notify(&mut self, id: &Identity) {
        self.watchers.retain(|w| w.send(id.clone()).is_ok());
    }
}

/// Records of one kind, held in memory.
#[derive(Debug)]
pub struct MemoryStore<K: Kind> {
    state: Mutex<MemoryState<K>>,
}

impl<K: Kind> Default for MemoryStore<K> {
    fn default() -> Self {
        MemoryStore {
            state: Mutex::new(MemoryState {
                records: BTreeMap::new(),
                last_version: 0,
                watchers: Vec::new(),
            }),
        }
    }
}

impl<K: Kind> MemoryStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Author creates a record with the given spec.
    pub fn create(&self, id: Identity, spec: K::Spec) -> Result<Resource<K>, StoreError> {
        self.insert(Resource::new(id, spec))
    }

    /// Store a fully formed record as-is (apart from its version).
    pub fn insert(&self, mut resource: Resource<K>) -> Result<Resource<K>, StoreError> {
        let mut st = self.lock();
        if st.records.contains_key(&resource.identity) {
            return Err(StoreError::AlreadyExists(resource.identity));
        }
        resource.resource_version = st.bump();
        st.records
            .insert(resource.identity.clone(), resource.clone());
        st.notify(&resource.identity);
        Ok(resource)
    }

    /// Author replaces the spec. Refused once deletion was requested.
    pub fn apply_spec(&self, id: &Identity, spec: K::Spec) -> Result<Resource<K>, StoreError> {
        let mut st = self.lock();
        let version = st.bump();
        let record = st
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if record.deletion_requested {
            return Err(StoreError::Conflict(id.clone()));
        }
        record.spec = spec;
        record.resource_version = version;
        let updated = record.clone();
        st.notify(id);
        Ok(updated)
    }

    /// Author asks for removal. Records without finalizers go immediately.
    pub fn request_deletion(&self, id: &Identity) -> Result<(), StoreError> {
        let mut st = self.lock();
        let version = st.bump();
        let record = st
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.deletion_requested = true;
        record.resource_version = version;
        if record.finalizers.is_empty() {
            st.records.remove(id);
            debug!(kind = K::KIND, resource = %id, "erased");
        }
        st.notify(id);
        Ok(())
    }

    pub fn contains(&self, id: &Identity) -> bool {
        self.lock().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

impl<K: Kind> ResourceStore<K> for MemoryStore<K> {
    fn get(&self, id: &Identity) -> Result<Resource<K>, StoreError> {
        self.lock()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn list(&self, namespace: Option<&str>) -> Result<Vec<Resource<K>>, StoreError> {
        Ok(self
            .lock()
            .records
            .values()
            .filter(|r| namespace.map_or(true, |ns| r.identity.namespace == ns))
            .cloned()
            .collect())
    }

    fn update(&self, mut resource: Resource<K>) -> Result<Resource<K>, StoreError> {
        let mut st = self.lock();
        let id = resource.identity.clone();
        let current = st
            .records
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if current.resource_version != resource.resource_version {
            return Err(StoreError::Conflict(id));
        }
        // Deletion requests are never withdrawn.
        resource.deletion_requested |= current.deletion_requested;
        resource.resource_version = st.bump();
        if resource.deletion_requested && resource.finalizers.is_empty() {
            st.records.remove(&id);
            debug!(kind = K::KIND, resource = %id, "last finalizer removed, erased");
        } else {
            st.records.insert(id.clone(), resource.clone());
        }
        st.notify(&id);
        Ok(resource)
    }

    fn subscribe(&self) -> mpsc::Receiver<Identity> {
        let (tx, rx) = mpsc::channel();
        self.lock().watchers.push(tx);
        rx
    }
}


// ---------------------------------------------------------------------------
// MemorySecrets
// ---------------------------------------------------------------------------

/// Local secrets keyed by identity, each a map of key to bytes.
#[derive(Debug, Default)]
pub struct MemorySecrets {
    secrets: Mutex<BTreeMap<Identity, BTreeMap<String, Vec<u8>>>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: Identity, key: &str, value: impl Into<Vec<u8>>) {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_default()
            .insert(key.to_string(), value.into());
    }
}

impl SecretSource for MemorySecrets {
    fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(secrets
            .get(&Identity::new(namespace, name))
            .and_then(|data| data.get(key).cloned()))
    }
}
