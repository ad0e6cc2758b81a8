//! Storage and watch substrate.
//!
//! The engine never owns resource records. It reads them, writes status and
//! finalizer changes back under optimistic concurrency, and subscribes to
//! change notifications. `memory` provides the in-process implementation
//! used by the simulator and tests.

pub mod memory;

use std::sync::mpsc;

use thiserror::Error;
use tracing::debug;

use crate::types::{Identity, Kind, Resource};


// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(Identity),
    /// The record changed since it was read.
    #[error("{0} was modified concurrently")]
    Conflict(Identity),
    #[error("{0} already exists")]
    AlreadyExists(Identity),
    #[error("store backend failure: {0}")]
    Backend(String),
}


// ---------------------------------------------------------------------------
// ResourceStore
// ---------------------------------------------------------------------------

pub trait ResourceStore<K: Kind>: Send + Sync {
    fn get(&self, id: &Identity) -> Result<Resource<K>, StoreError>;

    /// All records, or those of one namespace.
    fn list(&self, namespace: Option<&str>) -> Result<Vec<Resource<K>>, StoreError>;

    /// Write a record read earlier. Fails with `Conflict` unless
    /// `resource.resource_version` is still current. Returns the record as
    /// stored, with its new version. A record whose deletion was requested
    /// and that carries no finalizers is erased.
    fn update(&self, resource: Resource<K>) -> Result<Resource<K>, StoreError>;

    /// Identities of records as they change.
    fn subscribe(&self) -> mpsc::Receiver<Identity>;
}

/// Apply `mutate` to `base` and write it back. On `Conflict` the record is
/// re-read and `mutate` re-applied, up to `retries` more times. `mutate`
/// returns false when the fresh record needs no change; nothing is written
/// then.
pub fn update_with<K, F>(
    store: &dyn ResourceStore<K>,
    base: &Resource<K>,
    retries: u32,
    mut mutate: F,
) -> Result<Resource<K>, StoreError>
where
    K: Kind,
    F: FnMut(&mut Resource<K>) -> bool,
{
    let mut current = base.clone();
    let mut attempt = 0;
    loop {
        if !mutate(&mut current) {
            return Ok(current);
        }
        match store.update(current) {
            Err(StoreError::Conflict(id)) if attempt < retries => {
                attempt += 1;
                debug!(kind = K::KIND, resource = %id, attempt, "write conflict, re-reading");
                current = store.get(&id)?;
            }
            other => return other,
        }
    }
}


// ---------------------------------------------------------------------------
// SecretSource
// ---------------------------------------------------------------------------

/// Locally stored secrets that secret scopes may copy values from.
pub trait SecretSource: Send + Sync {
    /// `Ok(None)` when the secret or the key is absent.
    fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;
}
