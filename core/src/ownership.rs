//! Resolution of cross-resource references into remote identifiers.
//!
//! A reference names another resource in the same namespace, or carries a
//! remote ID that must match exactly one resource's `status.remote_id`.
//! A referenced resource that exists but was not submitted yet is
//! `NotReady`, which callers retry after a delay instead of failing.

use thiserror::Error;
use tracing::debug;

use crate::store::{ResourceStore, StoreError};
use crate::types::cluster::ClusterRef;
use crate::types::{Identity, Kind, OwnerReference};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("referenced {kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("referenced {kind} '{name}' is not submitted yet")]
    NotReady { kind: &'static str, name: String },
    #[error("expected exactly one {kind} with remote id '{remote_id}', found {matches}")]
    AmbiguousOrMissing {
        kind: &'static str,
        remote_id: String,
        matches: usize,
    },
    #[error("{kind} reference sets neither a name nor a remote id")]
    Unspecified { kind: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub remote_id: String,
    pub owner: OwnerReference,
}

/// Look up the resource called `name` in `namespace`.
pub fn resolve_by_name<K: Kind>(
    store: &dyn ResourceStore<K>,
    namespace: &str,
    name: &str,
) -> Result<Resolved, ResolveError> {
    let target = match store.get(&Identity::new(namespace, name)) {
        Ok(r) => r,
        Err(StoreError::NotFound(_)) => {
            return Err(ResolveError::NotFound {
                kind: K::KIND,
                name: name.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if !target.is_submitted() {
        return Err(ResolveError::NotReady {
            kind: K::KIND,
            name: name.to_string(),
        });
    }
    debug!(kind = K::KIND, name, remote_id = %target.status.remote_id, "reference resolved");
    Ok(Resolved {
        remote_id: target.status.remote_id.clone(),
        owner: OwnerReference {
            kind: K::KIND.to_string(),
            name: target.identity.name.clone(),
            remote_id: target.status.remote_id,
        },
    })
}

/// Find the single resource in `namespace` whose remote ID is `remote_id`.
pub fn resolve_by_remote_id<K: Kind>(
    store: &dyn ResourceStore<K>,
    namespace: &str,
    remote_id: &str,
) -> Result<Resolved, ResolveError> {
    let matches: Vec<_> = store
        .list(Some(namespace))?
        .into_iter()
        .filter(|r| r.status.remote_id == remote_id)
        .collect();
    if matches.len() != 1 {
        return Err(ResolveError::AmbiguousOrMissing {
            kind: K::KIND,
            remote_id: remote_id.to_string(),
            matches: matches.len(),
        });
    }
    let target = &matches[0];
    Ok(Resolved {
        remote_id: remote_id.to_string(),
        owner: OwnerReference {
            kind: K::KIND.to_string(),
            name: target.identity.name.clone(),
            remote_id: remote_id.to_string(),
        },
    })
}

/// Resolve a cluster reference. A name wins over a remote ID.
pub fn resolve_cluster<K: Kind>(
    store: &dyn ResourceStore<K>,
    namespace: &str,
    reference: &ClusterRef,
) -> Result<Resolved, ResolveError> {
    match (&reference.name, &reference.remote_id) {
        (Some(name), _) if !name.is_empty() => resolve_by_name(store, namespace, name),
        (_, Some(id)) if !id.is_empty() => resolve_by_remote_id(store, namespace, id),
        _ => Err(ResolveError::Unspecified { kind: K::KIND }),
    }
}
