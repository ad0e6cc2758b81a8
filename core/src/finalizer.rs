//! Guard tokens that hold a record back from erasure until its remote
//! counterpart is gone.
//!
//! The guard is attached before any remote create and removed only after a
//! cleanup reports completion. Cleanup may take several passes (a run has to
//! be canceled before it can be deleted), so an incomplete cleanup is a
//! normal outcome that asks for a requeue, not an error.

use tracing::{debug, info};

use crate::store::{update_with, ResourceStore, StoreError};
use crate::types::{Kind, Resource};

/// Result of one cleanup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// The remote counterpart no longer exists.
    Complete,
    /// Progress was made but another pass is needed.
    Incomplete,
}

/// What a teardown pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    NotRequested,
    /// The guard was already gone.
    AlreadyFinalized,
    /// Cleanup is still in progress; reconcile again after a delay.
    Pending,
    /// Cleanup completed and the guard was removed.
    Finalized,
}

impl Teardown {
    pub fn requeue(&self) -> bool {
        matches!(self, Teardown::Pending)
    }
}

/// Attach the kind's guard token unless it is present or deletion was
/// requested. Returns the record as stored and whether the guard was added
/// by this call.
pub fn ensure_guard<K: Kind>(
    store: &dyn ResourceStore<K>,
    resource: Resource<K>,
    conflict_retries: u32,
) -> Result<(Resource<K>, bool), StoreError> {
    if resource.is_being_deleted() || resource.has_finalizer() {
        return Ok((resource, false));
    }
    let mut added = false;
    let stored = update_with(store, &resource, conflict_retries, |r| {
        added = !r.is_being_deleted() && r.add_finalizer();
        added
    })?;
    if added {
        debug!(kind = K::KIND, resource = %stored.identity, "guard attached");
    }
    Ok((stored, added))
}

/// Run `cleanup` for a record whose deletion was requested and, once it
/// completes, remove the guard so the store can erase the record.
///
/// A cleanup error is returned as is and leaves the guard in place.
pub fn run_teardown<K, E, F>(
    store: &dyn ResourceStore<K>,
    resource: &Resource<K>,
    conflict_retries: u32,
    cleanup: F,
) -> Result<Teardown, E>
where
    K: Kind,
    E: From<StoreError>,
    F: FnOnce(&Resource<K>) -> Result<Cleanup, E>,
{
    if !resource.is_being_deleted() {
        return Ok(Teardown::NotRequested);
    }
    if !resource.has_finalizer() {
        return Ok(Teardown::AlreadyFinalized);
    }
    match cleanup(resource)? {
        Cleanup::Incomplete => Ok(Teardown::Pending),
        Cleanup::Complete => {
            update_with(store, resource, conflict_retries, |r| r.remove_finalizer())?;
            info!(kind = K::KIND, resource = %resource.identity, "teardown complete, guard removed");
            Ok(Teardown::Finalized)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::Identity;

    #[derive(Debug, Clone, PartialEq)]
    struct Thing;

    impl Kind for Thing {
        type Spec = String;
        type Detail = String;
        const KIND: &'static str = "thing";
        const FINALIZER: &'static str = "thing.finalizers.test";
    }

    fn guarded(store: &MemoryStore<Thing>) -> Resource<Thing> {
        let r = store.create(Identity::new("ns", "t"), "x".into()).unwrap();
        let (r, added) = ensure_guard(store, r, 3).unwrap();
        assert!(added);
        r
    }

    #[test]
    fn ensure_guard_is_idempotent() {
        let store = MemoryStore::new();
        let r = guarded(&store);
        let version = r.resource_version;
        let (r, added) = ensure_guard(&store, r, 3).unwrap();
        assert!(!added);
        assert_eq!(r.resource_version, version);
    }

    #[test]
    fn ensure_guard_skips_deleting_records() {
        let store: MemoryStore<Thing> = MemoryStore::new();
        let mut r = Resource::new(Identity::new("ns", "t"), "x".into());
        r.deletion_requested = true;
        let (r, added) = ensure_guard(&store, r, 3).unwrap();
        assert!(!added);
        assert!(!r.has_finalizer());
    }

    #[test]
    fn teardown_not_requested_is_noop() {
        let store = MemoryStore::new();
        let r = guarded(&store);
        let out: Result<Teardown, StoreError> =
            run_teardown(&store, &r, 3, |_| panic!("cleanup must not run"));
        assert_eq!(out.unwrap(), Teardown::NotRequested);
    }

    #[test]
    fn incomplete_cleanup_keeps_guard_and_requeues() {
        let store = MemoryStore::new();
        let r = guarded(&store);
        store.request_deletion(&r.identity).unwrap();
        let r = store.get(&r.identity).unwrap();
        let out: Teardown = run_teardown::<_, StoreError, _>(&store, &r, 3, |_| Ok(Cleanup::Incomplete)).unwrap();
        assert!(out.requeue());
        assert!(store.get(&r.identity).unwrap().has_finalizer());
    }

    #[test]
    fn cleanup_error_keeps_guard() {
        let store = MemoryStore::new();
        let r = guarded(&store);
        store.request_deletion(&r.identity).unwrap();
        let r = store.get(&r.identity).unwrap();
        let out = run_teardown(&store, &r, 3, |_| {
            Err(StoreError::Backend("remote down".into()))
        });
        assert!(out.is_err());
        assert!(store.contains(&r.identity));
    }

    #[test]
    fn complete_cleanup_erases_record() {
        let store = MemoryStore::new();
        let r = guarded(&store);
        store.request_deletion(&r.identity).unwrap();
        let r = store.get(&r.identity).unwrap();
        let out = run_teardown::<_, StoreError, _>(&store, &r, 3, |_| Ok(Cleanup::Complete)).unwrap();
        assert_eq!(out, Teardown::Finalized);
        assert!(!store.contains(&r.identity));
    }

    #[test]
    fn absent_guard_means_already_finalized() {
        let store: MemoryStore<Thing> = MemoryStore::new();
        let mut r = Resource::new(Identity::new("ns", "t"), "x".into());
        r.deletion_requested = true;
        let out = run_teardown::<_, StoreError, _>(&store, &r, 3, |_| Ok(Cleanup::Complete)).unwrap();
        assert_eq!(out, Teardown::AlreadyFinalized);
    }
}
