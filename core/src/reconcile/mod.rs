//! Per-kind reconciliation.
//!
//! Every kind follows the same pass, evaluated in priority order:
//!
//! 1. deletion requested: tear the remote object down, then drop the guard;
//! 2. guard absent: attach it and stop (the write retriggers the pass);
//! 3. never submitted, or the spec fingerprint drifted from the recorded
//!    one: resolve references and submit;
//! 4. otherwise refresh the observed state.
//!
//! The kind-specific parts live behind [`Driver`]; [`reconcile`] is the
//! shared skeleton.

pub mod block;
pub mod cluster;
pub mod job;
pub mod run;
pub mod secret_scope;
pub mod workspace_item;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::events::{Event, EventRecorder, EventType, Reason};
use crate::finalizer::{self, Cleanup, Teardown};
use crate::ownership::ResolveError;
use crate::remote::{RemoteError, RemoteResult, RemoteService};
use crate::stats::{Execution, StatsCollector};
use crate::store::{update_with, ResourceStore, SecretSource, StoreError};
use crate::types::config::Settings;
use crate::types::{now_ms, Kind, Resource, Status};


// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the controller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RequeueAfter(Duration),
    /// Nothing to poll; wait for the record to change (or the next resync).
    AwaitChange,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid spec: {0}")]
    Validation(String),
}

/// How a failed pass is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Write conflict: re-read and run the pass again right away.
    Retry,
    /// The record is gone; nothing left to do.
    Gone,
    /// Expected wait (a reference is not ready). Not an error.
    RequeueAfter(Duration),
    /// Transient failure: retry with per-resource backoff.
    Backoff,
    /// Needs a spec change: attach the error and stop.
    Fatal,
}

impl ReconcileError {
    pub fn disposition(&self, settings: &Settings) -> Disposition {
        match self {
            ReconcileError::Store(e) | ReconcileError::Resolve(ResolveError::Store(e)) => match e {
                StoreError::Conflict(_) => Disposition::Retry,
                StoreError::NotFound(_) => Disposition::Gone,
                StoreError::AlreadyExists(_) | StoreError::Backend(_) => Disposition::Backoff,
            },
            ReconcileError::Resolve(ResolveError::NotReady { .. }) => {
                Disposition::RequeueAfter(settings.not_ready_delay())
            }
            // The referenced resource may simply not have been created yet.
            ReconcileError::Resolve(ResolveError::NotFound { .. }) => Disposition::Backoff,
            ReconcileError::Resolve(_) => Disposition::Fatal,
            ReconcileError::Remote(e) if e.is_transient() => Disposition::Backoff,
            ReconcileError::Remote(_) => Disposition::Fatal,
            ReconcileError::Validation(_) => Disposition::Fatal,
        }
    }
}


// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Collaborators shared by every driver.
pub struct Context {
    pub remote: Arc<dyn RemoteService>,
    pub events: Arc<dyn EventRecorder>,
    pub stats: Arc<dyn StatsCollector>,
    pub secrets: Arc<dyn SecretSource>,
    pub settings: Settings,
}

impl Context {
    /// Run one remote call, timing it and logging it at debug level.
    pub fn call<T>(
        &self,
        object_type: &'static str,
        action: &'static str,
        f: impl FnOnce(&dyn RemoteService) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        debug!(object_type, action, "remote call");
        let execution = Execution::start(self.stats.as_ref(), object_type, action);
        let result = f(self.remote.as_ref());
        execution.finish(&result);
        if let Err(e) = &result {
            debug!(object_type, action, error = %e, "remote call failed");
        }
        result
    }

    pub fn event<K: Kind>(
        &self,
        resource: &Resource<K>,
        event_type: EventType,
        reason: Reason,
        message: impl Into<String>,
    ) {
        self.events
            .record(Event::for_resource(resource, event_type, reason, message));
    }

    /// Short bounded pause after a multi-step write, before reading status.
    pub fn settle(&self) {
        let delay = self.settings.settle_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Write `mutate` into the record's status, re-reading on conflicts.
    pub fn write_status<K, F>(
        &self,
        store: &dyn ResourceStore<K>,
        resource: &Resource<K>,
        mut mutate: F,
    ) -> Result<Resource<K>, StoreError>
    where
        K: Kind,
        F: FnMut(&mut Resource<K>),
    {
        update_with(store, resource, self.settings.conflict_retries, |r| {
            mutate(r);
            true
        })
    }

    /// Forget everything observed so the next pass submits from scratch.
    pub fn reset_status<K: Kind>(
        &self,
        store: &dyn ResourceStore<K>,
        resource: &Resource<K>,
    ) -> Result<Resource<K>, StoreError> {
        self.write_status(store, resource, |r| r.status = Status::default())
    }

    /// Remaining time before a refresh is due, if the last one is recent.
    fn refresh_not_due<D>(&self, status: &Status<D>) -> Option<Duration> {
        let last = status.last_refreshed_ms?;
        let interval = self.settings.requeue_interval();
        let elapsed = Duration::from_millis(now_ms().saturating_sub(last));
        (elapsed < interval).then(|| interval - elapsed)
    }
}


// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// The kind-specific steps of a reconcile pass.
pub trait Driver<K: Kind>: Send + Sync {
    /// Remove the remote counterpart. `Incomplete` asks for another pass.
    fn teardown(&self, ctx: &Context, resource: &Resource<K>) -> Result<Cleanup, ReconcileError>;

    /// Never submitted, or the remote object no longer reflects the spec.
    fn needs_submit(&self, resource: &Resource<K>) -> bool;

    /// Resolve references and create (or recreate/reset) the remote object.
    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<K>,
        resource: &Resource<K>,
    ) -> Result<Action, ReconcileError>;

    /// Poll the remote object and record meaningful changes.
    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<K>,
        resource: &Resource<K>,
    ) -> Result<Action, ReconcileError>;
}

/// One reconcile pass over `resource`.
pub fn reconcile<K, D>(
    ctx: &Context,
    store: &dyn ResourceStore<K>,
    driver: &D,
    resource: Resource<K>,
) -> Result<Action, ReconcileError>
where
    K: Kind,
    D: Driver<K> + ?Sized,
{
    let retries = ctx.settings.conflict_retries;

    if resource.is_being_deleted() {
        let outcome = finalizer::run_teardown(store, &resource, retries, |r| driver.teardown(ctx, r))?;
        if outcome.requeue() {
            return Ok(Action::RequeueAfter(ctx.settings.teardown_poll()));
        }
        if outcome == Teardown::Finalized {
            ctx.event(&resource, EventType::Normal, Reason::Deleted, "remote object removed");
        }
        return Ok(Action::AwaitChange);
    }

    let (resource, attached) = finalizer::ensure_guard(store, resource, retries)?;
    if attached {
        info!(kind = K::KIND, resource = %resource.identity, "now managed");
        ctx.event(&resource, EventType::Normal, Reason::Added, "finalizer attached");
        return Ok(Action::AwaitChange);
    }

    if driver.needs_submit(&resource) {
        return driver.submit(ctx, store, &resource);
    }

    if let Some(wait) = ctx.refresh_not_due(&resource.status) {
        debug!(kind = K::KIND, resource = %resource.identity, "refreshed recently");
        return Ok(Action::RequeueAfter(wait));
    }
    driver.refresh(ctx, store, &resource)
}


// ---------------------------------------------------------------------------
// Helpers shared by drivers
// ---------------------------------------------------------------------------

/// Parse a numeric remote ID stored as a string in status.
pub(crate) fn numeric_id(remote_id: &str) -> Result<i64, ReconcileError> {
    remote_id
        .parse()
        .map_err(|_| ReconcileError::Validation(format!("remote id '{}' is not numeric", remote_id)))
}

/// Split decoded bytes into append-sized chunks.
pub(crate) fn chunks(data: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(chunk_size.clamp(1, crate::remote::MAX_CHUNK_BYTES))
}


#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the driver tests.

    use std::sync::{mpsc, Arc, Mutex};

    use super::Context;
    use crate::events::MemoryRecorder;
    use crate::remote::mock::MockRemote;
    use crate::stats::MemoryStats;
    use crate::store::memory::{MemorySecrets, MemoryStore};
    use crate::store::{ResourceStore, StoreError};
    use crate::types::config::Settings;
    use crate::types::{Identity, Kind, Resource};

    pub struct Harness {
        pub remote: Arc<MockRemote>,
        pub events: Arc<MemoryRecorder>,
        pub stats: Arc<MemoryStats>,
        pub secrets: Arc<MemorySecrets>,
        pub ctx: Context,
    }

    /// Context over fresh in-memory collaborators, without settle sleeps.
    pub fn harness() -> Harness {
        let remote = Arc::new(MockRemote::new());
        let events = Arc::new(MemoryRecorder::new());
        let stats = Arc::new(MemoryStats::new());
        let secrets = Arc::new(MemorySecrets::new());
        let ctx = Context {
            remote: remote.clone(),
            events: events.clone(),
            stats: stats.clone(),
            secrets: secrets.clone(),
            settings: Settings {
                settle_delay_ms: 0,
                ..Settings::default()
            },
        };
        Harness {
            remote,
            events,
            stats,
            secrets,
            ctx,
        }
    }

    type Hook<K> = Box<dyn FnOnce(&MemoryStore<K>) -> Option<StoreError> + Send>;

    /// A memory store that runs a hook once, just before the first write
    /// that records a remote ID. The hook can act as the author (edit the
    /// record underneath the driver) or fail the write outright.
    pub struct HookedStore<K: Kind> {
        pub inner: MemoryStore<K>,
        hook: Mutex<Option<Hook<K>>>,
    }

    impl<K: Kind> HookedStore<K> {
        pub fn new() -> Self {
            HookedStore {
                inner: MemoryStore::new(),
                hook: Mutex::new(None),
            }
        }

        pub fn before_status_write(
            &self,
            hook: impl FnOnce(&MemoryStore<K>) -> Option<StoreError> + Send + 'static,
        ) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }
    }

    impl<K: Kind> ResourceStore<K> for HookedStore<K> {
        fn get(&self, id: &Identity) -> Result<Resource<K>, StoreError> {
            self.inner.get(id)
        }

        fn list(&self, namespace: Option<&str>) -> Result<Vec<Resource<K>>, StoreError> {
            self.inner.list(namespace)
        }

        fn update(&self, resource: Resource<K>) -> Result<Resource<K>, StoreError> {
            if !resource.status.remote_id.is_empty() {
                let hook = self.hook.lock().unwrap().take();
                if let Some(err) = hook.and_then(|h| h(&self.inner)) {
                    return Err(err);
                }
            }
            self.inner.update(resource)
        }

        fn subscribe(&self) -> mpsc::Receiver<Identity> {
            self.inner.subscribe()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::ResolveError;

    #[test]
    fn disposition_mapping() {
        let s = Settings::default();
        let id = crate::types::Identity::new("ns", "a");
        assert_eq!(
            ReconcileError::from(StoreError::Conflict(id.clone())).disposition(&s),
            Disposition::Retry
        );
        assert_eq!(
            ReconcileError::from(StoreError::NotFound(id)).disposition(&s),
            Disposition::Gone
        );
        assert_eq!(
            ReconcileError::from(ResolveError::NotReady {
                kind: "cluster",
                name: "etl".into()
            })
            .disposition(&s),
            Disposition::RequeueAfter(Duration::from_secs(10))
        );
        assert_eq!(
            ReconcileError::from(RemoteError::Transient("timeout".into())).disposition(&s),
            Disposition::Backoff
        );
        assert_eq!(
            ReconcileError::from(RemoteError::AlreadyExists("scope".into())).disposition(&s),
            Disposition::Fatal
        );
        assert_eq!(
            ReconcileError::Validation("bad permission".into()).disposition(&s),
            Disposition::Fatal
        );
        assert_eq!(
            ReconcileError::from(ResolveError::AmbiguousOrMissing {
                kind: "cluster",
                remote_id: "c-1".into(),
                matches: 0
            })
            .disposition(&s),
            Disposition::Fatal
        );
    }

    #[test]
    fn chunking_respects_ceiling() {
        let data = vec![0u8; 2500];
        let sizes: Vec<usize> = chunks(&data, 1000).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        let capped: Vec<usize> = chunks(&data, 5000).map(|c| c.len()).collect();
        assert_eq!(capped, vec![1000, 1000, 500]);
    }

    #[test]
    fn numeric_ids() {
        assert_eq!(numeric_id("42").unwrap(), 42);
        assert!(matches!(numeric_id("c-1"), Err(ReconcileError::Validation(_))));
    }
}
