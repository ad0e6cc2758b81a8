//! Controller runtime: queues, workers and the per-kind controllers.
//!
//! A [`Controller`] pairs one store with one driver. Workers take an
//! identity from its [`WorkQueue`], run one reconcile pass, and turn the
//! outcome into the next requeue. The [`manager::Manager`] owns one
//! controller per kind and the threads that feed and drain them.

pub mod manager;
pub mod queue;

use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::convergence::retry::RetryTracker;
use crate::events::{EventType, Reason};
use crate::reconcile::{reconcile, Action, Context, Disposition, Driver, ReconcileError};
use crate::stats::Outcome;
use crate::store::{ResourceStore, StoreError};
use crate::types::{Identity, Kind, Resource};

pub use queue::WorkQueue;

/// When an identity should be processed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Now,
    After(Duration),
    /// Only a store change (or the periodic resync) brings it back.
    Idle,
}

/// Kind-erased view of a controller, so the manager can hold all six.
pub trait Managed: Send + Sync {
    fn kind(&self) -> &'static str;
    fn queue(&self) -> &WorkQueue;
    /// Process one identity taken from the queue and schedule it again.
    fn handle(&self, id: Identity);
    /// Queue every record in the store.
    fn enqueue_all(&self);
    fn watch(&self) -> mpsc::Receiver<Identity>;
}

pub struct Controller<K: Kind, D: Driver<K>> {
    store: Arc<dyn ResourceStore<K>>,
    driver: D,
    ctx: Arc<Context>,
    queue: WorkQueue,
    retries: Mutex<RetryTracker>,
}

impl<K: Kind, D: Driver<K>> Controller<K, D> {
    pub fn new(store: Arc<dyn ResourceStore<K>>, driver: D, ctx: Arc<Context>) -> Self {
        let retries = Mutex::new(RetryTracker::new(ctx.settings.backoff.clone()));
        Controller {
            store,
            driver,
            ctx,
            queue: WorkQueue::new(),
            retries,
        }
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, RetryTracker> {
        self.retries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn failure_count(&self, id: &Identity) -> u32 {
        self.tracker().failure_count(&id.to_string())
    }

    /// One reconcile pass for `id`, returning when to come back.
    pub fn process(&self, id: &Identity) -> Next {
        let resource = match self.store.get(id) {
            Ok(r) => r,
            Err(StoreError::NotFound(_)) => {
                debug!(kind = K::KIND, resource = %id, "record gone");
                self.tracker().record_success(&id.to_string());
                return Next::Idle;
            }
            Err(e) => {
                warn!(kind = K::KIND, resource = %id, error = %e, "cannot read record");
                return Next::After(self.tracker().record_failure(&id.to_string()));
            }
        };

        info!(
            kind = K::KIND,
            namespace = %id.namespace,
            name = %id.name,
            version = resource.resource_version,
            "reconciling"
        );
        let started = Instant::now();
        let result = reconcile(&self.ctx, self.store.as_ref(), &self.driver, resource.clone());
        let elapsed = started.elapsed();
        self.ctx
            .stats
            .record_reconcile(K::KIND, Outcome::of(&result), elapsed);
        info!(
            kind = K::KIND,
            namespace = %id.namespace,
            name = %id.name,
            ok = result.is_ok(),
            elapsed_ms = elapsed.as_millis() as u64,
            "reconciled"
        );

        match result {
            Ok(action) => self.on_success(&resource, action),
            Err(e) => self.on_error(&resource, e),
        }
    }

    fn on_success(&self, resource: &Resource<K>, action: Action) -> Next {
        self.tracker().record_success(&resource.identity.to_string());
        if resource.status.last_error.is_some() && !resource.is_being_deleted() {
            match self
                .ctx
                .write_status(self.store.as_ref(), resource, |r| r.status.last_error = None)
            {
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!(kind = K::KIND, resource = %resource.identity, error = %e, "cannot clear last error"),
            }
        }
        match action {
            Action::RequeueAfter(d) if d.is_zero() => Next::Now,
            Action::RequeueAfter(d) => Next::After(d),
            Action::AwaitChange => Next::Idle,
        }
    }

    fn on_error(&self, resource: &Resource<K>, err: ReconcileError) -> Next {
        let id = &resource.identity;
        let key = id.to_string();
        let mut disposition = err.disposition(&self.ctx.settings);
        // A teardown that cannot finish must keep retrying; it is never parked.
        if disposition == Disposition::Fatal && resource.is_being_deleted() {
            disposition = Disposition::Backoff;
        }

        match disposition {
            Disposition::Retry => {
                debug!(kind = K::KIND, resource = %id, "write conflict, retrying");
                Next::Now
            }
            Disposition::Gone => Next::Idle,
            Disposition::RequeueAfter(delay) => {
                warn!(kind = K::KIND, resource = %id, error = %err, "waiting");
                self.ctx
                    .event(resource, EventType::Normal, Reason::Waiting, err.to_string());
                Next::After(delay)
            }
            Disposition::Backoff => {
                let delay = self.tracker().record_failure(&key);
                warn!(
                    kind = K::KIND,
                    resource = %id,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "reconcile failed"
                );
                Next::After(delay)
            }
            Disposition::Fatal => {
                error!(kind = K::KIND, resource = %id, error = %err, "reconcile failed, needs a spec change");
                self.ctx
                    .event(resource, EventType::Warning, Reason::Failed, err.to_string());
                let message = err.to_string();
                if resource.status.last_error.as_deref() != Some(message.as_str()) {
                    if let Err(e) = self.ctx.write_status(self.store.as_ref(), resource, |r| {
                        r.status.last_error = Some(message.clone());
                    }) {
                        warn!(kind = K::KIND, resource = %id, error = %e, "cannot record error");
                    }
                }
                Next::Idle
            }
        }
    }

    pub fn schedule(&self, id: Identity, next: Next) {
        match next {
            Next::Now => self.queue.add(id),
            Next::After(delay) => self.queue.add_after(id, delay),
            Next::Idle => {}
        }
    }
}

impl<K: Kind, D: Driver<K> + 'static> Managed for Controller<K, D> {
    fn kind(&self) -> &'static str {
        K::KIND
    }

    fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    fn handle(&self, id: Identity) {
        let next = self.process(&id);
        self.queue.done(&id);
        self.schedule(id, next);
    }

    fn enqueue_all(&self) {
        match self.store.list(None) {
            Ok(all) => {
                for r in all {
                    self.queue.add(r.identity);
                }
            }
            Err(e) => warn!(kind = K::KIND, error = %e, "resync list failed"),
        }
    }

    fn watch(&self) -> mpsc::Receiver<Identity> {
        self.store.subscribe()
    }
}
