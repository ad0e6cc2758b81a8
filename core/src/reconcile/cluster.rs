//! Cluster driver.
//!
//! The service cannot change a cluster's shape in place, so drift is
//! handled by permanently deleting the old cluster and creating a new one.

use tracing::{info, warn};

use super::{Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::fingerprint_json;
use crate::remote::ignore_missing;
use crate::store::ResourceStore;
use crate::types::cluster::{effective_spec, Cluster, ClusterKind};
use crate::types::now_ms;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterDriver;

impl ClusterDriver {
    pub fn new() -> Self {
        ClusterDriver
    }
}

fn content_hash(cluster: &Cluster) -> String {
    fingerprint_json(&cluster.spec)
}

impl Driver<ClusterKind> for ClusterDriver {
    fn teardown(&self, ctx: &Context, cluster: &Cluster) -> Result<Cleanup, ReconcileError> {
        if !cluster.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let id = &cluster.status.remote_id;
        ignore_missing(ctx.call("cluster", "permanent_delete", |r| r.permanent_delete_cluster(id)))?;
        info!(cluster = %cluster.identity, remote_id = %id, "cluster deleted");
        Ok(Cleanup::Complete)
    }

    fn needs_submit(&self, cluster: &Cluster) -> bool {
        !cluster.is_submitted() || cluster.status.content_hash != content_hash(cluster)
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<ClusterKind>,
        cluster: &Cluster,
    ) -> Result<Action, ReconcileError> {
        if cluster.spec.spark_version.is_empty() || cluster.spec.node_type_id.is_empty() {
            return Err(ReconcileError::Validation(
                "spark_version and node_type_id are required".into(),
            ));
        }
        if cluster.is_submitted() {
            let old = &cluster.status.remote_id;
            info!(cluster = %cluster.identity, remote_id = %old, "spec drifted, recreating cluster");
            ignore_missing(ctx.call("cluster", "permanent_delete", |r| r.permanent_delete_cluster(old)))?;
        }

        let spec = effective_spec(cluster);
        let hash = content_hash(cluster);
        let info = ctx.call("cluster", "create", |r| r.create_cluster(&spec))?;
        info!(cluster = %cluster.identity, remote_id = %info.cluster_id, "cluster created");

        let written = ctx.write_status(store, cluster, |r| {
            r.status.remote_id = info.cluster_id.clone();
            r.status.remote_state = info.state.to_string();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            r.status.detail = Some(info.clone());
        });
        let stored = match written {
            Ok(stored) => stored,
            Err(e) => {
                // The record still holds the old ID, so the next pass creates another cluster.
                warn!(cluster = %cluster.identity, remote_id = %info.cluster_id, error = %e, "cannot record cluster, deleting it");
                let new_id = &info.cluster_id;
                if let Err(del) =
                    ignore_missing(ctx.call("cluster", "permanent_delete", |r| r.permanent_delete_cluster(new_id)))
                {
                    warn!(cluster = %cluster.identity, remote_id = %new_id, error = %del, "unrecorded cluster left behind");
                }
                return Err(e.into());
            }
        };
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!("created cluster {}", info.cluster_id),
        );
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<ClusterKind>,
        cluster: &Cluster,
    ) -> Result<Action, ReconcileError> {
        let id = &cluster.status.remote_id;
        let info = match ctx.call("cluster", "get", |r| r.get_cluster(id)) {
            Ok(info) => info,
            Err(e) if e.is_does_not_exist() => {
                warn!(cluster = %cluster.identity, remote_id = %id, "cluster vanished remotely, will recreate");
                let stored = ctx.reset_status(store, cluster)?;
                ctx.event(
                    &stored,
                    EventType::Warning,
                    Reason::Refreshed,
                    format!("cluster {} no longer exists", id),
                );
                return Ok(Action::RequeueAfter(std::time::Duration::ZERO));
            }
            Err(e) => return Err(e.into()),
        };

        let changed = match &cluster.status.detail {
            Some(previous) => !previous.same_observation(&info),
            None => true,
        };
        if changed {
            let stored = ctx.write_status(store, cluster, |r| {
                r.status.remote_state = info.state.to_string();
                r.status.last_refreshed_ms = Some(now_ms());
                r.status.detail = Some(info.clone());
            })?;
            ctx.event(
                &stored,
                EventType::Normal,
                Reason::Refreshed,
                format!("cluster is {}", info.state),
            );
        }
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }
}
