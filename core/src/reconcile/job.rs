//! Job driver.
//!
//! A job may reference a cluster resource. The reference is resolved at
//! submit time and the resolved ID goes into the submitted settings only;
//! the author's spec is never rewritten. Drift resets the job in place.
//! Refresh resolves the reference again, because a recreated cluster gets
//! a new ID without any change to the job's own spec.

use std::sync::Arc;

use tracing::{info, warn};

use super::{numeric_id, Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::fingerprint_json;
use crate::ownership::{resolve_cluster, Resolved};
use crate::remote::models::JobSettings;
use crate::remote::ignore_missing;
use crate::store::ResourceStore;
use crate::types::cluster::ClusterKind;
use crate::types::job::{Job, JobDetail, JobKind, RunSummary};
use crate::types::now_ms;

pub struct JobDriver {
    clusters: Arc<dyn ResourceStore<ClusterKind>>,
}

impl JobDriver {
    pub fn new(clusters: Arc<dyn ResourceStore<ClusterKind>>) -> Self {
        JobDriver { clusters }
    }

    /// Settings to send, with the job name defaulted and the cluster
    /// reference resolved.
    fn settings_for(&self, job: &Job) -> Result<(JobSettings, Option<Resolved>), ReconcileError> {
        let mut settings = job.spec.settings.clone();
        if settings.name.is_empty() {
            settings.name = job.identity.name.clone();
        }
        let mut owner = None;
        if let Some(reference) = &job.spec.existing_cluster {
            let resolved = resolve_cluster(self.clusters.as_ref(), &job.identity.namespace, reference)?;
            settings.existing_cluster_id = Some(resolved.remote_id.clone());
            owner = Some(resolved);
        }
        if settings.task.is_empty() {
            return Err(ReconcileError::Validation("job defines no task".into()));
        }
        if settings.existing_cluster_id.is_none() && settings.new_cluster.is_none() {
            return Err(ReconcileError::Validation(
                "job needs an existing cluster or a new_cluster spec".into(),
            ));
        }
        Ok((settings, owner))
    }
}

fn content_hash(job: &Job) -> String {
    fingerprint_json(&job.spec)
}

impl Driver<JobKind> for JobDriver {
    fn teardown(&self, ctx: &Context, job: &Job) -> Result<Cleanup, ReconcileError> {
        if !job.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let job_id = numeric_id(&job.status.remote_id)?;
        ignore_missing(ctx.call("job", "delete", |r| r.delete_job(job_id)))?;
        info!(job = %job.identity, job_id, "job deleted");
        Ok(Cleanup::Complete)
    }

    fn needs_submit(&self, job: &Job) -> bool {
        !job.is_submitted() || job.status.content_hash != content_hash(job)
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<JobKind>,
        job: &Job,
    ) -> Result<Action, ReconcileError> {
        let (settings, owner) = self.settings_for(job)?;
        let hash = content_hash(job);

        let mut job_id = None;
        if job.is_submitted() {
            let existing = numeric_id(&job.status.remote_id)?;
            match ctx.call("job", "reset", |r| r.reset_job(existing, &settings)) {
                Ok(()) => {
                    info!(job = %job.identity, job_id = existing, "job settings reset");
                    job_id = Some(existing);
                }
                Err(e) if e.is_does_not_exist() => {
                    warn!(job = %job.identity, job_id = existing, "job vanished remotely, recreating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let job_id = match job_id {
            Some(id) => id,
            None => {
                let id = ctx.call("job", "create", |r| r.create_job(&settings))?;
                info!(job = %job.identity, job_id = id, "job created");
                id
            }
        };

        let detail = JobDetail {
            job_id,
            settings: settings.clone(),
            creator_user_name: String::new(),
            created_time_ms: now_ms(),
            recent_runs: Vec::new(),
        };
        let stored = ctx.write_status(store, job, |r| {
            r.status.remote_id = job_id.to_string();
            r.status.remote_state = detail.remote_state();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            r.status.detail = Some(detail.clone());
            if let Some(resolved) = &owner {
                r.set_owner(resolved.owner.clone());
            }
        })?;
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!("job {} submitted", job_id),
        );
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<JobKind>,
        job: &Job,
    ) -> Result<Action, ReconcileError> {
        let job_id = numeric_id(&job.status.remote_id)?;
        let remote = match ctx.call("job", "get", |r| r.get_job(job_id)) {
            Ok(remote) => remote,
            Err(e) if e.is_does_not_exist() => {
                warn!(job = %job.identity, job_id, "job vanished remotely, will recreate");
                let stored = ctx.reset_status(store, job)?;
                ctx.event(
                    &stored,
                    EventType::Warning,
                    Reason::Refreshed,
                    format!("job {} no longer exists", job_id),
                );
                return Ok(Action::RequeueAfter(std::time::Duration::ZERO));
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(reference) = &job.spec.existing_cluster {
            let resolved = resolve_cluster(self.clusters.as_ref(), &job.identity.namespace, reference)?;
            if remote.settings.existing_cluster_id.as_deref() != Some(resolved.remote_id.as_str()) {
                info!(
                    job = %job.identity,
                    job_id,
                    cluster_id = %resolved.remote_id,
                    "cluster was replaced, resetting job"
                );
                return self.submit(ctx, store, job);
            }
        }
        let limit = ctx.settings.job_run_history;
        let runs = ctx.call("job", "list_runs", |r| r.list_runs(job_id, limit))?;

        let observed = JobDetail {
            job_id,
            settings: remote.settings,
            creator_user_name: remote.creator_user_name,
            created_time_ms: remote.created_time_ms,
            recent_runs: runs.iter().map(RunSummary::from).collect(),
        };
        let changed = match &job.status.detail {
            Some(previous) => {
                previous.settings != observed.settings || previous.recent_runs != observed.recent_runs
            }
            None => true,
        };
        if changed {
            let stored = ctx.write_status(store, job, |r| {
                r.status.remote_state = observed.remote_state();
                r.status.last_refreshed_ms = Some(now_ms());
                r.status.detail = Some(observed.clone());
            })?;
            ctx.event(
                &stored,
                EventType::Normal,
                Reason::Refreshed,
                format!("{} recent runs, latest {}", observed.recent_runs.len(), observed.remote_state()),
            );
        }
        Ok(Action::RequeueAfter(ctx.settings.requeue_interval()))
    }
}
