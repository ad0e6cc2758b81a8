//! Run driver.
//!
//! A run is submitted once. Later spec edits are not resubmitted: a run is
//! a record of one execution, so drift is only logged. Teardown cancels an
//! active run and deletes it on a later pass.

use std::sync::Arc;

use tracing::{info, warn};

use super::{numeric_id, Action, Context, Driver, ReconcileError};
use crate::events::{EventType, Reason};
use crate::finalizer::Cleanup;
use crate::fingerprint::fingerprint_json;
use crate::lifecycle::{is_terminal, teardown_run};
use crate::ownership::{resolve_by_name, resolve_cluster, Resolved};
use crate::remote::models::{RunOutput, RunSubmission};
use crate::store::ResourceStore;
use crate::types::cluster::ClusterKind;
use crate::types::job::JobKind;
use crate::types::now_ms;
use crate::types::run::{Run, RunKind};

pub struct RunDriver {
    jobs: Arc<dyn ResourceStore<JobKind>>,
    clusters: Arc<dyn ResourceStore<ClusterKind>>,
}

impl RunDriver {
    pub fn new(
        jobs: Arc<dyn ResourceStore<JobKind>>,
        clusters: Arc<dyn ResourceStore<ClusterKind>>,
    ) -> Self {
        RunDriver { jobs, clusters }
    }

    /// Start the run and return its ID with the resolved owner, if any.
    fn start(&self, ctx: &Context, run: &Run) -> Result<(i64, Option<Resolved>), ReconcileError> {
        let spec = &run.spec;
        let namespace = &run.identity.namespace;

        if let Some(job_name) = &spec.job_name {
            let job = resolve_by_name(self.jobs.as_ref(), namespace, job_name)?;
            let job_id = numeric_id(&job.remote_id)?;
            let run_id = ctx.call("run", "run_now", |r| r.run_now(job_id, &spec.parameters))?;
            info!(run = %run.identity, job_id, run_id, "job triggered");
            return Ok((run_id, Some(job)));
        }

        if spec.task.is_empty() {
            return Err(ReconcileError::Validation(
                "run needs a job_name or a task".into(),
            ));
        }
        let mut owner = None;
        let mut existing_cluster_id = None;
        if let Some(reference) = &spec.existing_cluster {
            let cluster = resolve_cluster(self.clusters.as_ref(), namespace, reference)?;
            existing_cluster_id = Some(cluster.remote_id.clone());
            owner = Some(cluster);
        }
        if existing_cluster_id.is_none() && spec.new_cluster.is_none() {
            return Err(ReconcileError::Validation(
                "run needs an existing cluster or a new_cluster spec".into(),
            ));
        }
        let submission = RunSubmission {
            run_name: if spec.run_name.is_empty() {
                run.identity.name.clone()
            } else {
                spec.run_name.clone()
            },
            existing_cluster_id,
            new_cluster: spec.new_cluster.clone(),
            libraries: spec.libraries.clone(),
            task: spec.task.clone(),
            timeout_seconds: spec.timeout_seconds,
        };
        let run_id = ctx.call("run", "submit", |r| r.submit_run(&submission))?;
        info!(run = %run.identity, run_id, "run submitted");
        Ok((run_id, owner))
    }
}

fn content_hash(run: &Run) -> String {
    fingerprint_json(&run.spec)
}

fn next_action(ctx: &Context, output: Option<&RunOutput>) -> Action {
    match output {
        Some(o) if is_terminal(o.metadata.state.life_cycle_state) => Action::AwaitChange,
        _ => Action::RequeueAfter(ctx.settings.requeue_interval()),
    }
}

impl Driver<RunKind> for RunDriver {
    fn teardown(&self, ctx: &Context, run: &Run) -> Result<Cleanup, ReconcileError> {
        if !run.is_submitted() {
            return Ok(Cleanup::Complete);
        }
        let run_id = numeric_id(&run.status.remote_id)?;
        Ok(teardown_run(ctx, run_id)?)
    }

    fn needs_submit(&self, run: &Run) -> bool {
        !run.is_submitted()
    }

    fn submit(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<RunKind>,
        run: &Run,
    ) -> Result<Action, ReconcileError> {
        let (run_id, owner) = self.start(ctx, run)?;
        let hash = content_hash(run);

        // The run exists now; a failed read must not lose its ID.
        let output = match ctx.call("run", "get_output", |r| r.get_run_output(run_id)) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(run = %run.identity, run_id, error = %e, "cannot read new run yet");
                None
            }
        };

        let stored = ctx.write_status(store, run, |r| {
            r.status.remote_id = run_id.to_string();
            r.status.content_hash = hash.clone();
            r.status.last_refreshed_ms = Some(now_ms());
            if let Some(o) = &output {
                r.status.remote_state = o.metadata.state.life_cycle_state.to_string();
                r.status.detail = Some(o.clone());
            }
            if let Some(resolved) = &owner {
                r.set_owner(resolved.owner.clone());
            }
        })?;
        ctx.event(
            &stored,
            EventType::Normal,
            Reason::Submitted,
            format!("run {} started", run_id),
        );
        Ok(next_action(ctx, output.as_ref()))
    }

    fn refresh(
        &self,
        ctx: &Context,
        store: &dyn ResourceStore<RunKind>,
        run: &Run,
    ) -> Result<Action, ReconcileError> {
        if run.status.content_hash != content_hash(run) {
            info!(run = %run.identity, "spec changed after submission; runs are not resubmitted");
        }
        let run_id = numeric_id(&run.status.remote_id)?;
        let output = ctx.call("run", "get_output", |r| r.get_run_output(run_id))?;

        let changed = match &run.status.detail {
            Some(previous) => !previous.same_observation(&output),
            None => true,
        };
        if changed {
            let state = &output.metadata.state;
            let stored = ctx.write_status(store, run, |r| {
                r.status.remote_state = state.life_cycle_state.to_string();
                r.status.last_refreshed_ms = Some(now_ms());
                r.status.detail = Some(output.clone());
            })?;
            let message = match state.result_state {
                Some(result) => format!("run {} is {} ({})", run_id, state.life_cycle_state, result),
                None => format!("run {} is {}", run_id, state.life_cycle_state),
            };
            ctx.event(&stored, EventType::Normal, Reason::Refreshed, message);
        }
        Ok(next_action(ctx, Some(&output)))
    }
}
