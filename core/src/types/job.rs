use serde::{Deserialize, Serialize};

use super::cluster::ClusterRef;
use super::resource::{Kind, Resource};
use crate::remote::models::{JobSettings, Run, RunLifeCycleState, RunResultState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobKind;

impl Kind for JobKind {
    type Spec = JobSpec;
    type Detail = JobDetail;
    const KIND: &'static str = "job";
    const FINALIZER: &'static str = "job.finalizers.jobwarden.io";
}

pub type Job = Resource<JobKind>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Run on a cluster managed as a cluster resource. Takes precedence over
    /// `settings.existing_cluster_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster: Option<ClusterRef>,
    #[serde(flatten)]
    pub settings: JobSettings,
}

/// Compact view of one run, kept in job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub number_in_job: u32,
    pub life_cycle_state: RunLifeCycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_state: Option<RunResultState>,
    #[serde(default)]
    pub start_time_ms: u64,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        RunSummary {
            run_id: run.run_id,
            number_in_job: run.number_in_job,
            life_cycle_state: run.state.life_cycle_state,
            result_state: run.state.result_state,
            start_time_ms: run.start_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job_id: i64,
    /// Settings as last submitted, including the resolved cluster ID.
    pub settings: JobSettings,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creator_user_name: String,
    #[serde(default)]
    pub created_time_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_runs: Vec<RunSummary>,
}

impl JobDetail {
    /// Remote state shown in status: the latest run's lifecycle, or
    /// `CREATED` when the job never ran.
    pub fn remote_state(&self) -> String {
        match self.recent_runs.first() {
            Some(run) => run.life_cycle_state.to_string(),
            None => "CREATED".to_string(),
        }
    }
}
