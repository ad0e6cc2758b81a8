//! Wire models exchanged with the remote job/cluster service.
//!
//! Maps use `BTreeMap` so that serializing a model is deterministic, which
//! the content fingerprints rely on.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoScale {
    pub min_workers: u32,
    pub max_workers: u32,
}

/// Desired shape of a cluster. Used both as a cluster resource's spec and as
/// the `new_cluster` block of jobs and runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    pub spark_version: String,
    pub node_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_node_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<AutoScale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotermination_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_env_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    Unknown,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Pending => "PENDING",
            ClusterState::Running => "RUNNING",
            ClusterState::Restarting => "RESTARTING",
            ClusterState::Resizing => "RESIZING",
            ClusterState::Terminating => "TERMINATING",
            ClusterState::Terminated => "TERMINATED",
            ClusterState::Error => "ERROR",
            ClusterState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Observed cluster as reported by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub cluster_name: String,
    pub state: ClusterState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
    pub spark_version: String,
    pub node_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_time_ms: Option<u64>,
}

impl ClusterInfo {
    /// Field-level comparison of what matters for status: state, state
    /// message and worker count. Timestamps and echoes of the spec are noise.
    pub fn same_observation(&self, other: &ClusterInfo) -> bool {
        self.cluster_id == other.cluster_id
            && self.state == other.state
            && self.state_message == other.state_message
            && self.num_workers == other.num_workers
    }
}


// ---------------------------------------------------------------------------
// Tasks and libraries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotebookTask {
    pub notebook_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base_parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparkJarTask {
    pub main_class_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparkPythonTask {
    pub python_file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparkSubmitTask {
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// The work a job or run executes. At least one task should be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_task: Option<NotebookTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_jar_task: Option<SparkJarTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_python_task: Option<SparkPythonTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_submit_task: Option<SparkSubmitTask>,
}

impl JobTask {
    pub fn is_empty(&self) -> bool {
        self.notebook_task.is_none()
            && self.spark_jar_task.is_none()
            && self.spark_python_task.is_none()
            && self.spark_submit_task.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Library {
    Jar(String),
    Egg(String),
    Whl(String),
    Pypi { package: String },
    Maven { coordinates: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronSchedule {
    pub quartz_cron_expression: String,
    pub timezone_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailNotifications {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_start: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
}


// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Settings sent to the remote service on job create/reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSettings {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<ClusterSpec>,
    #[serde(flatten)]
    pub task: JobTask,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Library>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<EmailNotifications>,
    #[serde(default)]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default)]
    pub min_retry_interval_millis: u32,
    #[serde(default)]
    pub retry_on_timeout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub job_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creator_user_name: String,
    pub settings: JobSettings,
    #[serde(default)]
    pub created_time_ms: u64,
}


// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunLifeCycleState {
    Pending,
    Running,
    Terminating,
    Terminated,
    Skipped,
    InternalError,
}

impl fmt::Display for RunLifeCycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunLifeCycleState::Pending => "PENDING",
            RunLifeCycleState::Running => "RUNNING",
            RunLifeCycleState::Terminating => "TERMINATING",
            RunLifeCycleState::Terminated => "TERMINATED",
            RunLifeCycleState::Skipped => "SKIPPED",
            RunLifeCycleState::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunResultState {
    Success,
    Failed,
    TimedOut,
    Canceled,
}

impl fmt::Display for RunResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunResultState::Success => "SUCCESS",
            RunResultState::Failed => "FAILED",
            RunResultState::TimedOut => "TIMEDOUT",
            RunResultState::Canceled => "CANCELED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub life_cycle_state: RunLifeCycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_state: Option<RunResultState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    pub run_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_name: String,
    #[serde(default)]
    pub number_in_job: u32,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub start_time_ms: u64,
    #[serde(default)]
    pub setup_duration_ms: u64,
    #[serde(default)]
    pub execution_duration_ms: u64,
    #[serde(default)]
    pub cleanup_duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunParameters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jar_params: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notebook_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spark_submit_params: Vec<String>,
}

/// A one-off run submitted without a job definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSubmission {
    pub run_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<ClusterSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Library>,
    #[serde(flatten)]
    pub task: JobTask,
    #[serde(default)]
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotebookOutput {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOutput {
    pub metadata: Run,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_output: Option<NotebookOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutput {
    /// Field-level comparison: lifecycle, result, message, output and error.
    pub fn same_observation(&self, other: &RunOutput) -> bool {
        self.metadata.run_id == other.metadata.run_id
            && self.metadata.state == other.metadata.state
            && self.notebook_output == other.notebook_output
            && self.error == other.error
    }
}


// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretScopeInfo {
    pub name: String,
    #[serde(default)]
    pub backend_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretMetadata {
    pub key: String,
    #[serde(default)]
    pub last_updated_timestamp: u64,
}

/// A secret value as written to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPermission {
    Read,
    Write,
    Manage,
}

impl AclPermission {
    /// Parse the permission names accepted in resource specs.
    pub fn parse(s: &str) -> Option<AclPermission> {
        match s {
            "READ" => Some(AclPermission::Read),
            "WRITE" => Some(AclPermission::Write),
            "MANAGE" => Some(AclPermission::Manage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclItem {
    pub principal: String,
    pub permission: AclPermission,
}


// ---------------------------------------------------------------------------
// DBFS blocks and workspace objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    Scala,
    Python,
    Sql,
    R,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportFormat {
    #[default]
    Source,
    Html,
    Jupyter,
    Dbc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Notebook,
    Directory,
    Library,
    File,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Notebook => "NOTEBOOK",
            ObjectType::Directory => "DIRECTORY",
            ObjectType::Library => "LIBRARY",
            ObjectType::File => "FILE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default)]
    pub object_id: i64,
}
