//! Typed façade over the remote job/cluster service.
//!
//! Every operation is synchronous request/response and carries no state of
//! its own, so a single implementation is shared by all drivers. Failures
//! are classified into [`RemoteError`] so callers can decide between retry,
//! idempotent success and fatal configuration errors.

pub mod mock;
pub mod models;

use thiserror::Error;

use models::{
    AclItem, AclPermission, ClusterInfo, ClusterSpec, ExportFormat, FileInfo, Job, JobSettings,
    Language, ObjectInfo, Run, RunOutput, RunParameters, RunSubmission, SecretMetadata,
    SecretScopeInfo, SecretValue,
};


// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classified failure returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("{0} does not exist")]
    DoesNotExist(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, RemoteError::DoesNotExist(_))
    }

    /// Timeouts, throttling and 5xx-equivalents. Worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Unavailable(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Treat "does not exist" as success. Used on every idempotent delete path.
pub fn ignore_missing(result: RemoteResult<()>) -> RemoteResult<()> {
    match result {
        Err(e) if e.is_does_not_exist() => Ok(()),
        other => other,
    }
}


// ---------------------------------------------------------------------------
// Façade traits
// ---------------------------------------------------------------------------

pub trait ClusterApi: Send + Sync {
    fn create_cluster(&self, spec: &ClusterSpec) -> RemoteResult<ClusterInfo>;
    fn get_cluster(&self, cluster_id: &str) -> RemoteResult<ClusterInfo>;
    fn permanent_delete_cluster(&self, cluster_id: &str) -> RemoteResult<()>;
}

pub trait JobApi: Send + Sync {
    fn create_job(&self, settings: &JobSettings) -> RemoteResult<i64>;
    fn get_job(&self, job_id: i64) -> RemoteResult<Job>;
    /// Replace all settings of an existing job in place.
    fn reset_job(&self, job_id: i64, settings: &JobSettings) -> RemoteResult<()>;
    /// Most recent runs of a job, newest first.
    fn list_runs(&self, job_id: i64, limit: usize) -> RemoteResult<Vec<Run>>;
    fn delete_job(&self, job_id: i64) -> RemoteResult<()>;
}

pub trait RunApi: Send + Sync {
    fn submit_run(&self, submission: &RunSubmission) -> RemoteResult<i64>;
    fn run_now(&self, job_id: i64, params: &RunParameters) -> RemoteResult<i64>;
    fn get_run(&self, run_id: i64) -> RemoteResult<Run>;
    fn get_run_output(&self, run_id: i64) -> RemoteResult<RunOutput>;
    fn cancel_run(&self, run_id: i64) -> RemoteResult<()>;
    /// Refused by the service while the run is still executing.
    fn delete_run(&self, run_id: i64) -> RemoteResult<()>;
}

pub trait SecretsApi: Send + Sync {
    fn create_scope(&self, scope: &str, initial_manage_principal: Option<&str>) -> RemoteResult<()>;
    fn list_scopes(&self) -> RemoteResult<Vec<SecretScopeInfo>>;
    fn delete_scope(&self, scope: &str) -> RemoteResult<()>;
    fn list_secrets(&self, scope: &str) -> RemoteResult<Vec<SecretMetadata>>;
    fn put_secret(&self, scope: &str, key: &str, value: &SecretValue) -> RemoteResult<()>;
    fn delete_secret(&self, scope: &str, key: &str) -> RemoteResult<()>;
    fn list_acls(&self, scope: &str) -> RemoteResult<Vec<AclItem>>;
    fn put_acl(&self, scope: &str, principal: &str, permission: AclPermission) -> RemoteResult<()>;
    fn delete_acl(&self, scope: &str, principal: &str) -> RemoteResult<()>;
}

/// Streaming upload of content-addressed blocks.
///
/// `append_chunk` accepts at most [`MAX_CHUNK_BYTES`] per call.
pub trait DbfsApi: Send + Sync {
    fn open_handle(&self, path: &str, overwrite: bool) -> RemoteResult<i64>;
    fn append_chunk(&self, handle: i64, data: &[u8]) -> RemoteResult<()>;
    fn close_handle(&self, handle: i64) -> RemoteResult<()>;
    fn get_file_status(&self, path: &str) -> RemoteResult<FileInfo>;
    fn delete_file(&self, path: &str, recursive: bool) -> RemoteResult<()>;
}

pub trait WorkspaceApi: Send + Sync {
    fn import(
        &self,
        path: &str,
        language: Option<Language>,
        format: ExportFormat,
        content: &[u8],
        overwrite: bool,
    ) -> RemoteResult<()>;
    fn get_object_status(&self, path: &str) -> RemoteResult<ObjectInfo>;
    fn delete_object(&self, path: &str, recursive: bool) -> RemoteResult<()>;
}

/// The full façade. Implemented automatically for anything providing every
/// per-area trait.
pub trait RemoteService: ClusterApi + JobApi + RunApi + SecretsApi + DbfsApi + WorkspaceApi {}

impl<T> RemoteService for T where
    T: ClusterApi + JobApi + RunApi + SecretsApi + DbfsApi + WorkspaceApi
{
}

/// Hard per-call ceiling the service imposes on block appends.
pub const MAX_CHUNK_BYTES: usize = 1000;
