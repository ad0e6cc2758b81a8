//! In-memory remote service for tests and the local simulator.
//!
//! Records every call, supports one-shot injected failures, and models the
//! asynchronous parts of the real service: runs move through their lifecycle
//! only when polled, and a cancel takes effect on the next `get`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::models::{
    AclItem, AclPermission, ClusterInfo, ClusterSpec, ClusterState, ExportFormat, FileInfo, Job,
    JobSettings, Language, NotebookOutput, ObjectInfo, ObjectType, Run, RunLifeCycleState,
    RunOutput, RunParameters, RunResultState, RunState, RunSubmission, SecretMetadata,
    SecretScopeInfo, SecretValue,
};
use super::{
    ClusterApi, DbfsApi, JobApi, RemoteError, RemoteResult, RunApi, SecretsApi, WorkspaceApi,
    MAX_CHUNK_BYTES,
};

/// Operations that change remote state.
const MUTATING_OPS: &[&str] = &[
    "create_cluster",
    "permanent_delete_cluster",
    "create_job",
    "reset_job",
    "delete_job",
    "submit_run",
    "run_now",
    "cancel_run",
    "delete_run",
    "create_scope",
    "delete_scope",
    "put_secret",
    "delete_secret",
    "put_acl",
    "delete_acl",
    "open_handle",
    "append_chunk",
    "close_handle",
    "delete_file",
    "import",
    "delete_object",
];

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub target: String,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        MUTATING_OPS.contains(&self.op)
    }
}

#[derive(Debug, Clone)]
struct MockRun {
    run: Run,
    cancel_requested: bool,
}

#[derive(Debug, Clone, Default)]
struct MockScope {
    secrets: BTreeMap<String, SecretValue>,
    acls: BTreeMap<String, AclPermission>,
}

#[derive(Debug, Clone)]
struct MockObject {
    info: ObjectInfo,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    failures: Vec<(&'static str, RemoteError)>,
    auto_advance: bool,
    next_id: i64,
    clusters: BTreeMap<String, ClusterInfo>,
    jobs: BTreeMap<i64, Job>,
    runs: BTreeMap<i64, MockRun>,
    scopes: BTreeMap<String, MockScope>,
    handles: BTreeMap<i64, (String, Vec<u8>)>,
    files: BTreeMap<String, Vec<u8>>,
    objects: BTreeMap<String, MockObject>,
}

impl MockState {
    /// Log the call and pop a pending injected failure for `op`, if any.
    fn record(&mut self, op: &'static str, target: impl Into<String>) -> RemoteResult<()> {
        self.calls.push(Call {
            op,
            target: target.into(),
        });
        if let Some(pos) = self.failures.iter().position(|(o, _)| *o == op) {
            let (_, err) = self.failures.remove(pos);
            return Err(err);
        }
        Ok(())
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn scope_mut(&mut self, scope: &str) -> RemoteResult<&mut MockScope> {
        self.scopes
            .get_mut(scope)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("scope '{}'", scope)))
    }

    fn new_run(&mut self, job_id: Option<i64>, run_name: String, cluster_id: Option<String>) -> i64 {
        let run_id = self.next_id();
        let number_in_job = match job_id {
            Some(id) => self.runs.values().filter(|r| r.run.job_id == Some(id)).count() as u32 + 1,
            None => 0,
        };
        self.runs.insert(
            run_id,
            MockRun {
                run: Run {
                    run_id,
                    job_id,
                    run_name,
                    number_in_job,
                    state: RunState {
                        life_cycle_state: RunLifeCycleState::Pending,
                        result_state: None,
                        state_message: "Waiting for cluster".into(),
                    },
                    cluster_id,
                    start_time_ms: 0,
                    setup_duration_ms: 0,
                    execution_duration_ms: 0,
                    cleanup_duration_ms: 0,
                },
                cancel_requested: false,
            },
        );
        run_id
    }

    /// Apply pending cancels and, with auto-advance, step the lifecycle once.
    fn poll_run(&mut self, run_id: i64) -> RemoteResult<Run> {
        let auto_advance = self.auto_advance;
        let entry = self
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("run {}", run_id)))?;
        let state = &mut entry.run.state;
        if entry.cancel_requested && state.result_state.is_none() {
            state.life_cycle_state = RunLifeCycleState::Terminated;
            state.result_state = Some(RunResultState::Canceled);
            state.state_message = "Run was canceled".into();
        } else if auto_advance && state.result_state.is_none() {
            match state.life_cycle_state {
                RunLifeCycleState::Pending => {
                    state.life_cycle_state = RunLifeCycleState::Running;
                    state.state_message = String::new();
                }
                RunLifeCycleState::Running | RunLifeCycleState::Terminating => {
                    state.life_cycle_state = RunLifeCycleState::Terminated;
                    state.result_state = Some(RunResultState::Success);
                }
                _ => {}
            }
        }
        Ok(entry.run.clone())
    }
}


// ---------------------------------------------------------------------------
// MockRemote
// ---------------------------------------------------------------------------

/// A thread-safe test double of the whole remote service.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose clusters and runs progress every time they are polled.
    pub fn auto_advancing() -> Self {
        let mock = Self::new();
        mock.lock().auto_advance = true;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.lock().failures.push((op, err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<ClusterInfo> {
        self.lock().clusters.get(cluster_id).cloned()
    }

    pub fn cluster_count(&self) -> usize {
        self.lock().clusters.len()
    }

    pub fn set_cluster_state(&self, cluster_id: &str, state: ClusterState) {
        if let Some(c) = self.lock().clusters.get_mut(cluster_id) {
            c.state = state;
        }
    }

    pub fn job(&self, job_id: i64) -> Option<Job> {
        self.lock().jobs.get(&job_id).cloned()
    }

    pub fn run(&self, run_id: i64) -> Option<Run> {
        self.lock().runs.get(&run_id).map(|r| r.run.clone())
    }

    pub fn set_run_state(
        &self,
        run_id: i64,
        life_cycle_state: RunLifeCycleState,
        result_state: Option<RunResultState>,
    ) {
        if let Some(r) = self.lock().runs.get_mut(&run_id) {
            r.run.state.life_cycle_state = life_cycle_state;
            r.run.state.result_state = result_state;
        }
    }

    /// Create a scope out of band, as another tool would.
    pub fn insert_scope(&self, scope: &str) {
        self.lock()
            .scopes
            .insert(scope.to_string(), MockScope::default());
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.lock().scopes.contains_key(scope)
    }

    pub fn secret(&self, scope: &str, key: &str) -> Option<SecretValue> {
        self.lock()
            .scopes
            .get(scope)
            .and_then(|s| s.secrets.get(key).cloned())
    }

    pub fn acl(&self, scope: &str, principal: &str) -> Option<AclPermission> {
        self.lock()
            .scopes
            .get(scope)
            .and_then(|s| s.acls.get(principal).copied())
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn object_content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(path).map(|o| o.content.clone())
    }
}


// ---------------------------------------------------------------------------
// Façade implementations
// ---------------------------------------------------------------------------

impl ClusterApi for MockRemote {
    fn create_cluster(&self, spec: &ClusterSpec) -> RemoteResult<ClusterInfo> {
        let mut st = self.lock();
        st.record("create_cluster", spec.cluster_name.clone())?;
        let id = st.next_id();
        let info = ClusterInfo {
            cluster_id: format!("cluster-{:04}", id),
            cluster_name: spec.cluster_name.clone(),
            state: ClusterState::Pending,
            state_message: "Starting".into(),
            num_workers: spec.num_workers,
            spark_version: spec.spark_version.clone(),
            node_type_id: spec.node_type_id.clone(),
            start_time_ms: None,
            terminated_time_ms: None,
        };
        st.clusters.insert(info.cluster_id.clone(), info.clone());
        Ok(info)
    }

    fn get_cluster(&self, cluster_id: &str) -> RemoteResult<ClusterInfo> {
        let mut st = self.lock();
        st.record("get_cluster", cluster_id)?;
        let auto_advance = st.auto_advance;
        let info = st
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("cluster {}", cluster_id)))?;
        if auto_advance && info.state == ClusterState::Pending {
            info.state = ClusterState::Running;
            info.state_message = String::new();
        }
        Ok(info.clone())
    }

    fn permanent_delete_cluster(&self, cluster_id: &str) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("permanent_delete_cluster", cluster_id)?;
        st.clusters
            .remove(cluster_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("cluster {}", cluster_id)))
    }
}

impl JobApi for MockRemote {
    fn create_job(&self, settings: &JobSettings) -> RemoteResult<i64> {
        let mut st = self.lock();
        st.record("create_job", settings.name.clone())?;
        let job_id = st.next_id();
        st.jobs.insert(
            job_id,
            Job {
                job_id,
                creator_user_name: "jobwarden".into(),
                settings: settings.clone(),
                created_time_ms: 0,
            },
        );
        Ok(job_id)
    }

    fn get_job(&self, job_id: i64) -> RemoteResult<Job> {
        let mut st = self.lock();
        st.record("get_job", job_id.to_string())?;
        st.jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| RemoteError::DoesNotExist(format!("job {}", job_id)))
    }

    fn reset_job(&self, job_id: i64, settings: &JobSettings) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("reset_job", job_id.to_string())?;
        let job = st
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("job {}", job_id)))?;
        job.settings = settings.clone();
        Ok(())
    }

    fn list_runs(&self, job_id: i64, limit: usize) -> RemoteResult<Vec<Run>> {
        let mut st = self.lock();
        st.record("list_runs", job_id.to_string())?;
        if !st.jobs.contains_key(&job_id) {
            return Err(RemoteError::DoesNotExist(format!("job {}", job_id)));
        }
        Ok(st
            .runs
            .values()
            .rev()
            .filter(|r| r.run.job_id == Some(job_id))
            .take(limit)
            .map(|r| r.run.clone())
            .collect())
    }

    fn delete_job(&self, job_id: i64) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_job", job_id.to_string())?;
        st.jobs
            .remove(&job_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("job {}", job_id)))
    }
}

impl RunApi for MockRemote {
    fn submit_run(&self, submission: &RunSubmission) -> RemoteResult<i64> {
        let mut st = self.lock();
        st.record("submit_run", submission.run_name.clone())?;
        if submission.task.is_empty() {
            return Err(RemoteError::Rejected("run has no task".into()));
        }
        let cluster_id = submission.existing_cluster_id.clone();
        Ok(st.new_run(None, submission.run_name.clone(), cluster_id))
    }

    fn run_now(&self, job_id: i64, _params: &RunParameters) -> RemoteResult<i64> {
        let mut st = self.lock();
        st.record("run_now", job_id.to_string())?;
        let job = st
            .jobs
            .get(&job_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("job {}", job_id)))?;
        let name = job.settings.name.clone();
        let cluster_id = job.settings.existing_cluster_id.clone();
        Ok(st.new_run(Some(job_id), name, cluster_id))
    }

    fn get_run(&self, run_id: i64) -> RemoteResult<Run> {
        let mut st = self.lock();
        st.record("get_run", run_id.to_string())?;
        st.poll_run(run_id)
    }

    fn get_run_output(&self, run_id: i64) -> RemoteResult<RunOutput> {
        let mut st = self.lock();
        st.record("get_run_output", run_id.to_string())?;
        let run = st.poll_run(run_id)?;
        let notebook_output = match run.state.result_state {
            Some(RunResultState::Success) => Some(NotebookOutput {
                result: "ok".into(),
                truncated: false,
            }),
            _ => None,
        };
        let error = match run.state.result_state {
            Some(RunResultState::Failed) => Some("task failed".into()),
            _ => None,
        };
        Ok(RunOutput {
            metadata: run,
            notebook_output,
            error,
        })
    }

    fn cancel_run(&self, run_id: i64) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("cancel_run", run_id.to_string())?;
        let entry = st
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("run {}", run_id)))?;
        if entry.run.state.result_state.is_none() {
            entry.cancel_requested = true;
            entry.run.state.life_cycle_state = RunLifeCycleState::Terminating;
        }
        Ok(())
    }

    fn delete_run(&self, run_id: i64) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_run", run_id.to_string())?;
        let entry = st
            .runs
            .get(&run_id)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("run {}", run_id)))?;
        if entry.run.state.result_state.is_none() {
            return Err(RemoteError::Rejected(format!(
                "run {} is still active",
                run_id
            )));
        }
        st.runs.remove(&run_id);
        Ok(())
    }
}

impl SecretsApi for MockRemote {
    fn create_scope(&self, scope: &str, initial_manage_principal: Option<&str>) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("create_scope", scope)?;
        if st.scopes.contains_key(scope) {
            return Err(RemoteError::AlreadyExists(format!("scope '{}'", scope)));
        }
        let mut created = MockScope::default();
        if let Some(principal) = initial_manage_principal {
            created
                .acls
                .insert(principal.to_string(), AclPermission::Manage);
        }
        st.scopes.insert(scope.to_string(), created);
        Ok(())
    }

    fn list_scopes(&self) -> RemoteResult<Vec<SecretScopeInfo>> {
        let mut st = self.lock();
        st.record("list_scopes", "")?;
        Ok(st
            .scopes
            .keys()
            .map(|name| SecretScopeInfo {
                name: name.clone(),
                backend_type: "DATABRICKS".into(),
            })
            .collect())
    }

    fn delete_scope(&self, scope: &str) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_scope", scope)?;
        st.scopes
            .remove(scope)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("scope '{}'", scope)))
    }

    fn list_secrets(&self, scope: &str) -> RemoteResult<Vec<SecretMetadata>> {
        let mut st = self.lock();
        st.record("list_secrets", scope)?;
        Ok(st
            .scope_mut(scope)?
            .secrets
            .keys()
            .map(|key| SecretMetadata {
                key: key.clone(),
                last_updated_timestamp: 0,
            })
            .collect())
    }

    fn put_secret(&self, scope: &str, key: &str, value: &SecretValue) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("put_secret", format!("{}/{}", scope, key))?;
        st.scope_mut(scope)?
            .secrets
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete_secret(&self, scope: &str, key: &str) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_secret", format!("{}/{}", scope, key))?;
        st.scope_mut(scope)?
            .secrets
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("secret '{}/{}'", scope, key)))
    }

    fn list_acls(&self, scope: &str) -> RemoteResult<Vec<AclItem>> {
        let mut st = self.lock();
        st.record("list_acls", scope)?;
        Ok(st
            .scope_mut(scope)?
            .acls
            .iter()
            .map(|(principal, permission)| AclItem {
                principal: principal.clone(),
                permission: *permission,
            })
            .collect())
    }

    fn put_acl(&self, scope: &str, principal: &str, permission: AclPermission) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("put_acl", format!("{}/{}", scope, principal))?;
        st.scope_mut(scope)?
            .acls
            .insert(principal.to_string(), permission);
        Ok(())
    }

    fn delete_acl(&self, scope: &str, principal: &str) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_acl", format!("{}/{}", scope, principal))?;
        st.scope_mut(scope)?
            .acls
            .remove(principal)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("acl '{}/{}'", scope, principal)))
    }
}

impl DbfsApi for MockRemote {
    fn open_handle(&self, path: &str, overwrite: bool) -> RemoteResult<i64> {
        let mut st = self.lock();
        st.record("open_handle", path)?;
        if !overwrite && st.files.contains_key(path) {
            return Err(RemoteError::AlreadyExists(format!("file {}", path)));
        }
        let handle = st.next_id();
        st.handles.insert(handle, (path.to_string(), Vec::new()));
        Ok(handle)
    }

    fn append_chunk(&self, handle: i64, data: &[u8]) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("append_chunk", handle.to_string())?;
        if data.len() > MAX_CHUNK_BYTES {
            return Err(RemoteError::Rejected(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_CHUNK_BYTES
            )));
        }
        let (_, buf) = st
            .handles
            .get_mut(&handle)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("handle {}", handle)))?;
        buf.extend_from_slice(data);
        Ok(())
    }

    fn close_handle(&self, handle: i64) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("close_handle", handle.to_string())?;
        let (path, data) = st
            .handles
            .remove(&handle)
            .ok_or_else(|| RemoteError::DoesNotExist(format!("handle {}", handle)))?;
        st.files.insert(path, data);
        Ok(())
    }

    fn get_file_status(&self, path: &str) -> RemoteResult<FileInfo> {
        let mut st = self.lock();
        st.record("get_file_status", path)?;
        st.files
            .get(path)
            .map(|data| FileInfo {
                path: path.to_string(),
                is_dir: false,
                file_size: data.len() as u64,
            })
            .ok_or_else(|| RemoteError::DoesNotExist(format!("file {}", path)))
    }

    fn delete_file(&self, path: &str, _recursive: bool) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_file", path)?;
        st.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("file {}", path)))
    }
}

impl WorkspaceApi for MockRemote {
    fn import(
        &self,
        path: &str,
        language: Option<Language>,
        _format: ExportFormat,
        content: &[u8],
        overwrite: bool,
    ) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("import", path)?;
        if !overwrite && st.objects.contains_key(path) {
            return Err(RemoteError::AlreadyExists(format!("object {}", path)));
        }
        let object_id = st.next_id();
        let object_type = if language.is_some() {
            ObjectType::Notebook
        } else {
            ObjectType::File
        };
        st.objects.insert(
            path.to_string(),
            MockObject {
                info: ObjectInfo {
                    path: path.to_string(),
                    object_type,
                    language,
                    object_id,
                },
                content: content.to_vec(),
            },
        );
        Ok(())
    }

    fn get_object_status(&self, path: &str) -> RemoteResult<ObjectInfo> {
        let mut st = self.lock();
        st.record("get_object_status", path)?;
        st.objects
            .get(path)
            .map(|o| o.info.clone())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("object {}", path)))
    }

    fn delete_object(&self, path: &str, _recursive: bool) -> RemoteResult<()> {
        let mut st = self.lock();
        st.record("delete_object", path)?;
        st.objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::DoesNotExist(format!("object {}", path)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::models::{JobTask, NotebookTask};

    fn notebook_submission(name: &str) -> RunSubmission {
        RunSubmission {
            run_name: name.into(),
            existing_cluster_id: Some("cluster-0001".into()),
            new_cluster: None,
            libraries: Vec::new(),
            task: JobTask {
                notebook_task: Some(NotebookTask {
                    notebook_path: "/nb".into(),
                    base_parameters: BTreeMap::new(),
                }),
                ..JobTask::default()
            },
            timeout_seconds: 0,
        }
    }

    #[test]
    fn records_calls_and_classifies_mutations() {
        let mock = MockRemote::new();
        let info = mock
            .create_cluster(&ClusterSpec {
                cluster_name: "etl".into(),
                ..ClusterSpec::default()
            })
            .unwrap();
        mock.get_cluster(&info.cluster_id).unwrap();
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(mock.mutating_calls().len(), 1);
        assert_eq!(mock.calls_to("get_cluster"), 1);
    }

    #[test]
    fn injected_failure_fires_once() {
        let mock = MockRemote::new();
        mock.fail_next("list_scopes", RemoteError::Transient("timeout".into()));
        assert!(mock.list_scopes().is_err());
        assert!(mock.list_scopes().is_ok());
    }

    #[test]
    fn cancel_takes_effect_on_next_poll() {
        let mock = MockRemote::new();
        let run_id = mock.submit_run(&notebook_submission("r")).unwrap();
        mock.cancel_run(run_id).unwrap();
        assert_eq!(
            mock.run(run_id).unwrap().state.life_cycle_state,
            RunLifeCycleState::Terminating
        );
        let run = mock.get_run(run_id).unwrap();
        assert_eq!(run.state.result_state, Some(RunResultState::Canceled));
        assert_eq!(run.state.life_cycle_state, RunLifeCycleState::Terminated);
    }

    #[test]
    fn delete_of_active_run_is_rejected() {
        let mock = MockRemote::new();
        let run_id = mock.submit_run(&notebook_submission("r")).unwrap();
        assert!(matches!(
            mock.delete_run(run_id),
            Err(RemoteError::Rejected(_))
        ));
        mock.set_run_state(
            run_id,
            RunLifeCycleState::Terminated,
            Some(RunResultState::Success),
        );
        mock.delete_run(run_id).unwrap();
        assert!(mock.delete_run(run_id).unwrap_err().is_does_not_exist());
    }

    #[test]
    fn auto_advance_completes_runs() {
        let mock = MockRemote::auto_advancing();
        let run_id = mock.submit_run(&notebook_submission("r")).unwrap();
        assert_eq!(
            mock.get_run(run_id).unwrap().state.life_cycle_state,
            RunLifeCycleState::Running
        );
        let out = mock.get_run_output(run_id).unwrap();
        assert_eq!(out.metadata.state.result_state, Some(RunResultState::Success));
        assert_eq!(out.notebook_output.unwrap().result, "ok");
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let mock = MockRemote::new();
        let handle = mock.open_handle("/blocks/a", true).unwrap();
        assert!(mock.append_chunk(handle, &[0u8; 1001]).is_err());
        mock.append_chunk(handle, &[1u8; 1000]).unwrap();
        mock.close_handle(handle).unwrap();
        assert_eq!(mock.get_file_status("/blocks/a").unwrap().file_size, 1000);
    }

    #[test]
    fn duplicate_scope_is_already_exists() {
        let mock = MockRemote::new();
        mock.create_scope("prod", Some("users")).unwrap();
        assert_eq!(mock.acl("prod", "users"), Some(AclPermission::Manage));
        assert!(matches!(
            mock.create_scope("prod", None),
            Err(RemoteError::AlreadyExists(_))
        ));
    }

    #[test]
    fn list_runs_is_newest_first_and_limited() {
        let mock = MockRemote::new();
        let job_id = mock.create_job(&JobSettings::default()).unwrap();
        let first = mock.run_now(job_id, &RunParameters::default()).unwrap();
        let second = mock.run_now(job_id, &RunParameters::default()).unwrap();
        let runs = mock.list_runs(job_id, 1).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, second);
        assert!(first < second);
        assert_eq!(runs[0].number_in_job, 2);
    }
}
