use serde::{Deserialize, Serialize};

use super::cluster::ClusterRef;
use super::resource::{Kind, Resource};
use crate::remote::models::{ClusterSpec, JobTask, Library, RunOutput, RunParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunKind;

impl Kind for RunKind {
    type Spec = RunSpec;
    type Detail = RunOutput;
    const KIND: &'static str = "run";
    const FINALIZER: &'static str = "run.finalizers.jobwarden.io";
}

pub type Run = Resource<RunKind>;

/// A one-off execution. Either triggers a job resource (`job_name`) or is
/// submitted directly with its own task and cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default)]
    pub parameters: RunParameters,
    /// Defaults to the resource name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster: Option<ClusterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<ClusterSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Library>,
    #[serde(flatten)]
    pub task: JobTask,
    #[serde(default)]
    pub timeout_seconds: u32,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_triggered_run_from_yaml() {
        let yaml = r#"
job_name: nightly
parameters:
  notebook_params:
    day: "2024-01-01"
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.job_name.as_deref(), Some("nightly"));
        assert_eq!(spec.parameters.notebook_params["day"], "2024-01-01");
        assert!(spec.task.is_empty());
    }
}
