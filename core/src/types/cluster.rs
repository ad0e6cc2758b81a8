use serde::{Deserialize, Serialize};

use super::resource::{Kind, Resource};
use crate::remote::models::{ClusterInfo, ClusterSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterKind;

impl Kind for ClusterKind {
    type Spec = ClusterSpec;
    type Detail = ClusterInfo;
    const KIND: &'static str = "cluster";
    const FINALIZER: &'static str = "cluster.finalizers.jobwarden.io";
}

pub type Cluster = Resource<ClusterKind>;

/// The spec actually sent on create: the cluster name falls back to the
/// resource name.
pub fn effective_spec(cluster: &Cluster) -> ClusterSpec {
    let mut spec = cluster.spec.clone();
    if spec.cluster_name.is_empty() {
        spec.cluster_name = cluster.identity.name.clone();
    }
    spec
}

/// Cluster references used by jobs and runs. A name refers to a cluster
/// resource in the same namespace; a remote ID must match exactly one
/// cluster resource's `status.remote_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}
