//! Multi-document YAML manifests for the simulator.
//!
//! ```yaml
//! kind: cluster
//! name: etl
//! spec:
//!   spark_version: 13.3.x-scala2.12
//!   node_type_id: Standard_D3_v2
//!   num_workers: 2
//! ---
//! kind: secret
//! name: db
//! data:
//!   password: hunter2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use jobwarden_core::remote::models::ClusterSpec;
use jobwarden_core::store::memory::{MemorySecrets, MemoryStore};
use jobwarden_core::types::block::{BlockKind, BlockSpec};
use jobwarden_core::types::cluster::ClusterKind;
use jobwarden_core::types::job::{JobKind, JobSpec};
use jobwarden_core::types::run::{RunKind, RunSpec};
use jobwarden_core::types::secret_scope::{SecretScopeKind, SecretScopeSpec};
use jobwarden_core::types::workspace::{WorkspaceItemKind, WorkspaceItemSpec};
use jobwarden_core::types::{Identity, Kind};

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound = "S: DeserializeOwned")]
pub struct Entry<S> {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub spec: S,
}

impl<S> Entry<S> {
    pub fn identity(&self) -> Identity {
        Identity::new(self.namespace.clone(), self.name.clone())
    }
}

/// A locally stored secret that secret scopes can copy values from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecretEntry {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Manifest {
    Cluster(Entry<ClusterSpec>),
    Job(Entry<JobSpec>),
    Run(Entry<RunSpec>),
    Block(Entry<BlockSpec>),
    WorkspaceItem(Entry<WorkspaceItemSpec>),
    SecretScope(Entry<SecretScopeSpec>),
    Secret(SecretEntry),
}

/// Parse every document in `text`. Empty documents are skipped.
pub fn parse(text: &str) -> Result<Vec<Manifest>, String> {
    let mut manifests = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(doc)
            .map_err(|e| format!("document {}: {}", i + 1, e))?;
        if value.is_null() {
            continue;
        }
        let manifest = serde_yaml::from_value(value)
            .map_err(|e| format!("document {}: {}", i + 1, e))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

pub fn load(path: &Path) -> Result<Vec<Manifest>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse(&text).map_err(|e| format!("{}: {}", path.display(), e))
}


// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

/// Stores and local secrets populated from manifests.
#[derive(Debug, Default)]
pub struct World {
    pub clusters: std::sync::Arc<MemoryStore<ClusterKind>>,
    pub jobs: std::sync::Arc<MemoryStore<JobKind>>,
    pub runs: std::sync::Arc<MemoryStore<RunKind>>,
    pub blocks: std::sync::Arc<MemoryStore<BlockKind>>,
    pub workspace_items: std::sync::Arc<MemoryStore<WorkspaceItemKind>>,
    pub secret_scopes: std::sync::Arc<MemoryStore<SecretScopeKind>>,
    pub secrets: std::sync::Arc<MemorySecrets>,
}

fn create<K: Kind>(store: &MemoryStore<K>, entry: Entry<K::Spec>) -> Result<(), String> {
    let id = entry.identity();
    store
        .create(id, entry.spec)
        .map(|_| ())
        .map_err(|e| format!("{} {}", K::KIND, e))
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, manifests: Vec<Manifest>) -> Result<(), String> {
        for manifest in manifests {
            match manifest {
                Manifest::Cluster(e) => create(&self.clusters, e)?,
                Manifest::Job(e) => create(&self.jobs, e)?,
                Manifest::Run(e) => create(&self.runs, e)?,
                Manifest::Block(e) => create(&self.blocks, e)?,
                Manifest::WorkspaceItem(e) => create(&self.workspace_items, e)?,
                Manifest::SecretScope(e) => create(&self.secret_scopes, e)?,
                Manifest::Secret(s) => {
                    let id = Identity::new(s.namespace, s.name);
                    for (key, value) in s.data {
                        self.secrets.put(id.clone(), &key, value);
                    }
                }
            }
        }
        Ok(())
    }

    /// Ask for deletion of every record.
    pub fn delete_all(&self) -> Result<(), String> {
        fn each<K: Kind>(store: &MemoryStore<K>) -> Result<(), String> {
            use jobwarden_core::store::ResourceStore;
            let all = store.list(None).map_err(|e| e.to_string())?;
            for r in all {
                store.request_deletion(&r.identity).map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        // Dependents first, so runs are canceled before their jobs go.
        each(&self.runs)?;
        each(&self.jobs)?;
        each(&self.clusters)?;
        each(&self.blocks)?;
        each(&self.workspace_items)?;
        each(&self.secret_scopes)
    }

    pub fn remaining(&self) -> usize {
        self.clusters.len()
            + self.jobs.len()
            + self.runs.len()
            + self.blocks.len()
            + self.workspace_items.len()
            + self.secret_scopes.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use jobwarden_core::store::{ResourceStore, SecretSource};

    const SAMPLE: &str = r#"
kind: cluster
name: etl
spec:
  spark_version: 13.3.x-scala2.12
  node_type_id: Standard_D3_v2
  num_workers: 2
---
kind: job
name: nightly
namespace: analytics
spec:
  existing_cluster:
    name: etl
  notebook_task:
    notebook_path: /etl/nightly
---
kind: block
name: lib
spec:
  path: /libs/a.txt
  data: dGVzdA==
---
kind: secret
name: db
data:
  password: hunter2
---
"#;

    #[test]
    fn parses_every_kind_and_skips_empty_documents() {
        let manifests = parse(SAMPLE).unwrap();
        assert_eq!(manifests.len(), 4);
        match &manifests[1] {
            Manifest::Job(e) => {
                assert_eq!(e.namespace, "analytics");
                assert_eq!(e.spec.settings.task.notebook_task.as_ref().unwrap().notebook_path, "/etl/nightly");
            }
            other => panic!("expected a job, got {:?}", other),
        }
        match &manifests[0] {
            Manifest::Cluster(e) => assert_eq!(e.namespace, "default"),
            other => panic!("expected a cluster, got {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_names_the_document() {
        let err = parse("kind: cluster\nname: a\nspec: {spark_version: x, node_type_id: y}\n---\nkind: pipeline\nname: b\n").unwrap_err();
        assert!(err.starts_with("document 2"), "{}", err);
    }

    #[test]
    fn apply_populates_stores_and_secrets() {
        let world = World::new();
        world.apply(parse(SAMPLE).unwrap()).unwrap();
        assert_eq!(world.clusters.len(), 1);
        assert_eq!(world.jobs.list(Some("analytics")).unwrap().len(), 1);
        assert_eq!(world.remaining(), 3);
        assert_eq!(
            world.secrets.secret_value("default", "db", "password").unwrap(),
            Some(b"hunter2".to_vec())
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let world = World::new();
        let twice = format!("{}\n---\n{}", "kind: block\nname: a\nspec: {path: /a, data: ''}", "kind: block\nname: a\nspec: {path: /b, data: ''}");
        assert!(world.apply(parse(&twice).unwrap()).is_err());
    }

    #[test]
    fn load_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(load(&path).unwrap().len(), 4);
        assert!(load(&dir.path().join("missing.yaml")).is_err());
    }
}
