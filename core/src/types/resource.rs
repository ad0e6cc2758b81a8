//! The resource envelope shared by every managed kind.
//!
//! A `Resource<K>` pairs an author-owned spec with an engine-owned status,
//! plus the metadata the finalizer protocol needs: a set of guard tokens, a
//! monotonic deletion flag and an optimistic-concurrency version.

use std::collections::BTreeSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Static description of one managed resource kind.
pub trait Kind: fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    /// Desired state written by the author.
    type Spec: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Kind-specific part of the observed state.
    type Detail: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Short lowercase name used in logs, events and manifests.
    const KIND: &'static str;
    /// Guard token that blocks erasure until remote teardown finished.
    const FINALIZER: &'static str;
}


// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Identity {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Records that a resource depends on another one. Lets cascading cleanup
/// find dependents without re-resolving references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub remote_id: String,
}


// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Observed state. Written only by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "D: Serialize", deserialize = "D: DeserializeOwned"))]
pub struct Status<D> {
    /// Identifier assigned by the remote service; empty until a create was
    /// acknowledged.
    #[serde(default)]
    pub remote_id: String,
    #[serde(default)]
    pub remote_state: String,
    /// Fingerprint of the spec content that produced the remote object.
    #[serde(default)]
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<D>,
}

impl<D> Default for Status<D> {
    fn default() -> Self {
        Status {
            remote_id: String::new(),
            remote_state: String::new(),
            content_hash: String::new(),
            last_refreshed_ms: None,
            last_error: None,
            detail: None,
        }
    }
}


// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Resource<K: Kind> {
    pub identity: Identity,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    pub spec: K::Spec,
    #[serde(default)]
    pub status: Status<K::Detail>,
}

impl<K: Kind> Resource<K> {
    pub fn new(identity: Identity, spec: K::Spec) -> Self {
        Resource {
            identity,
            finalizers: BTreeSet::new(),
            deletion_requested: false,
            resource_version: 0,
            owner_references: Vec::new(),
            spec,
            status: Status::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        K::KIND
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.contains(K::FINALIZER)
    }

    /// Returns true if the token was not already present.
    pub fn add_finalizer(&mut self) -> bool {
        self.finalizers.insert(K::FINALIZER.to_string())
    }

    /// Returns true if the token was present.
    pub fn remove_finalizer(&mut self) -> bool {
        self.finalizers.remove(K::FINALIZER)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_requested
    }

    /// A create call has been acknowledged by the remote service.
    pub fn is_submitted(&self) -> bool {
        !self.status.remote_id.is_empty()
    }

    /// Record (or refresh) the owner of the given kind.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.owner_references.retain(|o| o.kind != owner.kind);
        self.owner_references.push(owner);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget;

    impl Kind for Widget {
        type Spec = String;
        type Detail = u32;
        const KIND: &'static str = "widget";
        const FINALIZER: &'static str = "widget.finalizers.test";
    }

    #[test]
    fn identity_display() {
        assert_eq!(Identity::new("prod", "etl").to_string(), "prod/etl");
    }

    #[test]
    fn finalizer_add_remove() {
        let mut r: Resource<Widget> = Resource::new(Identity::new("ns", "w"), "x".into());
        assert!(!r.has_finalizer());
        assert!(r.add_finalizer());
        assert!(!r.add_finalizer());
        assert!(r.has_finalizer());
        assert!(r.remove_finalizer());
        assert!(!r.has_finalizer());
    }

    #[test]
    fn submitted_tracks_remote_id() {
        let mut r: Resource<Widget> = Resource::new(Identity::new("ns", "w"), "x".into());
        assert!(!r.is_submitted());
        r.status.remote_id = "42".into();
        assert!(r.is_submitted());
    }

    #[test]
    fn set_owner_replaces_same_kind() {
        let mut r: Resource<Widget> = Resource::new(Identity::new("ns", "w"), "x".into());
        r.set_owner(OwnerReference {
            kind: "cluster".into(),
            name: "a".into(),
            remote_id: "c-1".into(),
        });
        r.set_owner(OwnerReference {
            kind: "cluster".into(),
            name: "b".into(),
            remote_id: "c-2".into(),
        });
        assert_eq!(r.owner_references.len(), 1);
        assert_eq!(r.owner_references[0].name, "b");
    }

    /// Detail types need not implement `Default`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gauge {
        level: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Meter;

    impl Kind for Meter {
        type Spec = String;
        type Detail = Gauge;
        const KIND: &'static str = "meter";
        const FINALIZER: &'static str = "meter.finalizers.test";
    }

    #[test]
    fn detail_without_default_deserializes() {
        let json = r#"{"identity":{"namespace":"ns","name":"m"},"spec":"x","status":{"remote_id":"7","detail":{"level":3}}}"#;
        let r: Resource<Meter> = serde_json::from_str(json).unwrap();
        assert_eq!(r.status.remote_id, "7");
        assert_eq!(r.status.detail, Some(Gauge { level: 3 }));

        let bare: Resource<Meter> =
            serde_json::from_str(r#"{"identity":{"namespace":"ns","name":"m"},"spec":"x"}"#).unwrap();
        assert!(bare.status.detail.is_none());
    }

    #[test]
    fn serde_without_status() {
        let json = r#"{"identity":{"namespace":"ns","name":"w"},"spec":"payload"}"#;
        let r: Resource<Widget> = serde_json::from_str(json).unwrap();
        assert_eq!(r.spec, "payload");
        assert_eq!(r.status, Status::default());
        assert!(r.finalizers.is_empty());
    }
}
