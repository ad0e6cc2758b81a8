use serde::{Deserialize, Serialize};

use super::resource::{Kind, Resource};
use crate::remote::models::AclItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecretScopeKind;

impl Kind for SecretScopeKind {
    type Spec = SecretScopeSpec;
    type Detail = SecretScopeDetail;
    const KIND: &'static str = "secret_scope";
    const FINALIZER: &'static str = "secret-scope.finalizers.jobwarden.io";
}

pub type SecretScope = Resource<SecretScopeKind>;

/// A secret container. The scope name is the resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretScopeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_manage_principal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<ScopeSecret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acls: Vec<ScopeAcl>,
}

/// One secret. Exactly one of the value sources should be set; when several
/// are, `string_value` wins over `byte_value`, which wins over `value_from`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSecret {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Base64-encoded bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<SecretKeyRef>,
}

/// Points at a key of a locally stored secret in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Permission is kept as written so a bad value can be reported instead of
/// failing to parse the whole resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeAcl {
    pub principal: String,
    pub permission: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretScopeDetail {
    #[serde(default)]
    pub backend_type: String,
    #[serde(default)]
    pub secret_keys: Vec<String>,
    #[serde(default)]
    pub acls: Vec<AclItem>,
}
