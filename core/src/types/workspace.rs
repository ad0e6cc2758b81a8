use serde::{Deserialize, Serialize};

use super::resource::{Kind, Resource};
use crate::remote::models::{ExportFormat, Language, ObjectInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkspaceItemKind;

impl Kind for WorkspaceItemKind {
    type Spec = WorkspaceItemSpec;
    type Detail = ObjectInfo;
    const KIND: &'static str = "workspace_item";
    const FINALIZER: &'static str = "workspace-item.finalizers.jobwarden.io";
}

pub type WorkspaceItem = Resource<WorkspaceItemKind>;

/// A notebook or file imported into the workspace tree. `content` is base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceItemSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default)]
    pub format: ExportFormat,
    pub content: String,
}
