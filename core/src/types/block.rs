use serde::{Deserialize, Serialize};

use super::resource::{Kind, Resource};
use crate::remote::models::FileInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockKind;

impl Kind for BlockKind {
    type Spec = BlockSpec;
    type Detail = FileInfo;
    const KIND: &'static str = "block";
    const FINALIZER: &'static str = "block.finalizers.jobwarden.io";
}

pub type Block = Resource<BlockKind>;

/// A file uploaded verbatim. `data` is base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub path: String,
    pub data: String,
}
