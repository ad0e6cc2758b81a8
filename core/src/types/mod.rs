//! Resource envelope, the six managed kinds and engine configuration.

pub mod block;
pub mod cluster;
pub mod config;
pub mod job;
pub mod resource;
pub mod run;
pub mod secret_scope;
pub mod workspace;

pub use resource::{Identity, Kind, OwnerReference, Resource, Status};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
