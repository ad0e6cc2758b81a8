use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergence::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// Upper bound on any settle sleep after a multi-step remote write.
pub const MAX_SETTLE_DELAY_MS: u64 = 15_000;

/// Engine configuration. Every field has a default so a partial YAML file
/// (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Steady-state polling interval for kinds that track remote progress.
    pub requeue_interval_secs: u64,
    /// Delay after a reference resolved to a not-yet-submitted resource.
    pub not_ready_delay_secs: u64,
    /// Delay between teardown passes while a remote run is being canceled.
    pub teardown_poll_secs: u64,
    /// Bounded sleep after a multi-step write, before the status read.
    pub settle_delay_ms: u64,
    pub block_chunk_size: usize,
    /// How many recent runs a job refresh fetches.
    pub job_run_history: usize,
    /// Re-read/recompute attempts when a status write hits a version conflict.
    pub conflict_retries: u32,
    pub workers_per_kind: usize,
    pub resync_interval_secs: u64,
    pub backoff: RetryPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            requeue_interval_secs: 30,
            not_ready_delay_secs: 10,
            teardown_poll_secs: 15,
            settle_delay_ms: 1000,
            block_chunk_size: 1000,
            job_run_history: 10,
            conflict_retries: 3,
            workers_per_kind: 2,
            resync_interval_secs: 300,
            backoff: RetryPolicy::default(),
            event_log: None,
        }
    }
}

impl Settings {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_secs(self.not_ready_delay_secs)
    }

    pub fn teardown_poll(&self) -> Duration {
        Duration::from_secs(self.teardown_poll_secs)
    }

    /// Never longer than [`MAX_SETTLE_DELAY_MS`], whatever was configured.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.min(MAX_SETTLE_DELAY_MS))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}
