//! Loading, validating and saving [`Settings`].

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::remote::MAX_CHUNK_BYTES;
use crate::types::config::{Settings, MAX_SETTLE_DELAY_MS};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "JW_CONFIG";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Load and validate settings from a YAML file.
pub fn load(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Parse and validate settings from YAML text. Missing fields take their
/// defaults; a document with nothing but comments yields the defaults.
pub fn parse(content: &str) -> Result<Settings, SettingsError> {
    let blank = content
        .lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#'));
    if blank {
        return Ok(Settings::default());
    }
    let settings: Settings = serde_yaml::from_str(content)?;
    settings.validate()
}

pub fn save(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let content = serde_yaml::to_string(settings)?;
    std::fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Load from `explicit` if given, else from `$JW_CONFIG`, else defaults.
pub fn resolve(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => load(&path),
        None => Ok(Settings::default()),
    }
}

impl Settings {
    /// Reject unusable values and clamp the ones with hard ceilings.
    pub fn validate(mut self) -> Result<Self, SettingsError> {
        fn positive(field: &'static str, value: u64) -> Result<(), SettingsError> {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }
        positive("requeue_interval_secs", self.requeue_interval_secs)?;
        positive("resync_interval_secs", self.resync_interval_secs)?;
        positive("workers_per_kind", self.workers_per_kind as u64)?;
        positive("block_chunk_size", self.block_chunk_size as u64)?;
        positive("job_run_history", self.job_run_history as u64)?;
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(SettingsError::Invalid {
                field: "backoff.max_delay_ms",
                reason: format!(
                    "{} is below base_delay_ms {}",
                    self.backoff.max_delay_ms, self.backoff.base_delay_ms
                ),
            });
        }
        if self.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            warn!(
                configured = self.settle_delay_ms,
                cap = MAX_SETTLE_DELAY_MS,
                "settle_delay_ms clamped"
            );
            self.settle_delay_ms = MAX_SETTLE_DELAY_MS;
        }
        if self.block_chunk_size > MAX_CHUNK_BYTES {
            warn!(
                configured = self.block_chunk_size,
                cap = MAX_CHUNK_BYTES,
                "block_chunk_size clamped"
            );
            self.block_chunk_size = MAX_CHUNK_BYTES;
        }
        Ok(self)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::BackoffStrategy;

    #[test]
    fn empty_is_default() {
        assert_eq!(parse("").unwrap(), Settings::default());
        assert_eq!(parse("# nothing\n").unwrap(), Settings::default());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let s = parse(
            "requeue_interval_secs: 5\nbackoff:\n  strategy: linear\n  base_delay_ms: 200\n",
        )
        .unwrap();
        assert_eq!(s.requeue_interval_secs, 5);
        assert_eq!(s.not_ready_delay_secs, 10);
        assert_eq!(s.backoff.strategy, BackoffStrategy::Linear);
        assert_eq!(s.backoff.base_delay_ms, 200);
        assert_eq!(s.backoff.max_delay_ms, 300_000);
    }

    #[test]
    fn clamps_hard_ceilings() {
        let s = parse("settle_delay_ms: 90000\nblock_chunk_size: 4096\n").unwrap();
        assert_eq!(s.settle_delay_ms, 15_000);
        assert_eq!(s.block_chunk_size, 1000);
    }

    #[test]
    fn rejects_zero_interval() {
        let err = parse("requeue_interval_secs: 0\n").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "requeue_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(matches!(
            parse("backoff:\n  strategy: random\n"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jw.yaml");
        let settings = Settings {
            workers_per_kind: 4,
            event_log: Some(dir.path().join("events.jsonl")),
            ..Settings::default()
        };
        save(&path, &settings).unwrap();
        assert_eq!(load(&path).unwrap(), settings);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent.yaml")),
            Err(SettingsError::Read { .. })
        ));
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jw.yaml");
        std::fs::write(&path, "conflict_retries: 7\n").unwrap();
        assert_eq!(resolve(Some(path.as_path())).unwrap().conflict_retries, 7);
    }
}
