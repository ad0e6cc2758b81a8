//! Lifecycle events emitted while reconciling.
//!
//! Events are informational: losing one never affects convergence. The
//! JSONL recorder appends one JSON object per line and `load_events` skips
//! lines it cannot parse, so a torn write costs one event, not the log.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::{now_ms, Kind, Resource};


// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Guard attached; the resource is now managed.
    Added,
    Submitted,
    Refreshed,
    Deleted,
    Failed,
    /// Waiting on a referenced resource.
    Waiting,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Added => write!(f, "Added"),
            Reason::Submitted => write!(f, "Submitted"),
            Reason::Refreshed => write!(f, "Refreshed"),
            Reason::Deleted => write!(f, "Deleted"),
            Reason::Failed => write!(f, "Failed"),
            Reason::Waiting => write!(f, "Waiting"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub timestamp_ms: u64,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub event_type: EventType,
    pub reason: Reason,
    pub message: String,
}

impl Event {
    pub fn for_resource<K: Kind>(
        resource: &Resource<K>,
        event_type: EventType,
        reason: Reason,
        message: impl Into<String>,
    ) -> Self {
        Event {
            timestamp_ms: now_ms(),
            kind: K::KIND.to_string(),
            namespace: resource.identity.namespace.clone(),
            name: resource.identity.name.clone(),
            event_type,
            reason,
            message: message.into(),
        }
    }
}


// ---------------------------------------------------------------------------
// Recorders
// ---------------------------------------------------------------------------

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Keeps events in memory. Used by tests and the simulator.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reasons recorded for one resource, oldest first.
    pub fn reasons_for(&self, kind: &str, name: &str) -> Vec<Reason> {
        self.events()
            .iter()
            .filter(|e| e.kind == kind && e.name == name)
            .map(|e| e.reason)
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Appends events to a JSON-lines file.
#[derive(Debug)]
pub struct JsonlRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlRecorder {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventRecorder for JsonlRecorder {
    fn record(&self, event: Event) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = append_event(&self.path, &event) {
            warn!(path = %self.path.display(), error = %e, "failed to record event");
        }
    }
}


// ---------------------------------------------------------------------------
// JSONL persistence helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append a single event as a JSON line, creating parent directories.
pub fn append_event(path: &Path, event: &Event) -> Result<(), EventLogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(event)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Load all events from a JSONL file. Blank and malformed lines are
/// skipped; a missing file yields no events.
pub fn load_events(path: &Path) -> Result<Vec<Event>, EventLogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path)?;
    let mut events = Vec::new();
    for (i, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(line = i + 1, path = %path.display(), error = %e, "skipping malformed event line");
            }
        }
    }
    Ok(events)
}
