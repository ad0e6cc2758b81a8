//! Call and reconcile statistics.
//!
//! Collectors are passed in explicitly; there is no process-wide registry.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

pub trait StatsCollector: Send + Sync {
    /// One remote call, e.g. `("job", "create")`.
    fn record_call(&self, object_type: &str, action: &str, outcome: Outcome, elapsed: Duration);
    /// One reconcile pass of a resource of `kind`.
    fn record_reconcile(&self, kind: &str, outcome: Outcome, elapsed: Duration);
}

/// Times one remote call and reports it when finished.
pub struct Execution<'a> {
    stats: &'a dyn StatsCollector,
    object_type: &'static str,
    action: &'static str,
    started: Instant,
}

impl<'a> Execution<'a> {
    pub fn start(stats: &'a dyn StatsCollector, object_type: &'static str, action: &'static str) -> Self {
        Execution {
            stats,
            object_type,
            action,
            started: Instant::now(),
        }
    }

    pub fn finish<T, E>(self, result: &Result<T, E>) {
        self.stats.record_call(
            self.object_type,
            self.action,
            Outcome::of(result),
            self.started.elapsed(),
        );
    }
}


// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub success: u64,
    pub failure: u64,
    pub total_ms: u64,
}

impl Counter {
    fn add(&mut self, outcome: Outcome, elapsed: Duration) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
        }
        self.total_ms += elapsed.as_millis() as u64;
    }

    pub fn count(&self) -> u64 {
        self.success + self.failure
    }
}

#[derive(Debug, Default)]
struct Tables {
    calls: BTreeMap<(String, String), Counter>,
    reconciles: BTreeMap<String, Counter>,
}

/// Aggregates counts and durations in memory.
#[derive(Debug, Default)]
pub struct MemoryStats {
    tables: Mutex<Tables>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, object_type: &str, action: &str) -> Counter {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .get(&(object_type.to_string(), action.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn reconciles(&self, kind: &str) -> Counter {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconciles
            .get(kind)
            .copied()
            .unwrap_or_default()
    }

    /// Per-call counters as `("object_type.action", counter)` pairs.
    pub fn call_summary(&self) -> Vec<(String, Counter)> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .iter()
            .map(|((t, a), c)| (format!("{}.{}", t, a), *c))
            .collect()
    }
}

impl StatsCollector for MemoryStats {
    fn record_call(&self, object_type: &str, action: &str, outcome: Outcome, elapsed: Duration) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .entry((object_type.to_string(), action.to_string()))
            .or_default()
            .add(outcome, elapsed);
    }

    fn record_reconcile(&self, kind: &str, outcome: Outcome, elapsed: Duration) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconciles
            .entry(kind.to_string())
            .or_default()
            .add(outcome, elapsed);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_records_outcome() {
        let stats = MemoryStats::new();
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());
        Execution::start(&stats, "job", "create").finish(&ok);
        Execution::start(&stats, "job", "create").finish(&err);
        Execution::start(&stats, "job", "get").finish(&ok);

        let create = stats.calls("job", "create");
        assert_eq!(create.success, 1);
        assert_eq!(create.failure, 1);
        assert_eq!(stats.calls("job", "get").count(), 1);
        assert_eq!(stats.calls("run", "get").count(), 0);
    }

    #[test]
    fn reconcile_counters() {
        let stats = MemoryStats::new();
        stats.record_reconcile("cluster", Outcome::Success, Duration::from_millis(5));
        stats.record_reconcile("cluster", Outcome::Failure, Duration::from_millis(7));
        let c = stats.reconciles("cluster");
        assert_eq!(c.count(), 2);
        assert_eq!(c.total_ms, 12);
    }

    #[test]
    fn summary_keys() {
        let stats = MemoryStats::new();
        stats.record_call("scope", "put_secret", Outcome::Success, Duration::ZERO);
        let summary = stats.call_summary();
        assert_eq!(summary[0].0, "scope.put_secret");
    }
}
