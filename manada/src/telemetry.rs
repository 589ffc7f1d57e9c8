//! Concurrent per-action telemetry sink.
//!
//! Every run-loop records into the same [`TelemetryCollector`]. Contention is kept
//! low by sharding on two levels: the action map is a `DashMap` (sharded locks), and
//! each action owns its own short mutex around an [`ActionAggregate`]. Recording two
//! different actions never touches the same lock, and a snapshot only holds one
//! action's lock for the time it takes to clone its aggregate.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    aggregate::{ActionAggregate, Aggregate},
    error::ErrorKind,
    metric::Outcome,
};

#[derive(Debug)]
pub struct TelemetryCollector {
    actions: DashMap<Arc<str>, Mutex<ActionAggregate>>,
    started: Instant,
}

/// Point-in-time copy of every action's aggregate.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub actions: BTreeMap<String, ActionAggregate>,
    pub elapsed: Duration,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// Record one outcome. Safe to call concurrently from every run-loop.
    pub fn record(&self, outcome: &Outcome) {
        if let Some(entry) = self.actions.get(&outcome.action) {
            entry.lock().consume(outcome);
            return;
        }
        self.actions
            .entry(Arc::clone(&outcome.action))
            .or_insert_with(|| Mutex::new(ActionAggregate::new()))
            .lock()
            .consume(outcome);
    }

    /// Convenience wrapper building the [`Outcome`] in place.
    pub fn record_result(
        &self,
        action: &Arc<str>,
        duration: Duration,
        error_kind: Option<ErrorKind>,
    ) {
        let outcome = match error_kind {
            None => Outcome::success(Arc::clone(action), duration),
            Some(kind) => Outcome::failure(Arc::clone(action), duration, kind),
        };
        self.record(&outcome);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let actions = self
            .actions
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().lock().clone()))
            .collect();
        TelemetrySnapshot {
            actions,
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySnapshot {
    /// All actions merged into one aggregate.
    pub fn total(&self) -> ActionAggregate {
        let mut total = ActionAggregate::new();
        for agg in self.actions.values() {
            total.merge(agg.clone());
        }
        total
    }

    pub fn get(&self, action: &str) -> Option<&ActionAggregate> {
        self.actions.get(action)
    }

    /// Number of recorded outcomes for `action`, zero if it never ran.
    pub fn count(&self, action: &str) -> u64 {
        self.get(action).map_or(0, |a| a.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_per_action() {
        let collector = TelemetryCollector::new();
        let browse: Arc<str> = Arc::from("browse");
        let order: Arc<str> = Arc::from("order");

        collector.record_result(&browse, Duration::from_millis(3), None);
        collector.record_result(&browse, Duration::from_millis(4), Some(ErrorKind::Status(502)));
        collector.record_result(&order, Duration::from_millis(9), None);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.count("browse"), 2);
        assert_eq!(snapshot.count("order"), 1);
        assert_eq!(snapshot.count("missing"), 0);
        assert_eq!(snapshot.get("browse").map(|a| a.successes), Some(1));
        assert_eq!(snapshot.total().count, 3);
        assert_eq!(snapshot.total().failures[&ErrorKind::Status(502)], 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let collector = TelemetryCollector::new();
        let a: Arc<str> = Arc::from("a");
        collector.record_result(&a, Duration::from_millis(1), None);
        let before = collector.snapshot();
        collector.record_result(&a, Duration::from_millis(1), None);
        assert_eq!(before.count("a"), 1);
        assert_eq!(collector.snapshot().count("a"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_recorders_lose_nothing() {
        let collector = Arc::new(TelemetryCollector::new());
        let mut handles = vec![];
        for worker in 0..8 {
            let collector = Arc::clone(&collector);
            handles.push(tokio::spawn(async move {
                let name: Arc<str> = Arc::from(format!("action-{}", worker % 3));
                for _ in 0..1_000 {
                    collector.record_result(&name, Duration::from_micros(250), None);
                }
            }));
        }
        // readers interleaved with writers
        for _ in 0..10 {
            let _ = collector.snapshot();
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(collector.snapshot().total().count, 8_000);
    }
}
