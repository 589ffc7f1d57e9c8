use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use hdrhistogram::Histogram;

use crate::{error::ErrorKind, metric::Outcome};

/// The `Aggregate` trait defines how raw samples are collected and combined into an
/// intermediate, mergeable representation that preserves the information necessary
/// for later analysis.
///
/// Aggregates do **not** compute final statistics such as averages or percentiles.
/// Those belong in a [`TelemetryReport`](crate::TelemetryReport), which is derived from aggregates.
/// Aggregates store compact, mergeable raw data (counters, histograms) so that the
/// report stage can compute accurate summaries without per-sample retention.
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**: snapshots merge per-action
///   aggregates in arbitrary order.
/// - `consume` runs inside the collector's per-action critical section, so keep it
///   allocation-free on the hot path.
pub trait Aggregate
where
    Self: Send + Sync + Debug + Clone,
{
    /// The sample type this aggregate summarizes.
    type Sample;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple samples into the current instance.
    fn aggregate(&mut self, samples: &[Self::Sample]) {
        samples.iter().for_each(|s| self.consume(s));
    }

    /// Incorporate a single sample into the aggregate.
    fn consume(&mut self, sample: &Self::Sample);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Raw per-action telemetry: counters plus a latency histogram in microseconds.
///
/// The histogram keeps 3 significant figures, so reported percentiles are accurate
/// to within 0.1% of the true value.
#[derive(Debug, Clone)]
pub struct ActionAggregate {
    pub count: u64,
    pub successes: u64,
    pub failures: BTreeMap<ErrorKind, u64>,
    pub latency_us: Histogram<u64>,
}

impl ActionAggregate {
    pub fn failure_count(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn min(&self) -> Duration {
        if self.latency_us.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency_us.min())
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.latency_us.max())
    }

    pub fn mean(&self) -> Duration {
        Duration::from_secs_f64(self.latency_us.mean() / 1_000_000.0)
    }

    pub fn percentile(&self, p: f64) -> Duration {
        Duration::from_micros(self.latency_us.value_at_percentile(p))
    }
}

impl Aggregate for ActionAggregate {
    type Sample = Outcome;

    fn new() -> Self {
        Self {
            count: 0,
            successes: 0,
            failures: BTreeMap::new(),
            // auto-resizing, so no sample is ever out of range
            latency_us: Histogram::new(3).expect("3 significant figures is a valid precision"),
        }
    }

    fn consume(&mut self, outcome: &Outcome) {
        self.count += 1;
        match &outcome.error_kind {
            None if outcome.success => self.successes += 1,
            Some(kind) => *self.failures.entry(kind.clone()).or_default() += 1,
            None => *self.failures.entry(ErrorKind::Other("unknown".into())).or_default() += 1,
        }
        let micros = u64::try_from(outcome.duration.as_micros()).unwrap_or(u64::MAX);
        self.latency_us.saturating_record(micros);
    }

    fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.successes += other.successes;
        for (kind, n) in other.failures {
            *self.failures.entry(kind).or_default() += n;
        }
        if let Err(e) = self.latency_us.add(&other.latency_us) {
            tracing::warn!("Dropping latency samples while merging aggregates: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(ms: u64, kind: Option<ErrorKind>) -> Outcome {
        let action: Arc<str> = Arc::from("browse");
        match kind {
            None => Outcome::success(action, Duration::from_millis(ms)),
            Some(k) => Outcome::failure(action, Duration::from_millis(ms), k),
        }
    }

    #[test]
    fn counts_successes_and_failures_by_kind() {
        let mut agg = ActionAggregate::new();
        agg.aggregate(&[
            outcome(10, None),
            outcome(20, Some(ErrorKind::Timeout)),
            outcome(30, Some(ErrorKind::Status(500))),
            outcome(40, Some(ErrorKind::Timeout)),
        ]);

        assert_eq!(agg.count, 4);
        assert_eq!(agg.successes, 1);
        assert_eq!(agg.failure_count(), 3);
        assert_eq!(agg.failures[&ErrorKind::Timeout], 2);
        assert_eq!(agg.failures[&ErrorKind::Status(500)], 1);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = ActionAggregate::new();
        a.consume(&outcome(5, None));
        let mut b = ActionAggregate::new();
        b.consume(&outcome(50, Some(ErrorKind::Transport)));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab.count, ba.count);
        assert_eq!(ab.successes, ba.successes);
        assert_eq!(ab.failures, ba.failures);
        assert_eq!(ab.min(), ba.min());
        assert_eq!(ab.max(), ba.max());
    }

    #[test]
    fn latency_statistics() {
        let mut agg = ActionAggregate::new();
        for ms in 1..=100 {
            agg.consume(&outcome(ms, None));
        }
        assert_eq!(agg.min(), Duration::from_millis(1));
        // 3 significant figures of precision
        let max = agg.max().as_micros() as f64;
        assert!((max - 100_000.0).abs() <= 100.0, "max was {max}");
        let p50 = agg.percentile(50.0).as_micros() as f64;
        assert!((p50 - 50_000.0).abs() <= 100.0, "p50 was {p50}");
    }

    #[test]
    fn empty_aggregate_reports_zero() {
        let agg = ActionAggregate::new();
        assert_eq!(agg.min(), Duration::ZERO);
        assert_eq!(agg.max(), Duration::ZERO);
        assert_eq!(agg.failure_count(), 0);
    }
}
