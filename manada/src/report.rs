//! Reports and Reporters
//!
//! A [`TelemetryReport`] derives final statistics (percentiles, rates, error
//! ratios) from a [`TelemetrySnapshot`]. A [`Reporter`] sends reports somewhere:
//! stdout, a file, a metrics pipeline. Reporters can run once at the end of a run
//! or periodically through [`spawn_periodic_reporter`].
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch::Receiver, task::JoinHandle};

use crate::{
    aggregate::ActionAggregate,
    error::{ConfigError, ReportError},
    telemetry::{TelemetryCollector, TelemetrySnapshot},
};

/// Final statistics for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub success_ratio: f64,
    pub rps: f64,
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl ActionReport {
    fn new(agg: &ActionAggregate, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            count: agg.count,
            successes: agg.successes,
            failures: agg.failure_count(),
            failures_by_kind: agg
                .failures
                .iter()
                .map(|(kind, n)| (kind.to_string(), *n))
                .collect(),
            success_ratio: if agg.count == 0 {
                0.0
            } else {
                agg.successes as f64 / agg.count as f64 * 100.0
            },
            rps: if secs > 0.0 { agg.count as f64 / secs } else { 0.0 },
            min: agg.min(),
            mean: agg.mean(),
            p50: agg.percentile(50.0),
            p90: agg.percentile(90.0),
            p95: agg.percentile(95.0),
            p99: agg.percentile(99.0),
            max: agg.max(),
        }
    }
}

/// Report over every action plus an aggregated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub elapsed: Duration,
    pub actions: BTreeMap<String, ActionReport>,
    pub total: ActionReport,
}

impl From<&TelemetrySnapshot> for TelemetryReport {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            elapsed: snapshot.elapsed,
            actions: snapshot
                .actions
                .iter()
                .map(|(name, agg)| (name.clone(), ActionReport::new(agg, snapshot.elapsed)))
                .collect(),
            total: ActionReport::new(&snapshot.total(), snapshot.elapsed),
        }
    }
}

impl From<TelemetrySnapshot> for TelemetryReport {
    fn from(snapshot: TelemetrySnapshot) -> Self {
        Self::from(&snapshot)
    }
}

/// Consumes reports and sends them somewhere.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &TelemetryReport) -> Result<(), ReportError>;
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    async fn report(&self, report: &TelemetryReport) -> Result<(), ReportError> {
        (**self).report(report).await
    }
}

/// Export a snapshot every `interval` until `shutdown` flips, then once more so the
/// final numbers are always exported. Reporter errors are logged and never stop
/// the load test. A zero `interval` is rejected before anything is spawned.
pub fn spawn_periodic_reporter<R>(
    telemetry: Arc<TelemetryCollector>,
    reporter: R,
    interval: Duration,
    mut shutdown: Receiver<bool>,
) -> Result<JoinHandle<()>, ConfigError>
where
    R: Reporter + 'static,
{
    if interval.is_zero() {
        return Err(ConfigError::ZeroDuration {
            setting: "report interval".to_string(),
        });
    }
    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
            let report = TelemetryReport::from(telemetry.snapshot());
            if let Err(e) = reporter.report(&report).await {
                tracing::warn!("Periodic report failed: {e}");
            }
        }
        let report = TelemetryReport::from(telemetry.snapshot());
        if let Err(e) = reporter.report(&report).await {
            tracing::warn!("Final report failed: {e}");
        }
    }))
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::{fmt::Write as _, path::PathBuf};

    use tokio::io::AsyncWriteExt;

    use super::*;

    /// Prints a human-readable table to stdout.
    pub struct StdoutReporter;

    impl StdoutReporter {
        pub fn render(report: &TelemetryReport) -> String {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "{:<28} {:>8} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9}",
                "action", "count", "fail", "rps", "min", "p50", "p95", "p99", "max"
            );
            let rows = report
                .actions
                .iter()
                .map(|(name, a)| (name.as_str(), a))
                .chain(std::iter::once(("TOTAL", &report.total)));
            for (name, a) in rows {
                let _ = writeln!(
                    out,
                    "{:<28} {:>8} {:>8} {:>8.2} {:>9} {:>9} {:>9} {:>9} {:>9}",
                    name,
                    a.count,
                    a.failures,
                    a.rps,
                    ms(a.min),
                    ms(a.p50),
                    ms(a.p95),
                    ms(a.p99),
                    ms(a.max),
                );
            }
            for (name, a) in &report.actions {
                for (kind, n) in &a.failures_by_kind {
                    let _ = writeln!(out, "  {name}: {n} x {kind}");
                }
            }
            out
        }
    }

    fn ms(d: Duration) -> String {
        format!("{:.1}ms", d.as_secs_f64() * 1_000.0)
    }

    #[async_trait]
    impl Reporter for StdoutReporter {
        async fn report(&self, report: &TelemetryReport) -> Result<(), ReportError> {
            println!("{}", Self::render(report));
            Ok(())
        }
    }

    /// Appends one JSON object per report to a file.
    pub struct JsonLinesReporter {
        pub path: PathBuf,
    }

    impl JsonLinesReporter {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    #[async_trait]
    impl Reporter for JsonLinesReporter {
        async fn report(&self, report: &TelemetryReport) -> Result<(), ReportError> {
            let mut line = serde_json::to_string(report)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        }
    }
}
