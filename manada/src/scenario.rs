use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use typed_builder::TypedBuilder;

use crate::{
    archetype::Archetype,
    config::LoadConfig,
    context::SharedContext,
    error::{ConfigError, Error},
    registry::ActionRegistry,
    report::{Reporter, TelemetryReport, spawn_periodic_reporter},
    scheduler::{SchedulerOptions, ShutdownSummary, VirtualUserScheduler},
};

/// A complete load test: who runs, for how long, and where the numbers go.
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
///
/// use futures::FutureExt;
/// use manada::{ActionRegistry, Archetype, Scenario, SharedContext, Task, action_fn};
///
/// # async fn run() -> Result<(), manada::Error> {
/// let registry = ActionRegistry::new()
///     .with("home", action_fn(|_, _, _| async { Ok(()) }.boxed()))?;
///
/// let summary = Scenario::builder()
///     .name("smoke")
///     .archetypes(vec![
///         Archetype::builder().name("visitor").tasks(vec![Task::new("home")]).build(),
///     ])
///     .registry(registry)
///     .context(Arc::new(SharedContext::new("http://localhost:8000")))
///     .population(10)
///     .run_time(Duration::from_secs(30))
///     .build()
///     .run()
///     .await?;
///
/// println!("{} instances stopped gracefully", summary.completed);
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Scenario {
    #[builder(setter(into))]
    pub name: String,
    pub archetypes: Vec<Archetype>,
    pub registry: ActionRegistry,
    pub context: Arc<SharedContext>,
    pub population: usize,
    pub run_time: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub grace_period: Duration,
    #[builder(default)]
    pub options: SchedulerOptions,
    /// Receives the final report, and periodic ones if `report_interval` is set.
    #[builder(default, setter(strip_option))]
    pub reporter: Option<Arc<dyn Reporter>>,
    #[builder(default, setter(strip_option))]
    pub report_interval: Option<Duration>,
}

impl Scenario {
    /// Build a scenario from a [`LoadConfig`], applying its weight overrides.
    pub fn from_config(
        name: impl Into<String>,
        config: &LoadConfig,
        archetypes: Vec<Archetype>,
        registry: ActionRegistry,
    ) -> Self {
        let archetypes = archetypes
            .into_iter()
            .map(|a| {
                let weight = config.weight_for(&a.name, a.weight);
                a.with_weight(weight)
            })
            .collect();
        Self {
            name: name.into(),
            archetypes,
            registry,
            context: Arc::new(SharedContext::new(config.host.clone())),
            population: config.population,
            run_time: config.run_time,
            grace_period: config.grace_period,
            options: SchedulerOptions {
                ramp_up: config.ramp_up,
                action_timeout: config.action_timeout,
                ..Default::default()
            },
            reporter: None,
            report_interval: config.report_interval,
        }
    }

    /// Attach a reporter after construction.
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Start the population, let it run for `run_time`, then stop it.
    ///
    /// Configuration errors are returned before anything is spawned. A failing
    /// final report is returned as an error; periodic report failures are only
    /// logged.
    pub async fn run(&self) -> Result<ShutdownSummary, Error> {
        tracing::info!(
            "Running scenario {} with {} virtual users for {:?}",
            self.name,
            self.population,
            self.run_time
        );
        if self.report_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::ZeroDuration {
                setting: "report interval".to_string(),
            }
            .into());
        }
        let scheduler = VirtualUserScheduler::new(self.registry.clone(), Arc::clone(&self.context));
        let handle = scheduler.start_with(&self.archetypes, self.population, self.options.clone())?;

        // stays open until every instance has stopped, so the last periodic
        // export sees the final numbers
        let (report_tx, report_rx) = watch::channel(false);
        let periodic = match (&self.reporter, self.report_interval) {
            (Some(reporter), Some(interval)) => Some(spawn_periodic_reporter(
                Arc::clone(handle.telemetry()),
                Arc::clone(reporter),
                interval,
                report_rx,
            )?),
            _ => None,
        };

        tokio::time::sleep(self.run_time).await;
        let summary = handle.stop(self.grace_period).await;

        match (periodic, &self.reporter) {
            (Some(periodic), _) => {
                report_tx.send_replace(true);
                if let Err(e) = periodic.await {
                    tracing::error!("Periodic reporter failed: {e}");
                }
            }
            (None, Some(reporter)) => {
                reporter.report(&TelemetryReport::from(&summary.snapshot)).await?;
            }
            (None, None) => {}
        }

        tracing::info!("Scenario {} finished.", self.name);
        Ok(summary)
    }
}
