//! Spawning, pacing and stopping the virtual-user population.
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::watch::{self, Sender},
    task::{JoinHandle, JoinSet},
    time::Instant,
};
use typed_builder::TypedBuilder;

use crate::{
    allocation::{allocate, launch_order},
    archetype::{Archetype, Behavior},
    context::SharedContext,
    error::ConfigError,
    executor::{
        throttle::Throttle,
        user::{UserEnv, UserExit, VirtualUser},
    },
    registry::ActionRegistry,
    telemetry::{TelemetryCollector, TelemetrySnapshot},
};

/// Knobs beyond population and ramp-up.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct SchedulerOptions {
    /// Instances start evenly spaced across this window.
    #[builder(default)]
    pub ramp_up: Duration,
    /// Fail an action with `ErrorKind::Timeout` after this long.
    #[builder(default, setter(strip_option))]
    pub action_timeout: Option<Duration>,
    /// Cap total actions per second across all instances.
    #[builder(default, setter(strip_option))]
    pub throttle: Option<Throttle>,
    /// Seed for reproducible task selection and wait times.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
}

/// Spawns and runs a population of virtual users.
///
/// The scheduler owns the action registry and the shared context; every run-loop it
/// spawns borrows them through `Arc`s and records into the same collector.
pub struct VirtualUserScheduler {
    registry: ActionRegistry,
    ctx: Arc<SharedContext>,
    telemetry: Arc<TelemetryCollector>,
}

impl VirtualUserScheduler {
    pub fn new(registry: ActionRegistry, ctx: Arc<SharedContext>) -> Self {
        Self {
            registry,
            ctx,
            telemetry: Arc::new(TelemetryCollector::new()),
        }
    }

    /// Record into an existing collector instead of a fresh one.
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn telemetry(&self) -> Arc<TelemetryCollector> {
        Arc::clone(&self.telemetry)
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    /// Start `population` instances spread over `ramp_up`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        archetypes: &[Archetype],
        population: usize,
        ramp_up: Duration,
    ) -> Result<SchedulerHandle, ConfigError> {
        let options = SchedulerOptions::builder().ramp_up(ramp_up).build();
        self.start_with(archetypes, population, options)
    }

    /// Like [`start`](Self::start) with every knob exposed.
    ///
    /// All validation happens before the first instance is spawned: on error
    /// nothing is running.
    pub fn start_with(
        &self,
        archetypes: &[Archetype],
        population: usize,
        options: SchedulerOptions,
    ) -> Result<SchedulerHandle, ConfigError> {
        let behaviors = archetypes
            .iter()
            .map(|a| a.resolve(&self.registry).map(Arc::new))
            .collect::<Result<Vec<Arc<Behavior>>, _>>()?;
        let counts = allocate(archetypes, population)?;
        if let Some(throttle) = &options.throttle {
            throttle.validate()?;
        }

        let allocation: Vec<(String, usize)> = archetypes
            .iter()
            .zip(&counts)
            .map(|(a, &n)| (a.name.clone(), n))
            .collect();
        for (name, n) in &allocation {
            tracing::info!("Allocated {n} instance(s) of archetype {name}");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (throttle, governor) = match &options.throttle {
            Some(t) => {
                tracing::info!("Spawning throttle governor...");
                let (tokens, handle) = t.spawn(shutdown_rx.clone());
                (Some(tokens), Some(handle))
            }
            None => (None, None),
        };

        let active = Arc::new(AtomicUsize::new(0));
        let env = UserEnv {
            ctx: Arc::clone(&self.ctx),
            telemetry: Arc::clone(&self.telemetry),
            shutdown: shutdown_rx,
            throttle,
            action_timeout: options.action_timeout,
            active: Arc::clone(&active),
        };

        let order = launch_order(&counts);
        let total = order.len();
        tracing::info!(
            "Spawning {total} virtual users over {:?}...",
            options.ramp_up
        );
        let start = Instant::now();
        let mut users = JoinSet::new();
        for (id, archetype) in order.into_iter().enumerate() {
            let offset = ramp_offset(options.ramp_up, id, total);
            let user = VirtualUser::new(
                id,
                Arc::clone(&behaviors[archetype]),
                start + offset,
                options.seed,
            );
            users.spawn(user.run(env.clone()));
        }

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            users,
            governor,
            telemetry: Arc::clone(&self.telemetry),
            allocation,
            active,
        })
    }
}

/// Start offset of instance `i` out of `total`: evenly spaced, first one at zero.
pub(crate) fn ramp_offset(ramp_up: Duration, i: usize, total: usize) -> Duration {
    if total == 0 || ramp_up.is_zero() {
        return Duration::ZERO;
    }
    let nanos = ramp_up.as_nanos() * i as u128 / total as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// A running population.
pub struct SchedulerHandle {
    shutdown: Sender<bool>,
    users: JoinSet<UserExit>,
    governor: Option<JoinHandle<()>>,
    telemetry: Arc<TelemetryCollector>,
    allocation: Vec<(String, usize)>,
    active: Arc<AtomicUsize>,
}

/// How a population ended.
#[derive(Debug, Clone)]
pub struct ShutdownSummary {
    /// Finished their current action and on-stop hook within the grace period.
    pub completed: usize,
    pub setup_failed: usize,
    /// Aborted after the grace period.
    pub cancelled: usize,
    /// Never started because the stop signal arrived during ramp-up.
    pub not_launched: usize,
    /// Run-loop tasks that died outside any action.
    pub panicked: usize,
    pub snapshot: TelemetrySnapshot,
}

impl SchedulerHandle {
    /// Per-archetype instance counts, in declaration order.
    pub fn allocation(&self) -> &[(String, usize)] {
        &self.allocation
    }

    /// Instances currently inside their main loop.
    pub fn active_users(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// A receiver that flips to `true` when [`stop`](Self::stop) is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every run-loop to stop and wait up to `grace` for them to finish their
    /// current action and on-stop hook. Stragglers are aborted; their in-flight
    /// action is recorded as `Cancelled`.
    pub async fn stop(mut self, grace: Duration) -> ShutdownSummary {
        tracing::info!("Stopping {} virtual users...", self.users.len());
        self.shutdown.send_replace(true);

        let mut summary = ShutdownSummary {
            completed: 0,
            setup_failed: 0,
            cancelled: 0,
            not_launched: 0,
            panicked: 0,
            snapshot: TelemetrySnapshot::default(),
        };

        let deadline = Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, self.users.join_next()).await {
                Ok(Some(res)) => summary.tally(res),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Grace period of {grace:?} elapsed, aborting {} virtual users",
                        self.users.len()
                    );
                    self.users.abort_all();
                    while let Some(res) = self.users.join_next().await {
                        summary.tally(res);
                    }
                    break;
                }
            }
        }

        if let Some(governor) = self.governor.take() {
            if let Err(e) = governor.await {
                tracing::error!("Throttle governor failed: {e}");
            }
        }

        summary.snapshot = self.telemetry.snapshot();
        tracing::info!(
            completed = summary.completed,
            setup_failed = summary.setup_failed,
            cancelled = summary.cancelled,
            not_launched = summary.not_launched,
            "All virtual users stopped."
        );
        summary
    }
}

impl ShutdownSummary {
    fn tally(&mut self, res: Result<UserExit, tokio::task::JoinError>) {
        match res {
            Ok(UserExit::Completed { .. }) => self.completed += 1,
            Ok(UserExit::SetupFailed(_)) => self.setup_failed += 1,
            Ok(UserExit::NotLaunched) => self.not_launched += 1,
            Err(e) if e.is_cancelled() => self.cancelled += 1,
            Err(e) => {
                tracing::error!("Virtual user panicked: {e}");
                self.panicked += 1;
            }
        }
    }
}
