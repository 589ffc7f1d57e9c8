//! Optional global throughput cap shared by all virtual users.
//!
//! A governor task drives a token bucket (a [`tokio::sync::Semaphore`]) from a list
//! of [`Stage`]s. Each stage defines a target actions-per-second and the duration
//! over which the governor linearly interpolates from the previous rate to that
//! target. Run-loops take one token before executing each action.
//!
//! For a stage with `start_rate`, `end_rate` and `duration`, at `elapsed`:
//!
//! ```text
//! t = elapsed / duration
//! r(t) = start_rate + (end_rate - start_rate) * t
//! add_f = r(t) * tick_seconds
//! add_total = floor(add_f + fractional)
//! fractional = (add_f + fractional) - add_total
//! ```
//!
//! The fractional carry keeps the long-term average exact when a tick is worth a
//! non-integer number of tokens. After the last stage the final rate is held until
//! shutdown.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Semaphore, watch::Receiver},
    task::JoinHandle,
    time::Instant,
};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

/// A stage ramps the action rate to `target` over `duration`.
///
/// A stage with `Duration::ZERO` jumps to `target` instantly; it adds no tokens
/// itself, it only sets the starting rate of the next stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    /// Actions per second, across all virtual users.
    pub target: f64,
}

impl Stage {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// The semaphore reserves 3 bits of usize for flags.
pub(crate) const MAX_TOKENS: usize = usize::MAX >> 3;

/// Token-bucket limiter driven by ramp stages.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Throttle {
    pub stages: Vec<Stage>,
    /// Granularity of governor updates.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// Maximum number of tokens saved up for bursts.
    #[builder(default = MAX_TOKENS)]
    pub bucket_capacity: usize,
}

impl Throttle {
    /// Reject throttles that could never issue a token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidThrottle {
            reason: reason.to_string(),
        };
        if self.stages.is_empty() {
            return Err(invalid("at least one stage is required"));
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroDuration {
                setting: "throttle tick".to_string(),
            });
        }
        if self.bucket_capacity == 0 {
            return Err(invalid("bucket capacity must be at least 1"));
        }
        if let Some(stage) = self.stages.iter().find(|s| !(s.target >= 0.0)) {
            return Err(invalid(&format!("stage target {} is not a rate", stage.target)));
        }
        if self.stages.last().is_some_and(|s| s.target == 0.0) {
            return Err(invalid("the last stage holds a rate of zero"));
        }
        Ok(())
    }

    /// Spawn the governor. It stops when `shutdown` flips to `true`.
    pub(crate) fn spawn(&self, shutdown: Receiver<bool>) -> (Arc<Semaphore>, JoinHandle<()>) {
        let tokens = Arc::new(Semaphore::new(0));
        let governor = tokio::spawn(internals::token_governor_task(
            Arc::clone(&tokens),
            shutdown,
            self.stages.clone(),
            self.tick,
            // the semaphore cannot hold more
            self.bucket_capacity.min(MAX_TOKENS),
        ));
        (tokens, governor)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

mod internals {
    use super::*;

    /// Governor task that adds tokens to the shared semaphore according to the stages.
    pub async fn token_governor_task(
        tokens: Arc<Semaphore>,
        mut shutdown: Receiver<bool>,
        stages: Vec<Stage>,
        tick: Duration,
        bucket_capacity: usize,
    ) {
        let main_task = async {
            let mut rate = 0.0;
            let mut fractional = 0.0;
            let add = |n: usize| {
                let avail = tokens.available_permits();
                if n > 0 && avail < bucket_capacity {
                    tokens.add_permits(n.min(bucket_capacity - avail));
                }
            };

            let j = stages.len();
            for (i, stage) in stages.iter().enumerate() {
                tracing::debug!("Throttle stage {}/{j}: {} actions/s", i + 1, stage.target);
                if stage.duration.is_zero() {
                    rate = stage.target;
                    continue;
                }

                let stage_start = Instant::now();
                let mut next_tick = Instant::now();
                let start_rate = rate;
                loop {
                    let elapsed = Instant::now().duration_since(stage_start);
                    if elapsed >= stage.duration {
                        break;
                    }
                    next_tick += tick;
                    let (add_total, f) =
                        calc_token_limit(elapsed, stage.duration, start_rate, stage.target, fractional, tick);
                    fractional = f;
                    add(add_total);
                    tokio::time::sleep_until(next_tick).await;
                }
                // next stage starts exactly from this target
                rate = stage.target;
            }

            tracing::debug!("Throttle holding {rate} actions/s");
            let mut next_tick = Instant::now();
            while !tokens.is_closed() {
                next_tick += tick;
                let (add_total, f) = calc_token_limit(tick, tick, rate, rate, fractional, tick);
                fractional = f;
                add(add_total);
                tokio::time::sleep_until(next_tick).await;
            }
        };

        tokio::select! {
            _ = main_task => {}
            _ = shutdown.wait_for(|stop| *stop) => {
                tracing::debug!("Throttle received shutdown signal.");
            }
        };
    }

    /// Pure function computing the tokens to add this tick.
    ///
    /// Returns `(tokens_to_add, next_fractional_part)`.
    pub fn calc_token_limit(
        elapsed: Duration,
        stage_duration: Duration,
        start_rate: f64,
        end_rate: f64,
        fractional: f64,
        tick: Duration,
    ) -> (usize, f64) {
        // interpolation factor [0.0..1.0]
        let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
        let tick_rate = start_rate + (end_rate - start_rate) * t;
        let add_f = tick_rate * tick.as_secs_f64();

        let add_total_f = (add_f + fractional).floor();
        let fractional = (add_f + fractional) - add_total_f;

        let add_total = if add_total_f >= MAX_TOKENS as f64 {
            MAX_TOKENS
        } else if add_total_f < 0.0 {
            0
        } else {
            add_total_f as usize
        };

        (add_total, fractional)
    }
}
