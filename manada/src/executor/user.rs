//! The run-loop of one virtual user.
//!
//! ```text
//! Idle -> Selecting -> Executing -> Waiting -> Selecting -> ... -> Stopped
//! ```
//!
//! The stop signal is only looked at between actions: at the top of the loop,
//! while waiting for a throttle token, and while sleeping. An action that has
//! started always runs to completion (or failure) unless the whole instance is
//! aborted after the grace period, in which case the in-flight action is recorded
//! as [`ErrorKind::Cancelled`].
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    sync::{Semaphore, watch::Receiver},
    time::Instant,
};

use crate::{
    action::ActionRef,
    archetype::Behavior,
    context::SharedContext,
    error::{ActionError, ErrorKind, SetupError},
    metric::Outcome,
    session::SessionState,
    telemetry::TelemetryCollector,
};

/// Where a run-loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Idle,
    Selecting,
    Executing,
    Waiting,
    Stopped,
}

/// How a run-loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UserExit {
    /// Stopped gracefully after `iterations` main-loop actions.
    Completed { iterations: u64 },
    /// The on-start hook failed; the main loop never ran.
    SetupFailed(SetupError),
    /// The stop signal arrived before this instance's ramp-up slot.
    NotLaunched,
}

/// Everything a run-loop shares with the rest of the run.
#[derive(Clone)]
pub(crate) struct UserEnv {
    pub ctx: Arc<SharedContext>,
    pub telemetry: Arc<TelemetryCollector>,
    pub shutdown: Receiver<bool>,
    pub throttle: Option<Arc<Semaphore>>,
    pub action_timeout: Option<Duration>,
    pub active: Arc<AtomicUsize>,
}

pub(crate) struct VirtualUser {
    pub id: usize,
    pub behavior: Arc<Behavior>,
    pub start_at: Instant,
    pub rng: StdRng,
    state: UserState,
}

impl VirtualUser {
    pub fn new(id: usize, behavior: Arc<Behavior>, start_at: Instant, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            id,
            behavior,
            start_at,
            rng,
            state: UserState::Idle,
        }
    }

    fn transition(&mut self, next: UserState) {
        tracing::trace!(user = self.id, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }

    pub async fn run(mut self, mut env: UserEnv) -> UserExit {
        let archetype = Arc::clone(&self.behavior.name);

        // Idle until this instance's ramp-up slot
        tokio::select! {
            _ = tokio::time::sleep_until(self.start_at) => {}
            _ = env.shutdown.wait_for(|stop| *stop) => {
                self.transition(UserState::Stopped);
                return UserExit::NotLaunched;
            }
        }

        let mut session = SessionState::new(self.id);
        if self.behavior.requires_auth {
            session = session.requiring_auth();
        }
        tracing::debug!(user = self.id, archetype = %archetype, "Virtual user started.");

        let behavior = Arc::clone(&self.behavior);
        for action in &behavior.on_start {
            if let Err(source) = execute(action, &mut session, &env).await {
                tracing::warn!(
                    user = self.id,
                    archetype = %archetype,
                    action = %action.name,
                    "Setup failed, virtual user terminates: {source}"
                );
                self.transition(UserState::Stopped);
                return UserExit::SetupFailed(SetupError {
                    action: action.name.to_string(),
                    source,
                });
            }
        }

        env.active.fetch_add(1, Ordering::Relaxed);
        let mut cursor = 0;
        let mut iterations = 0u64;
        loop {
            if *env.shutdown.borrow() {
                break;
            }

            self.transition(UserState::Selecting);
            let action = behavior.select(&mut cursor, &mut self.rng);

            if let Some(tokens) = &env.throttle {
                // a token and the stop signal can land on the same tick: stop wins
                tokio::select! {
                    biased;
                    _ = env.shutdown.wait_for(|stop| *stop) => break,
                    permit = tokens.acquire() => match permit {
                        // the governor alone adds tokens
                        Ok(p) => p.forget(),
                        Err(_) => break,
                    },
                }
                if *env.shutdown.borrow() {
                    break;
                }
            }

            self.transition(UserState::Executing);
            // failures are recorded by `execute` and never end the loop
            let _ = execute(action, &mut session, &env).await;
            iterations += 1;

            self.transition(UserState::Waiting);
            let wait = behavior.wait_time.sample(&mut self.rng);
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = env.shutdown.wait_for(|stop| *stop) => break,
                }
            } else {
                // keep zero-wait users from starving the runtime
                tokio::task::yield_now().await;
            }
        }
        env.active.fetch_sub(1, Ordering::Relaxed);

        for action in &behavior.on_stop {
            let _ = execute(action, &mut session, &env).await;
        }
        self.transition(UserState::Stopped);
        tracing::debug!(user = self.id, archetype = %archetype, iterations, "Virtual user stopped.");
        UserExit::Completed { iterations }
    }
}

/// Invoke one action, measure it and record its outcome.
///
/// Panics and timeouts are turned into failed outcomes here. If the surrounding task
/// is aborted while the action runs, the in-flight guard records it as cancelled.
pub(crate) async fn execute(
    action: &ActionRef,
    session: &mut SessionState,
    env: &UserEnv,
) -> Result<(), ActionError> {
    let guard = InFlight::new(&env.telemetry, &action.name);
    let invocation = AssertUnwindSafe(action.invoke(session, &env.ctx)).catch_unwind();

    let caught = match env.action_timeout {
        Some(limit) => match tokio::time::timeout(limit, invocation).await {
            Ok(caught) => caught,
            Err(_) => Ok(Err(ActionError::new(
                ErrorKind::Timeout,
                format!("exceeded {limit:?}"),
            ))),
        },
        None => invocation.await,
    };
    let result = caught.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(action = %action.name, "Action panicked: {message}");
        Err(ActionError::new(ErrorKind::Panicked, message))
    });

    guard.finish(&result);
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Records a cancelled outcome if dropped before [`finish`](Self::finish).
struct InFlight<'a> {
    telemetry: &'a TelemetryCollector,
    action: &'a Arc<str>,
    started: Instant,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(telemetry: &'a TelemetryCollector, action: &'a Arc<str>) -> Self {
        Self {
            telemetry,
            action,
            started: Instant::now(),
            done: false,
        }
    }

    fn finish(mut self, result: &Result<(), ActionError>) {
        self.done = true;
        let outcome = Outcome::from_result(Arc::clone(self.action), self.started.elapsed(), result);
        self.telemetry.record(&outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            let outcome = Outcome::cancelled(Arc::clone(self.action), self.started.elapsed());
            self.telemetry.record(&outcome);
        }
    }
}
