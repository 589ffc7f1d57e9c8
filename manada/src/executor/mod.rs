//! Executor: the runtime side of a load test
//!
//! The [`VirtualUserScheduler`](crate::VirtualUserScheduler) decides *who* runs and
//! *when*. This module holds *how* a single virtual user runs ([`user`]) and the
//! optional global rate governor that paces all of them ([`throttle`]).
//!
//! # High-level flow
//! 1. The scheduler resolves archetypes into shared [`Behavior`](crate::Behavior)s
//!    and spawns one Tokio task per virtual user, each with its own start instant
//!    inside the ramp-up window.
//! 2. If a [`Throttle`] is configured, a governor task starts adding tokens to a
//!    shared semaphore; run-loops take one token per action.
//! 3. Each run-loop runs its on-start hook, then loops select → execute → wait
//!    until the shutdown watch channel flips, then runs its on-stop hook.
//! 4. Every action invocation is timed and recorded in the shared
//!    [`TelemetryCollector`](crate::TelemetryCollector).
//!
//! # Notes about correctness & robustness
//! - Failed, timed-out and panicking actions are recorded as failed outcomes; the
//!   loop always continues.
//! - The shutdown signal is only observed between actions. Forced termination after
//!   the grace period aborts the task; the in-flight action is recorded as
//!   `Cancelled` by a drop guard.
//! - **Do not perform blocking I/O inside actions.** A blocked worker thread stalls
//!   every virtual user scheduled on it and distorts the measured latencies.
pub mod throttle;
pub mod user;

pub use throttle::{Stage, Throttle};
pub use user::{UserExit, UserState};
