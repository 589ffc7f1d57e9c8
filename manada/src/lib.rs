//! Manada: a virtual-user load generator for Rust.
//!
//! Manada simulates a mixed population of users against a target system. Each user
//! follows a behavior profile (an [`Archetype`]): pick an action by weight or in a
//! scripted order, run it, think for a while, repeat. Every action invocation is
//! timed and aggregated per action.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Action`]: one stateless unit of work against the target (a page view, a
//!   checkout). Actions are registered by name in an [`ActionRegistry`].
//! - [`Archetype`]: a named behavior profile with a population weight, a
//!   [`WaitTime`] policy, weighted or sequential [`Task`]s and lifecycle hooks.
//! - [`SessionState`]: the per-user state (cart, auth, current page) that actions
//!   mutate. Never shared between users.
//! - [`SharedContext`]: read-mostly data every user sees (base URL, catalog data).
//! - [`VirtualUserScheduler`]: splits the population across archetypes, spawns one
//!   task per user spread over a ramp-up window and stops them with a grace period.
//! - [`TelemetryCollector`]: concurrent per-action [`Aggregate`]s of every
//!   [`Outcome`]: counts, failures by kind and a latency histogram.
//! - [`TelemetryReport`] / [`Reporter`]: turn snapshots into numbers and send them
//!   somewhere.
//! - [`Scenario`]: glue that runs a whole load test from one builder.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use futures::FutureExt;
//! use manada::{
//!     ActionError, ActionRegistry, Archetype, Scenario, SharedContext, StdoutReporter, Task,
//!     WaitTime, action_fn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ActionRegistry::new()
//!         .with("listing", action_fn(|session, _ctx, _repeat| {
//!             async move {
//!                 session.visit("/Clothing/", 1, vec![]);
//!                 Ok::<(), ActionError>(())
//!             }
//!             .boxed()
//!         }))?
//!         .with("search", action_fn(|_, _, _| async { Ok(()) }.boxed()))?;
//!
//!     let visitor = Archetype::builder()
//!         .name("visitor")
//!         .weight(10.0)
//!         .wait_time(WaitTime::between_secs(2, 5)?)
//!         .tasks(vec![Task::new("listing").weight(3.0), Task::new("search").weight(2.0)])
//!         .build();
//!
//!     let summary = Scenario::builder()
//!         .name("browse")
//!         .archetypes(vec![visitor])
//!         .registry(registry)
//!         .context(Arc::new(SharedContext::new("http://localhost:8000")))
//!         .population(100)
//!         .run_time(Duration::from_secs(60))
//!         .build()
//!         .with_reporter(StdoutReporter)
//!         .run()
//!         .await?;
//!
//!     println!("{} users stopped gracefully", summary.completed);
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `builtins`: ready-made reporters ([`StdoutReporter`], [`JsonLinesReporter`]).
//!   (Enabled by default)
//! - `internals`: exposes the throughput governor internals for experimentation.
//!
//! See `examples/storefront.rs` for a full shop population over HTTP.

/// Units of simulated work
pub mod action;
/// Per-action aggregates
pub mod aggregate;
/// Population split across archetypes
pub mod allocation;
/// Behavior profiles
pub mod archetype;
/// Run configuration
pub mod config;
/// Shared read-mostly state
pub mod context;
/// Error taxonomy
pub mod error;
/// Run-loops and throughput governor
pub mod executor;
/// Single outcomes
pub mod metric;
/// Named actions
pub mod registry;
/// Reports and Reporters
pub mod report;
/// Glue that runs a whole load test
pub mod scenario;
/// Spawning and stopping the population
pub mod scheduler;
/// Per-user state
pub mod session;
/// Concurrent telemetry sink
pub mod telemetry;
/// Think-time policies
pub mod wait;

pub use action::{Action, ActionRef, FnAction, action_fn};
pub use aggregate::{ActionAggregate, Aggregate};
pub use archetype::{Archetype, Behavior, Selection, Task};
pub use config::LoadConfig;
pub use context::{Catalog, SharedContext};
pub use error::{
    ActionError, ConfigError, Error, ErrorKind, ReportError, SessionError, SetupError,
};
pub use executor::{Stage, Throttle, UserExit, UserState};
pub use metric::Outcome;
pub use registry::ActionRegistry;
pub use report::{ActionReport, Reporter, TelemetryReport, spawn_periodic_reporter};
#[cfg(feature = "builtins")]
pub use report::{JsonLinesReporter, StdoutReporter};
pub use scenario::Scenario;
pub use scheduler::{SchedulerHandle, SchedulerOptions, ShutdownSummary, VirtualUserScheduler};
pub use session::{CartLine, Credentials, Order, ProductRef, SessionState};
pub use telemetry::{TelemetryCollector, TelemetrySnapshot};
pub use wait::WaitTime;
