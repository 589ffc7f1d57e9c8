//! Error taxonomy.
//!
//! Each error type maps to the scope it is allowed to abort:
//!
//! - [`ConfigError`]: the whole run, before any virtual user is launched.
//! - [`SetupError`]: a single virtual user, during its on-start hook.
//! - [`ActionError`]: nothing. It is absorbed into telemetry and the run-loop
//!   moves on to the next selection.
//! - [`SessionError`]: a cart/auth precondition failed inside an action; it
//!   surfaces as an [`ActionError`] with [`ErrorKind::Precondition`].
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid archetypes, weights or population. Fatal to the whole scheduler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no archetypes were declared")]
    NoArchetypes,
    #[error("archetype `{archetype}` has invalid weight {weight} (must be finite and > 0)")]
    InvalidWeight { archetype: String, weight: f64 },
    #[error("population {population} is too small, at least {required} instances are required")]
    PopulationTooSmall { population: usize, required: usize },
    #[error("archetype `{archetype}` has no tasks")]
    EmptyTaskList { archetype: String },
    #[error("archetype `{archetype}` references unknown action `{action}`")]
    UnknownAction { archetype: String, action: String },
    #[error("task `{action}` in archetype `{archetype}` has invalid weight {weight}")]
    InvalidTaskWeight {
        archetype: String,
        action: String,
        weight: f64,
    },
    #[error("invalid wait time: min {min:?} is greater than max {max:?}")]
    InvalidWaitTime { min: Duration, max: Duration },
    #[error("action `{name}` is registered twice")]
    DuplicateAction { name: String },
    #[error("invalid value `{value}` for environment variable {var}")]
    InvalidEnv { var: String, value: String },
    #[error("{setting} must be greater than zero")]
    ZeroDuration { setting: String },
    #[error("invalid throttle: {reason}")]
    InvalidThrottle { reason: String },
}

/// Failure classification recorded with every failed [`Outcome`](crate::Outcome).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The target answered with an unexpected status code.
    Status(u16),
    /// Connection, DNS or protocol failure below the application level.
    Transport,
    /// The action exceeded the configured action timeout.
    Timeout,
    /// The action panicked. The panic was contained to that invocation.
    Panicked,
    /// The owning virtual user was forcibly terminated mid-action.
    Cancelled,
    /// A session precondition did not hold (empty cart, not logged in...).
    Precondition,
    Other(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Status(code) => write!(f, "status {code}"),
            ErrorKind::Transport => f.write_str("transport"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Panicked => f.write_str("panicked"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::Precondition => f.write_str("precondition"),
            ErrorKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// A single action invocation failed.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(code: u16) -> Self {
        Self::new(ErrorKind::Status(code), format!("unexpected status {code}"))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other(kind.into()), message)
    }
}

/// Cart and authentication preconditions on a [`SessionState`](crate::SessionState).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("no account registered for this session")]
    NoAccount,
    #[error("quantity must be at least 1")]
    InvalidQuantity,
}

impl From<SessionError> for ActionError {
    fn from(err: SessionError) -> Self {
        ActionError::new(ErrorKind::Precondition, err.to_string())
    }
}

/// The on-start hook of a virtual user failed; that instance never enters its main loop.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("setup action `{action}` failed: {source}")]
pub struct SetupError {
    pub action: String,
    pub source: ActionError,
}

/// A reporter could not export a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by [`Scenario::run`](crate::Scenario::run).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_become_precondition_failures() {
        let err: ActionError = SessionError::EmptyCart.into();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert_eq!(err.to_string(), "precondition: cart is empty");
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Status(503).to_string(), "status 503");
        assert_eq!(ErrorKind::Other("parse".into()).to_string(), "parse");
    }
}
