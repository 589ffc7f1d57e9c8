use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ActionError, ErrorKind};

/// The smallest unit of telemetry: the result of one action invocation.
///
/// Outcomes are produced by the run-loop (which measures the duration around the
/// action call) and consumed only by the [`TelemetryCollector`](crate::TelemetryCollector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action: Arc<str>,
    pub success: bool,
    pub duration: Duration,
    pub error_kind: Option<ErrorKind>,
}

impl Outcome {
    pub fn success(action: Arc<str>, duration: Duration) -> Self {
        Self {
            action,
            success: true,
            duration,
            error_kind: None,
        }
    }

    pub fn failure(action: Arc<str>, duration: Duration, kind: ErrorKind) -> Self {
        Self {
            action,
            success: false,
            duration,
            error_kind: Some(kind),
        }
    }

    pub fn from_result(action: Arc<str>, duration: Duration, result: &Result<(), ActionError>) -> Self {
        match result {
            Ok(()) => Self::success(action, duration),
            Err(err) => Self::failure(action, duration, err.kind.clone()),
        }
    }

    /// Outcome for an action that was still running when its virtual user was aborted.
    pub fn cancelled(action: Arc<str>, duration: Duration) -> Self {
        Self::failure(action, duration, ErrorKind::Cancelled)
    }
}
