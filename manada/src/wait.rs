use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Delay between two consecutive actions of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitTime {
    /// Always wait exactly this long.
    Constant(Duration),
    /// Wait a uniformly distributed time in `[min, max]`.
    Between { min: Duration, max: Duration },
}

impl WaitTime {
    pub fn constant(d: Duration) -> Self {
        WaitTime::Constant(d)
    }

    pub fn between(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidWaitTime { min, max });
        }
        Ok(WaitTime::Between { min, max })
    }

    /// `between` in whole seconds, the most common way wait times are declared.
    pub fn between_secs(min: u64, max: u64) -> Result<Self, ConfigError> {
        Self::between(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            WaitTime::Between { min, max } if min > max => Err(ConfigError::InvalidWaitTime { min, max }),
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        match *self {
            WaitTime::Constant(d) => d,
            WaitTime::Between { min, max } => {
                let lo = u64::try_from(min.as_nanos()).unwrap_or(u64::MAX);
                let hi = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
                if lo >= hi {
                    return min;
                }
                Duration::from_nanos(rng.random_range(lo..=hi))
            }
        }
    }
}

impl Default for WaitTime {
    fn default() -> Self {
        WaitTime::Constant(Duration::ZERO)
    }
}
