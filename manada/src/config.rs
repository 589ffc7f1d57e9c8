//! Run configuration.
//!
//! A [`LoadConfig`] is read once, before any instance starts, and never changes
//! afterwards. It can be built in code, deserialized, or read from `MANADA_*`
//! environment variables.
use std::{collections::BTreeMap, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const PREFIX: &str = "MANADA_";
const WEIGHT_PREFIX: &str = "MANADA_WEIGHT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub population: usize,
    pub ramp_up: Duration,
    pub run_time: Duration,
    /// How long stopping instances may take to finish before they are aborted.
    pub grace_period: Duration,
    pub host: String,
    pub report_interval: Option<Duration>,
    pub action_timeout: Option<Duration>,
    /// Per-archetype weight overrides, keyed by lowercase archetype name.
    pub weights: BTreeMap<String, f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            population: 10,
            ramp_up: Duration::ZERO,
            run_time: Duration::from_secs(60),
            grace_period: Duration::from_secs(10),
            host: "http://localhost:8000".to_string(),
            report_interval: None,
            action_timeout: None,
            weights: BTreeMap::new(),
        }
    }
}

impl LoadConfig {
    /// Defaults overridden by whatever `MANADA_*` variables are set.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `MANADA_POPULATION` | `population` |
    /// | `MANADA_RAMP_UP_SECS` | `ramp_up` |
    /// | `MANADA_RUN_TIME_SECS` | `run_time` |
    /// | `MANADA_GRACE_SECS` | `grace_period` |
    /// | `MANADA_HOST` | `host` |
    /// | `MANADA_REPORT_INTERVAL_SECS` | `report_interval` |
    /// | `MANADA_ACTION_TIMEOUT_MS` | `action_timeout` |
    /// | `MANADA_WEIGHT_<ARCHETYPE>` | `weights` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let weights = std::env::vars()
            .filter(|(k, _)| k.starts_with(WEIGHT_PREFIX))
            .collect::<Vec<_>>();
        Self::from_lookup(|var| std::env::var(var).ok(), weights)
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(
        lookup: F,
        weight_vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |suffix: &str| {
            let name = format!("{PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((name, value)) = var("POPULATION") {
            config.population = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("RAMP_UP_SECS") {
            config.ramp_up = secs(&name, &value)?;
        }
        if let Some((name, value)) = var("RUN_TIME_SECS") {
            config.run_time = secs(&name, &value)?;
        }
        if let Some((name, value)) = var("GRACE_SECS") {
            config.grace_period = secs(&name, &value)?;
        }
        if let Some((_, value)) = var("HOST") {
            config.host = value;
        }
        if let Some((name, value)) = var("REPORT_INTERVAL_SECS") {
            let interval = secs(&name, &value)?;
            if interval.is_zero() {
                return Err(invalid(&name, &value));
            }
            config.report_interval = Some(interval);
        }
        if let Some((name, value)) = var("ACTION_TIMEOUT_MS") {
            config.action_timeout = Some(Duration::from_millis(parse(&name, &value)?));
        }

        for (name, value) in weight_vars {
            let Some(archetype) = name.strip_prefix(WEIGHT_PREFIX) else {
                continue;
            };
            let weight: f64 = parse(&name, &value)?;
            if !weight.is_finite() || weight <= 0.0 {
                return Err(invalid(&name, &value));
            }
            config.weights.insert(archetype.to_lowercase(), weight);
        }

        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Weight override for `archetype` (case-insensitive), or `default`.
    pub fn weight_for(&self, archetype: &str, default: f64) -> f64 {
        self.weights
            .get(&archetype.to_lowercase())
            .copied()
            .unwrap_or(default)
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}

fn secs(var: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse(var, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(var, value))
}
