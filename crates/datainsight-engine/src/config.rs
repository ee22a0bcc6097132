//! Engine configuration.
//!
//! Every knob has a default; `from_env` overlays `DATAINSIGHT_*` variables.
//! Precedence for each value:
//!
//! 1. environment variable, when set and non-empty
//! 2. the default below

use datainsight_interpret::{ResolverConfig, DEFAULT_BINS, DEFAULT_QUANTILES, MAX_BINS, MAX_EDIT_DISTANCE};
use datainsight_table::DEFAULT_MAX_BYTES;
use std::time::Duration;

pub const MODEL_TIMEOUT_ENV: &str = "DATAINSIGHT_MODEL_TIMEOUT_SECS";
pub const UPLOAD_TIMEOUT_ENV: &str = "DATAINSIGHT_UPLOAD_TIMEOUT_SECS";
pub const MAX_EDIT_DISTANCE_ENV: &str = "DATAINSIGHT_MAX_EDIT_DISTANCE";
pub const QUANTILES_ENV: &str = "DATAINSIGHT_QUANTILES";
pub const HIST_BINS_ENV: &str = "DATAINSIGHT_HIST_BINS";
pub const MAX_TABLE_BYTES_ENV: &str = "DATAINSIGHT_MAX_TABLE_BYTES";

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?} (expected {expected})")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{0}")]
    OutOfRange(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model_timeout: Duration,
    pub upload_timeout: Duration,
    pub max_edit_distance: usize,
    pub default_quantiles: Vec<f64>,
    pub default_bins: usize,
    pub max_table_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_edit_distance: MAX_EDIT_DISTANCE,
            default_quantiles: DEFAULT_QUANTILES.to_vec(),
            default_bins: DEFAULT_BINS,
            max_table_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (the process environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(MODEL_TIMEOUT_ENV) {
            config.model_timeout = parse_secs(MODEL_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = get(UPLOAD_TIMEOUT_ENV) {
            config.upload_timeout = parse_secs(UPLOAD_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = get(MAX_EDIT_DISTANCE_ENV) {
            config.max_edit_distance = parse_usize(MAX_EDIT_DISTANCE_ENV, &v)?;
        }
        if let Some(v) = get(QUANTILES_ENV) {
            config.default_quantiles = parse_quantiles(&v)?;
        }
        if let Some(v) = get(HIST_BINS_ENV) {
            config.default_bins = parse_usize(HIST_BINS_ENV, &v)?;
        }
        if let Some(v) = get(MAX_TABLE_BYTES_ENV) {
            config.max_table_bytes = parse_usize(MAX_TABLE_BYTES_ENV, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_timeout.is_zero() || self.upload_timeout.is_zero() {
            return Err(ConfigError::OutOfRange("timeouts must be greater than zero".to_string()));
        }
        if self.max_edit_distance > MAX_EDIT_DISTANCE {
            return Err(ConfigError::OutOfRange(format!(
                "max edit distance {} exceeds the supported bound {MAX_EDIT_DISTANCE}",
                self.max_edit_distance
            )));
        }
        if self.default_quantiles.is_empty()
            || self.default_quantiles.iter().any(|q| !(0.0..=1.0).contains(q))
        {
            return Err(ConfigError::OutOfRange(
                "default quantiles must be a non-empty list within [0, 1]".to_string(),
            ));
        }
        if !(1..=MAX_BINS).contains(&self.default_bins) {
            return Err(ConfigError::OutOfRange(format!(
                "histogram bins must be within 1..={MAX_BINS}"
            )));
        }
        if self.max_table_bytes == 0 {
            return Err(ConfigError::OutOfRange("max table bytes must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_distance: self.max_edit_distance,
            default_quantiles: self.default_quantiles.clone(),
            default_bins: self.default_bins,
            ..ResolverConfig::default()
        }
    }
}

fn parse_usize(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_secs(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs = value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| ConfigError::Invalid {
            name,
            value: value.to_string(),
            expected: "a positive number of seconds",
        })?;
    Ok(Duration::from_secs_f64(secs))
}

fn parse_quantiles(value: &str) -> Result<Vec<f64>, ConfigError> {
    let mut out = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::Invalid {
            name: QUANTILES_ENV,
            value: value.to_string(),
            expected: "a comma-separated list of numbers",
        })?;
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    Ok(out)
}
