//! Defaults and runtime settings shared by the sweep and stability modes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Worker count of the bounded pool.
pub const DEFAULT_POOL_SIZE: usize = 100;
/// Trials per (config, strategy) pair.
pub const DEFAULT_ITERATIONS: usize = 5;
/// Bytes allocated by every trial task to create allocation pressure.
pub const ALLOCATION_SIZE: usize = 10 * 1024;
/// Length of the two shared input arrays.
pub const MAX_DATA_SIZE: usize = 200_000;
/// Memory sampler polling interval.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
/// Pause after a collection request, before the next trial.
pub const SETTLE_PAUSE: Duration = Duration::from_millis(50);
/// Multiply + add per element.
pub const OPS_PER_ELEMENT: f64 = 2.0;

pub const DEFAULT_STABILITY_SECS: u64 = 600;
pub const STABILITY_THREAD_COUNT: usize = 1000;
pub const STABILITY_ALLOCATION_SIZE: usize = 1024 * 1024;
pub const CPU_WORK_LOOPS: usize = 1000;
pub const DEFAULT_MODE_LABEL: &str = "Unknown";
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);
pub const YIELD_SLEEP: Duration = Duration::from_millis(1);
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Knobs for burst trials. Every field has a sensible default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct HarnessSettings {
    #[builder(default = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,
    #[builder(default = DEFAULT_ITERATIONS)]
    pub iterations: usize,
    #[builder(default = ALLOCATION_SIZE)]
    pub allocation_size: usize,
    #[builder(default = MAX_DATA_SIZE)]
    pub max_data_size: usize,
    #[builder(default = SAMPLE_INTERVAL)]
    pub sample_interval: Duration,
    #[builder(default = SETTLE_PAUSE)]
    pub settle_pause: Duration,
    /// Seed for the dataset; `None` draws from OS entropy.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Parses the stability-mode duration argument.
///
/// A malformed or zero value is not fatal: it is logged and the default is used.
pub fn parse_duration_secs(raw: Option<&str>) -> u64 {
    match raw.map(str::trim) {
        None => DEFAULT_STABILITY_SECS,
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                tracing::warn!(
                    "Invalid duration argument {value:?}. Using default of {DEFAULT_STABILITY_SECS}s."
                );
                DEFAULT_STABILITY_SECS
            }
        },
    }
}

/// Parses a comma separated list of positive integers, e.g. `1000,10000`.
pub fn parse_usize_list(raw: &str) -> Result<Vec<usize>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let cleaned = s.replace('_', "");
            match cleaned.parse::<usize>() {
                Ok(0) => Err(format!("{s:?} must be positive")),
                Ok(v) => Ok(v),
                Err(e) => Err(format!("{s:?}: {e}")),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .and_then(|v| {
            if v.is_empty() {
                Err("list must not be empty".to_string())
            } else {
                Ok(v)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_argument_falls_back_to_default() {
        assert_eq!(parse_duration_secs(None), DEFAULT_STABILITY_SECS);
        assert_eq!(parse_duration_secs(Some("abc")), DEFAULT_STABILITY_SECS);
        assert_eq!(parse_duration_secs(Some("0")), DEFAULT_STABILITY_SECS);
        assert_eq!(parse_duration_secs(Some("-5")), DEFAULT_STABILITY_SECS);
        assert_eq!(parse_duration_secs(Some(" 30 ")), 30);
    }

    #[test]
    fn usize_lists() {
        assert_eq!(parse_usize_list("1000, 10_000").unwrap(), vec![1000, 10_000]);
        assert!(parse_usize_list("").is_err());
        assert!(parse_usize_list("1,0").is_err());
        assert!(parse_usize_list("1,x").is_err());
    }

    #[test]
    fn settings_defaults() {
        let s = HarnessSettings::default();
        assert_eq!(s.pool_size, 100);
        assert_eq!(s.iterations, 5);
        assert_eq!(s.allocation_size, 10 * 1024);
        assert_eq!(s.seed, None);
    }
}
