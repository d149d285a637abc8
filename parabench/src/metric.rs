use std::fmt::Debug;

use parabench_macros::metric;
use serde::{Serialize, de::DeserializeOwned};

/// A single sample produced by the harness.
///
/// Implement it with the `#[metric]` attribute, which also derives the
/// required supertraits.
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Result of one burst trial.
#[metric]
pub struct TrialMetrics {
    pub requests_per_second: f64,
    pub p99_latency_micros: f64,
    /// Billions of arithmetic operations per second.
    pub compute_rate: f64,
    pub peak_memory_mb: f64,
    pub min_latency_micros: f64,
    pub failed_tasks: usize,
}

/// One per-second row of the stability mode.
#[metric]
pub struct StabilitySnapshot {
    pub elapsed_seconds: u64,
    /// Requests completed since the previous snapshot.
    pub requests_in_interval: u64,
    pub p99_latency_ms: f64,
    pub heap_used_mb: f64,
    /// Cumulative collector time.
    pub gc_time_ms: u64,
}
