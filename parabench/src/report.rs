use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::future::Future;

use crate::{Aggregate, aggregate::TrialAggregate, error::HarnessError, metric::TrialMetrics};

/// A [`Report`] is the processed form of an [`Aggregate`].
///
/// Reports derive means, deviations and other final numbers from raw
/// aggregated data. They are plain data: no I/O, built with `From<A>`.
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] takes finished rows and sends them somewhere: the console,
/// a CSV file, a JSON stream.
///
/// Reporters are the I/O boundary of the harness; everything before them is
/// pure computation.
pub trait Reporter<R> {
    fn report(&mut self, row: &R) -> impl Future<Output = Result<(), HarnessError>> + Send;
}

/// Population mean and standard deviation (variance divided by N).
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct StatResult {
    pub mean: f64,
    pub std_dev: f64,
}

impl StatResult {
    /// `{0, 0}` for an empty sample set.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std_dev: variance.sqrt(),
        }
    }

    /// `mean ±std_dev` with thousands separators, e.g. `12,345 ±678`.
    pub fn display(&self, decimals: usize) -> String {
        format!(
            "{} ±{}",
            group_thousands(self.mean, decimals),
            group_thousands(self.std_dev, decimals)
        )
    }
}

/// Mean and deviation of every trial metric for one (config, strategy) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trials: usize,
    pub requests_per_second: StatResult,
    pub p99_latency_micros: StatResult,
    pub compute_rate: StatResult,
    pub peak_memory_mb: StatResult,
    pub failed_tasks: usize,
}

impl From<TrialAggregate> for TrialSummary {
    fn from(value: TrialAggregate) -> Self {
        let column = |f: fn(&TrialMetrics) -> f64| {
            let samples: Vec<f64> = value.trials.iter().map(f).collect();
            StatResult::from_samples(&samples)
        };
        Self {
            trials: value.trials.len(),
            requests_per_second: column(|t| t.requests_per_second),
            p99_latency_micros: column(|t| t.p99_latency_micros),
            compute_rate: column(|t| t.compute_rate),
            peak_memory_mb: column(|t| t.peak_memory_mb),
            failed_tasks: value.trials.iter().map(|t| t.failed_tasks).sum(),
        }
    }
}

impl Report<TrialAggregate> for TrialSummary {}

/// Formats `value` with `decimals` fraction digits and `,` between thousands.
pub fn group_thousands(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(formatted.len() + int_part.len() / 3 + 1);
    if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        grouped.push('-');
    }
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Aggregate;

    #[test]
    fn identical_samples_have_zero_deviation() {
        let stat = StatResult::from_samples(&[4.2, 4.2, 4.2, 4.2]);
        assert!((stat.mean - 4.2).abs() < 1e-12);
        assert_eq!(stat.std_dev, 0.0);
    }

    #[test]
    fn deviation_divides_by_n() {
        // Sample deviation would be sqrt(32/7); population is exactly 2.
        let stat = StatResult::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stat.mean, 5.0);
        assert_eq!(stat.std_dev, 2.0);
    }

    #[test]
    fn empty_samples() {
        assert_eq!(StatResult::from_samples(&[]), StatResult::default());
    }

    #[test]
    fn summary_reduces_each_column() {
        let trial = |rps: f64, mem: f64| TrialMetrics {
            requests_per_second: rps,
            p99_latency_micros: 50.0,
            compute_rate: rps * 2.0,
            peak_memory_mb: mem,
            min_latency_micros: 1.0,
            failed_tasks: 1,
        };
        let mut agg = TrialAggregate::new();
        agg.aggregate(&[trial(100.0, 10.0), trial(300.0, 30.0)]);
        let summary = TrialSummary::from(agg);

        assert_eq!(summary.trials, 2);
        assert_eq!(summary.requests_per_second, StatResult { mean: 200.0, std_dev: 100.0 });
        assert_eq!(summary.compute_rate.mean, 400.0);
        assert_eq!(summary.p99_latency_micros.std_dev, 0.0);
        assert_eq!(summary.peak_memory_mb.mean, 20.0);
        assert_eq!(summary.failed_tasks, 2);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(1234567.891, 0), "1,234,568");
        assert_eq!(group_thousands(1234.5, 1), "1,234.5");
        assert_eq!(group_thousands(999.0, 0), "999");
        assert_eq!(group_thousands(-12345.0, 0), "-12,345");
        assert_eq!(group_thousands(0.25, 2), "0.25");
        assert_eq!(
            StatResult { mean: 12345.0, std_dev: 678.4 }.display(0),
            "12,345 ±678"
        );
    }
}
