use std::fmt::Debug;

use parabench_macros::aggregate;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Metric,
    context::HarnessContext,
    error::HarnessError,
    metric::TrialMetrics,
    report::TrialSummary,
    trial::{WorkloadConfig, run_trial},
};

/// Collects [`Metric`]s into a compact, mergeable intermediate form.
///
/// Aggregates keep raw material only. Means, deviations and percentiles are
/// derived later by a [`Report`](crate::Report) built from the aggregate, so
/// different reports can be computed from the same data.
///
/// `merge` must be associative and commutative.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Calls [`consume`](Self::consume) for each metric.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Every trial of one (config, strategy) pair, in completion order.
#[aggregate]
#[derive(Default)]
pub struct TrialAggregate {
    pub trials: Vec<TrialMetrics>,
}

impl Aggregate for TrialAggregate {
    type Metric = TrialMetrics;

    fn new() -> Self {
        TrialAggregate::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.trials.push(metric.clone());
    }

    fn merge(&mut self, other: Self) {
        self.trials.extend(other.trials);
    }
}

/// Runs repeated, strictly sequential trials of one configuration.
///
/// The host is settled between trials so every trial starts from a similar
/// memory baseline.
pub struct StatAggregator<'a> {
    ctx: &'a HarnessContext,
}

impl<'a> StatAggregator<'a> {
    pub fn new(ctx: &'a HarnessContext) -> Self {
        Self { ctx }
    }

    pub async fn collect(&self, config: &WorkloadConfig) -> Result<TrialAggregate, HarnessError> {
        let iterations = self.ctx.settings.iterations;
        if iterations == 0 {
            return Err(HarnessError::InvalidConfig(
                "iterations must be at least 1".into(),
            ));
        }

        let mut agg = TrialAggregate::new();
        for i in 0..iterations {
            if i > 0 {
                self.ctx.settle().await;
            }
            let metrics = run_trial(self.ctx, config).await?;
            tracing::debug!(
                trial = i + 1,
                strategy = %config.strategy,
                rps = metrics.requests_per_second,
                "Trial finished"
            );
            agg.consume(&metrics);
        }
        Ok(agg)
    }

    pub async fn measure(&self, config: &WorkloadConfig) -> Result<TrialSummary, HarnessError> {
        self.collect(config).await.map(TrialSummary::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(rps: f64) -> TrialMetrics {
        TrialMetrics {
            requests_per_second: rps,
            p99_latency_micros: 10.0,
            compute_rate: 1.0,
            peak_memory_mb: 2.0,
            min_latency_micros: 1.0,
            failed_tasks: 0,
        }
    }

    #[test]
    fn consume_and_merge_keep_every_trial() {
        let mut a = TrialAggregate::new();
        a.aggregate(&[metrics(1.0), metrics(2.0)]);
        let mut b = TrialAggregate::new();
        b.consume(&metrics(3.0));
        a.merge(b);
        let rps: Vec<f64> = a.trials.iter().map(|t| t.requests_per_second).collect();
        assert_eq!(rps, vec![1.0, 2.0, 3.0]);
    }
}
