use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::OPS_PER_ELEMENT,
    context::HarnessContext,
    error::{HarnessError, TaskError},
    executor::{Executor, Strategy},
    kernel::Kernel,
    latency::LatencyRecorder,
    metric::TrialMetrics,
    sampler::MemorySampler,
};

/// One point of the benchmark matrix, run under one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct WorkloadConfig {
    pub data_size: usize,
    pub concurrency: usize,
    pub strategy: Strategy,
    /// Overrides the strategy's paired kernel.
    #[builder(default, setter(strip_option))]
    pub kernel: Option<Kernel>,
}

impl WorkloadConfig {
    pub fn effective_kernel(&self) -> Kernel {
        self.kernel.unwrap_or_else(|| self.strategy.paired_kernel())
    }

    pub fn validate(&self, dataset_len: usize) -> Result<(), HarnessError> {
        if self.concurrency == 0 {
            return Err(HarnessError::InvalidConfig(
                "concurrency must be positive".into(),
            ));
        }
        if self.data_size == 0 {
            return Err(HarnessError::InvalidConfig("data size must be positive".into()));
        }
        if self.data_size > dataset_len {
            return Err(HarnessError::DataSizeExceedsDataset {
                requested: self.data_size,
                available: dataset_len,
            });
        }
        Ok(())
    }
}

/// Runs a single burst of `config.concurrency` tasks and measures it.
///
/// Each task times itself, runs the kernel over the first `data_size`
/// elements, allocates a scratch buffer to create allocation pressure and
/// records its latency. The throughput window is exactly the executor's run.
pub async fn run_trial(
    ctx: &HarnessContext,
    config: &WorkloadConfig,
) -> Result<TrialMetrics, HarnessError> {
    config.validate(ctx.dataset.len())?;

    let recorder = Arc::new(LatencyRecorder::new());
    let executor = config.strategy.executor(ctx.settings.pool_size);
    let task = {
        let dataset = Arc::clone(&ctx.dataset);
        let sink = Arc::clone(&ctx.sink);
        let recorder = Arc::clone(&recorder);
        let kernel = config.effective_kernel();
        let n = config.data_size;
        let allocation_size = ctx.settings.allocation_size;
        move || -> Result<(), TaskError> {
            let start = Instant::now();
            let result = dataset.reduce(kernel, n);

            let mut garbage = vec![0u8; allocation_size];
            if let Some(first) = garbage.first_mut() {
                *first = 1;
            }
            let touched = std::hint::black_box(&garbage).first().copied().unwrap_or(0);
            sink.consume(result + f32::from(touched));

            recorder.record(start.elapsed());
            Ok(())
        }
    };

    let mut sampler = MemorySampler::start(Arc::clone(&ctx.host), ctx.settings.sample_interval)?;
    let outcome = executor.run(config.concurrency, task).await;
    sampler.stop();
    let outcome = outcome?;

    let secs = outcome.elapsed.as_secs_f64();
    let requests_per_second = if secs > 0.0 {
        config.concurrency as f64 / secs
    } else {
        0.0
    };
    let (min_latency, p99_latency) = recorder.min_and_p99();

    Ok(TrialMetrics {
        requests_per_second,
        p99_latency_micros: p99_latency.as_nanos() as f64 / 1_000.0,
        compute_rate: requests_per_second * config.data_size as f64 * OPS_PER_ELEMENT / 1e9,
        peak_memory_mb: sampler.peak_mb(),
        min_latency_micros: min_latency.as_nanos() as f64 / 1_000.0,
        failed_tasks: outcome.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessSettings;

    fn small_context() -> HarnessContext {
        let settings = HarnessSettings::builder()
            .max_data_size(4_096)
            .pool_size(8)
            .seed(1)
            .build();
        HarnessContext::new(settings)
    }

    #[test]
    fn paired_and_overridden_kernels() {
        let config = WorkloadConfig::builder()
            .data_size(10)
            .concurrency(10)
            .strategy(Strategy::Bounded)
            .build();
        assert_eq!(config.effective_kernel(), Kernel::Scalar);

        let config = WorkloadConfig::builder()
            .data_size(10)
            .concurrency(10)
            .strategy(Strategy::Bounded)
            .kernel(Kernel::Chunked)
            .build();
        assert_eq!(config.effective_kernel(), Kernel::Chunked);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let base = WorkloadConfig::builder()
            .data_size(100)
            .concurrency(10)
            .strategy(Strategy::Unbounded)
            .build();
        assert!(base.validate(100).is_ok());
        assert!(matches!(
            base.validate(99),
            Err(HarnessError::DataSizeExceedsDataset { requested: 100, available: 99 })
        ));
        assert!(WorkloadConfig { concurrency: 0, ..base }.validate(100).is_err());
        assert!(WorkloadConfig { data_size: 0, ..base }.validate(100).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn trial_metrics_are_consistent() {
        let ctx = small_context();
        for strategy in Strategy::ALL {
            let config = WorkloadConfig::builder()
                .data_size(1_000)
                .concurrency(500)
                .strategy(strategy)
                .build();
            let m = run_trial(&ctx, &config).await.unwrap();

            assert!(m.requests_per_second.is_finite() && m.requests_per_second > 0.0);
            assert!(m.p99_latency_micros >= m.min_latency_micros);
            let expected = m.requests_per_second * 1_000.0 * 2.0 / 1e9;
            assert!((m.compute_rate - expected).abs() <= expected * 1e-12);
            assert!(m.peak_memory_mb > 0.0);
            assert_eq!(m.failed_tasks, 0);
        }
        // The kernel result reached the sink.
        let expected = ctx.dataset.reduce(Kernel::Chunked, 1_000) + 1.0;
        assert!((ctx.sink.value() - expected).abs() <= expected.abs() * 1e-3);
    }
}
