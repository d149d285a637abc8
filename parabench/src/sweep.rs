//! Sweep over the concurrency × data-size matrix, comparing both strategies
//! at every point.

use std::io::{Stdout, Write};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    Reporter,
    aggregate::StatAggregator,
    context::HarnessContext,
    error::HarnessError,
    executor::Strategy,
    report::{TrialSummary, group_thousands},
    trial::{WorkloadConfig, run_trial},
};

/// Discarded trials run once per strategy before measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warmup {
    pub concurrency: usize,
    pub data_size: usize,
}

impl Default for Warmup {
    fn default() -> Self {
        Self {
            concurrency: 1_000,
            data_size: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct SweepPlan {
    #[builder(default = vec![1_000, 10_000, 50_000])]
    pub concurrency_levels: Vec<usize>,
    #[builder(default = vec![1_000, 10_000, 100_000])]
    pub data_sizes: Vec<usize>,
    #[builder(default = Some(Warmup::default()))]
    pub warmup: Option<Warmup>,
}

impl SweepPlan {
    fn validate(&self, dataset_len: usize) -> Result<(), HarnessError> {
        if self.concurrency_levels.is_empty() || self.data_sizes.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "sweep needs at least one concurrency level and one data size".into(),
            ));
        }
        if let Some(&too_big) = self.data_sizes.iter().find(|&&d| d > dataset_len) {
            return Err(HarnessError::DataSizeExceedsDataset {
                requested: too_big,
                available: dataset_len,
            });
        }
        Ok(())
    }
}

/// Ready-made matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Preset {
    /// 3×3: 1k/10k/50k requests × 1k/10k/100k elements.
    Matrix,
    /// Allocation-heavy comparison: 10k/50k requests × 1k elements.
    Gc,
    /// Throughput scaling up to 200k requests and 200k elements.
    Scaling,
}

impl Preset {
    pub fn plan(self) -> SweepPlan {
        match self {
            Preset::Matrix => SweepPlan::builder().build(),
            Preset::Gc => SweepPlan::builder()
                .concurrency_levels(vec![10_000, 50_000])
                .data_sizes(vec![1_000])
                .build(),
            Preset::Scaling => SweepPlan::builder()
                .concurrency_levels(vec![1_000, 10_000, 50_000, 100_000, 200_000])
                .data_sizes(vec![100, 10_000, 100_000, 200_000])
                .build(),
        }
    }
}

/// Both strategies' summaries for one (data size, concurrency) point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub data_size: usize,
    pub concurrency: usize,
    pub bounded: TrialSummary,
    pub unbounded: TrialSummary,
}

impl ScenarioRow {
    /// Unbounded over bounded mean throughput; 0 when bounded measured nothing.
    pub fn speedup(&self) -> f64 {
        let bounded = self.bounded.requests_per_second.mean;
        if bounded > 0.0 {
            self.unbounded.requests_per_second.mean / bounded
        } else {
            0.0
        }
    }
}

/// Row with the highest unbounded mean compute rate.
pub fn peak_compute(rows: &[ScenarioRow]) -> Option<&ScenarioRow> {
    rows.iter().max_by(|a, b| {
        a.unbounded
            .compute_rate
            .mean
            .total_cmp(&b.unbounded.compute_rate.mean)
    })
}

pub struct Sweep<'a> {
    ctx: &'a HarnessContext,
    plan: SweepPlan,
}

impl<'a> Sweep<'a> {
    pub fn new(ctx: &'a HarnessContext, plan: SweepPlan) -> Self {
        Self { ctx, plan }
    }

    /// Warms up, then measures every matrix point in data-size-major order,
    /// handing each row to `reporter` as soon as it is complete.
    pub async fn run<R>(&self, reporter: &mut R) -> Result<Vec<ScenarioRow>, HarnessError>
    where
        R: Reporter<ScenarioRow>,
    {
        self.plan.validate(self.ctx.dataset.len())?;

        if let Some(warmup) = self.plan.warmup {
            tracing::info!(?warmup, "Warming up...");
            for strategy in Strategy::ALL {
                let config = WorkloadConfig::builder()
                    .data_size(warmup.data_size.min(self.ctx.dataset.len()).max(1))
                    .concurrency(warmup.concurrency)
                    .strategy(strategy)
                    .build();
                run_trial(self.ctx, &config).await?;
            }
            self.ctx.settle().await;
            tracing::info!("Warm-up done");
        }

        let aggregator = StatAggregator::new(self.ctx);
        let points = self.plan.data_sizes.len() * self.plan.concurrency_levels.len();
        let mut rows = Vec::with_capacity(points);
        for &data_size in &self.plan.data_sizes {
            for &concurrency in &self.plan.concurrency_levels {
                let config = |strategy: Strategy| {
                    WorkloadConfig::builder()
                        .data_size(data_size)
                        .concurrency(concurrency)
                        .strategy(strategy)
                        .build()
                };

                let bounded = aggregator.measure(&config(Strategy::Bounded)).await?;
                self.ctx.settle().await;
                let unbounded = aggregator.measure(&config(Strategy::Unbounded)).await?;

                let row = ScenarioRow {
                    data_size,
                    concurrency,
                    bounded,
                    unbounded,
                };
                reporter.report(&row).await?;
                rows.push(row);
                self.ctx.settle().await;
            }
        }
        Ok(rows)
    }
}

const TABLE_WIDTH: usize = 176;

/// Fixed-width console table, one line per row, with a rule between data
/// sizes.
pub struct SweepTableReporter<W: Write = Stdout> {
    out: W,
    header_written: bool,
    last_data_size: Option<usize>,
}

impl SweepTableReporter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> SweepTableReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
            last_data_size: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn header() -> String {
        format!(
            "{:<8} | {:<8} | {:<18} | {:<18} | {:<14} | {:<14} | {:<14} | {:<14} | {:<14} | {:<14} | {:<7}\n{}",
            "Threads",
            "Data",
            "Bnd(Req/s)",
            "Unb(Req/s)",
            "Bnd(GOps/s)",
            "Unb(GOps/s)",
            "Bnd P99(us)",
            "Unb P99(us)",
            "Bnd Mem(MB)",
            "Unb Mem(MB)",
            "Gain",
            "-".repeat(TABLE_WIDTH)
        )
    }

    pub fn format_row(row: &ScenarioRow) -> String {
        format!(
            "{:<8} | {:<8} | {:<18} | {:<18} | {:<14} | {:<14} | {:<14} | {:<14} | {:<14} | {:<14} | {:>6.2}x",
            group_thousands(row.concurrency as f64, 0),
            group_thousands(row.data_size as f64, 0),
            row.bounded.requests_per_second.display(0),
            row.unbounded.requests_per_second.display(0),
            row.bounded.compute_rate.display(1),
            row.unbounded.compute_rate.display(1),
            row.bounded.p99_latency_micros.display(0),
            row.unbounded.p99_latency_micros.display(0),
            row.bounded.peak_memory_mb.display(1),
            row.unbounded.peak_memory_mb.display(1),
            row.speedup()
        )
    }

    fn write_row(&mut self, row: &ScenarioRow) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{}", Self::header())?;
            self.header_written = true;
        } else if self.last_data_size != Some(row.data_size) {
            writeln!(self.out, "{}", "-".repeat(TABLE_WIDTH))?;
        }
        self.last_data_size = Some(row.data_size);
        writeln!(self.out, "{}", Self::format_row(row))?;
        self.out.flush()
    }
}

impl<W: Write + Send> Reporter<ScenarioRow> for SweepTableReporter<W> {
    async fn report(&mut self, row: &ScenarioRow) -> Result<(), HarnessError> {
        self.write_row(row).map_err(|source| HarnessError::Io {
            path: "<stdout>".into(),
            source,
        })
    }
}

/// One JSON object per line.
pub struct JsonLinesReporter<W: Write = Stdout> {
    out: W,
}

impl JsonLinesReporter<Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Reporter<ScenarioRow> for JsonLinesReporter<W> {
    async fn report(&mut self, row: &ScenarioRow) -> Result<(), HarnessError> {
        let line = serde_json::to_string(row)
            .map_err(|e| HarnessError::InvalidConfig(format!("unserializable row: {e}")))?;
        writeln!(self.out, "{line}")
            .and_then(|()| self.out.flush())
            .map_err(|source| HarnessError::Io {
                path: "<stdout>".into(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HarnessSettings, report::StatResult};

    fn summary(rps: f64, ops: f64) -> TrialSummary {
        TrialSummary {
            trials: 1,
            requests_per_second: StatResult { mean: rps, std_dev: 0.0 },
            compute_rate: StatResult { mean: ops, std_dev: 0.0 },
            ..TrialSummary::default()
        }
    }

    fn row(data_size: usize, concurrency: usize, bnd: f64, unb: f64, ops: f64) -> ScenarioRow {
        ScenarioRow {
            data_size,
            concurrency,
            bounded: summary(bnd, ops / 2.0),
            unbounded: summary(unb, ops),
        }
    }

    #[test]
    fn speedup_and_peak() {
        let rows = vec![
            row(100, 10, 100.0, 250.0, 1.5),
            row(100, 20, 0.0, 10.0, 3.0),
            row(200, 10, 50.0, 25.0, 0.5),
        ];
        assert_eq!(rows[0].speedup(), 2.5);
        assert_eq!(rows[1].speedup(), 0.0);
        assert_eq!(peak_compute(&rows).map(|r| r.concurrency), Some(20));
        assert!(peak_compute(&[]).is_none());
    }

    #[test]
    fn presets_fit_the_default_dataset() {
        for preset in [Preset::Matrix, Preset::Gc, Preset::Scaling] {
            let plan = preset.plan();
            assert!(plan.validate(crate::config::MAX_DATA_SIZE).is_ok(), "{preset:?}");
        }
        assert_eq!(Preset::Gc.plan().data_sizes, vec![1_000]);
    }

    #[tokio::test]
    async fn table_reporter_writes_header_once_and_rules_between_sizes() {
        let mut reporter = SweepTableReporter::new(Vec::new());
        let rows = [
            row(100, 10, 1.0, 2.0, 0.1),
            row(100, 20, 1.0, 2.0, 0.1),
            row(200, 10, 1.0, 2.0, 0.1),
        ];
        for r in &rows {
            reporter.report(r).await.unwrap();
        }
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.iter().filter(|l| l.starts_with("Threads")).count(), 1);
        // header, rule, row, row, rule, row
        assert_eq!(lines.len(), 6);
        assert!(lines[4].chars().all(|c| c == '-'));
        assert!(lines[5].trim_end().ends_with("2.00x"));
    }

    #[tokio::test]
    async fn json_reporter_emits_one_object_per_row() {
        let mut reporter = JsonLinesReporter::new(Vec::new());
        reporter.report(&row(100, 10, 1.0, 2.0, 0.1)).await.unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let parsed: ScenarioRow = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed.concurrency, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_data_is_rejected_before_warmup() {
        let settings = HarnessSettings::builder().max_data_size(64).seed(3).build();
        let ctx = HarnessContext::new(settings);
        let plan = SweepPlan::builder()
            .data_sizes(vec![65])
            .concurrency_levels(vec![1])
            .build();
        let mut reporter = SweepTableReporter::new(Vec::new());
        let err = Sweep::new(&ctx, plan).run(&mut reporter).await.unwrap_err();
        assert!(matches!(err, HarnessError::DataSizeExceedsDataset { requested: 65, .. }));
    }
}
