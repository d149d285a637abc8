//! Offline summary of stability CSV files, one block per `Mode` label.

use std::collections::BTreeMap;

use parabench_macros::aggregate;
use serde::{Deserialize, Serialize};

use crate::{
    Aggregate, Report,
    csv::CsvRecord,
    metric::StabilitySnapshot,
    report::{StatResult, group_thousands},
};

/// Rows compared per mode unless told otherwise.
pub const DEFAULT_ANALYSIS_SAMPLES: usize = 60;

/// The snapshots of one mode, in file order.
#[aggregate]
#[derive(Default)]
pub struct ModeSamples {
    pub snapshots: Vec<StabilitySnapshot>,
}

impl Aggregate for ModeSamples {
    type Metric = StabilitySnapshot;

    fn new() -> Self {
        ModeSamples::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.snapshots.push(metric.clone());
    }

    fn merge(&mut self, other: Self) {
        self.snapshots.extend(other.snapshots);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub stats: StatResult,
    pub min: f64,
    pub max: f64,
}

impl ColumnSummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        Self {
            stats: StatResult::from_samples(samples),
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeSummary {
    pub samples: usize,
    pub throughput: ColumnSummary,
    pub latency_p99_ms: ColumnSummary,
    pub heap_used_mb: ColumnSummary,
}

impl From<ModeSamples> for ModeSummary {
    fn from(value: ModeSamples) -> Self {
        let column = |f: fn(&StabilitySnapshot) -> f64| {
            let samples: Vec<f64> = value.snapshots.iter().map(f).collect();
            ColumnSummary::from_samples(&samples)
        };
        Self {
            samples: value.snapshots.len(),
            throughput: column(|s| s.requests_in_interval as f64),
            latency_p99_ms: column(|s| s.p99_latency_ms),
            heap_used_mb: column(|s| s.heap_used_mb),
        }
    }
}

impl Report<ModeSamples> for ModeSummary {}

/// Groups records by mode and summarizes the first `max_samples` rows of each.
pub fn summarize_by_mode(
    records: &[CsvRecord],
    max_samples: usize,
) -> BTreeMap<String, ModeSummary> {
    let mut groups: BTreeMap<&str, ModeSamples> = BTreeMap::new();
    for record in records {
        let group = groups.entry(record.mode.as_str()).or_default();
        if group.snapshots.len() < max_samples {
            group.consume(&record.snapshot);
        }
    }
    groups
        .into_iter()
        .map(|(mode, samples)| (mode.to_string(), ModeSummary::from(samples)))
        .collect()
}

/// Fixed-width comparison table.
pub fn format_summary(summaries: &BTreeMap<String, ModeSummary>) -> String {
    let mut out = format!(
        "{:<16} | {:<7} | {:<34} | {:<30} | {:<30}\n{}\n",
        "Mode",
        "Samples",
        "Throughput (min..max)",
        "P99 Lat ms (min..max)",
        "Heap MB (min..max)",
        "-".repeat(129)
    );
    for (mode, s) in summaries {
        out.push_str(&format!(
            "{:<16} | {:<7} | {:<34} | {:<30} | {:<30}\n",
            mode,
            s.samples,
            column_cell(&s.throughput, 0),
            column_cell(&s.latency_p99_ms, 2),
            column_cell(&s.heap_used_mb, 1),
        ));
    }
    out
}

fn column_cell(c: &ColumnSummary, decimals: usize) -> String {
    format!(
        "{} ({}..{})",
        c.stats.display(decimals),
        group_thousands(c.min, decimals),
        group_thousands(c.max, decimals)
    )
}
