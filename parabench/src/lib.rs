//! Parabench compares two ways of running many small CPU and memory bound
//! tasks: a bounded pool of OS threads and one lightweight task per request.
//!
//! The crate follows a slim-core layout: small building blocks (metrics,
//! aggregates, reports, reporters, executors) composed by a few drivers.
//!
//! # Architecture
//!
//! - [`kernel`]: the measured work, a scalar and a lane-chunked dot product
//!   over a shared read-only [`Dataset`](kernel::Dataset).
//! - [`Executor`]: runs N tasks and returns once all of them have finished.
//!   [`executor::Strategy`] selects the bounded or the unbounded model.
//! - [`trial::run_trial`]: one timed burst, observed by a
//!   [`LatencyRecorder`](latency::LatencyRecorder) and a
//!   [`MemorySampler`](sampler::MemorySampler).
//! - [`Aggregate`] and [`Report`]: trials are collected by
//!   [`StatAggregator`](aggregate::StatAggregator) and reduced to means and
//!   population standard deviations.
//! - [`sweep::Sweep`]: the concurrency × data-size matrix.
//! - [`stability::StabilityRun`]: the continuous mode with per-second rows
//!   and optional CSV output, summarized offline by [`analysis`].
//! - [`Reporter`]: sends finished rows to the console, a CSV file or JSON lines.
//!
//! # Example
//!
//! ```no_run
//! use parabench::{
//!     config::HarnessSettings,
//!     context::HarnessContext,
//!     sweep::{Sweep, SweepPlan, SweepTableReporter},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), parabench::HarnessError> {
//!     let ctx = HarnessContext::new(HarnessSettings::default());
//!     let plan = SweepPlan::builder().concurrency_levels(vec![1_000]).build();
//!     let rows = Sweep::new(&ctx, plan)
//!         .run(&mut SweepTableReporter::stdout())
//!         .await?;
//!     println!("{} rows", rows.len());
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: re-exports the `#[metric]` and `#[aggregate]` attributes.
//!   (Enabled by default)

extern crate self as parabench;

/// Repeated trials and their raw collection
pub mod aggregate;
pub mod analysis;
pub mod config;
pub mod context;
pub mod csv;
pub mod error;
/// Bounded and unbounded task execution
pub mod executor;
/// Host runtime readings: heap, collector time, vector width
pub mod host;
pub mod kernel;
pub mod latency;
/// Single metrics
pub mod metric;
/// Reports and Reporters
pub mod report;
pub mod sampler;
pub mod stability;
pub mod sweep;
pub mod trial;

pub use aggregate::Aggregate;
pub use error::{HarnessError, TaskError};
pub use executor::{Executor, Strategy};
pub use metric::Metric;
pub use report::{Report, Reporter};

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use parabench_macros::*;
}
