//! Continuous stability mode: a fixed set of workers loops for a fixed
//! duration while a reporter emits one snapshot per second.

use std::{
    io::{Stdout, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch::{self, Receiver},
    task::JoinHandle,
    time::Instant,
};
use typed_builder::TypedBuilder;

use crate::{
    Reporter,
    config::{
        CPU_WORK_LOOPS, DEFAULT_MODE_LABEL, DEFAULT_STABILITY_SECS, DRAIN_TIMEOUT,
        REPORT_INTERVAL, STABILITY_ALLOCATION_SIZE, STABILITY_THREAD_COUNT, YIELD_SLEEP,
    },
    csv::CsvReporter,
    error::HarnessError,
    host::{Host, NativeHost},
    kernel::Blackhole,
    latency::LatencyRecorder,
    metric::StabilitySnapshot,
};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct StabilityConfig {
    #[builder(default = Duration::from_secs(DEFAULT_STABILITY_SECS))]
    pub duration: Duration,
    #[builder(default = STABILITY_THREAD_COUNT)]
    pub thread_count: usize,
    /// Bytes allocated by every worker iteration.
    #[builder(default = STABILITY_ALLOCATION_SIZE)]
    pub allocation_size: usize,
    #[builder(default = CPU_WORK_LOOPS)]
    pub cpu_work_loops: usize,
    /// Rows are appended here as well as printed when set.
    #[builder(default, setter(strip_option, into))]
    pub csv_path: Option<PathBuf>,
    /// Free-form label written into the `Mode` column.
    #[builder(default = DEFAULT_MODE_LABEL.to_string(), setter(into))]
    pub mode_label: String,
    #[builder(default = YIELD_SLEEP)]
    pub yield_sleep: Duration,
    #[builder(default = DRAIN_TIMEOUT)]
    pub drain_timeout: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StabilityConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.duration.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "stability duration must be positive".into(),
            ));
        }
        if self.thread_count == 0 {
            return Err(HarnessError::InvalidConfig(
                "stability mode needs at least one worker".into(),
            ));
        }
        Ok(())
    }

    /// Number of rows a run produces: one per started second.
    pub fn total_ticks(&self) -> u64 {
        let secs = self.duration.as_secs() + u64::from(self.duration.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StabilityState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl StabilityState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for StabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State touched by every worker and by the reporter.
#[derive(Debug, Default)]
pub struct StabilityShared {
    running: AtomicBool,
    state: AtomicU8,
    requests: AtomicU64,
    latencies: LatencyRecorder,
    sink: Blackhole,
}

/// Everything a finished run observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub snapshots: Vec<StabilitySnapshot>,
    pub total_requests: u64,
}

/// One stability run. Create it, then call [`run`](Self::run) once.
pub struct StabilityRun {
    config: StabilityConfig,
    host: Arc<dyn Host>,
    shared: Arc<StabilityShared>,
}

impl StabilityRun {
    pub fn new(config: StabilityConfig) -> Self {
        Self::with_host(config, Arc::new(NativeHost::new()))
    }

    pub fn with_host(config: StabilityConfig, host: Arc<dyn Host>) -> Self {
        Self {
            config,
            host,
            shared: Arc::new(StabilityShared::default()),
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub fn state(&self) -> StabilityState {
        StabilityState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StabilityState) {
        self.shared.state.store(state as u8, Ordering::Release);
        tracing::debug!("Stability run is now {state}");
    }

    /// Runs the workers for the configured duration, printing every snapshot
    /// through `console` and appending it to the CSV file when one is set.
    ///
    /// CSV problems never fail the run: they are logged and the run carries
    /// on with console output only.
    pub async fn run<R>(&self, console: &mut R) -> Result<StabilityReport, HarnessError>
    where
        R: Reporter<StabilitySnapshot>,
    {
        self.config.validate()?;
        if self
            .shared
            .state
            .compare_exchange(
                StabilityState::Idle as u8,
                StabilityState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(HarnessError::InvalidConfig(
                "a stability run can only be started once".into(),
            ));
        }

        let csv = self.open_csv();
        tracing::info!(
            "Starting stability test for {:?} with {} workers (mode {:?})",
            self.config.duration,
            self.config.thread_count,
            self.config.mode_label
        );

        self.shared.running.store(true, Ordering::Release);
        let start = Instant::now();
        let workers: Vec<JoinHandle<()>> = (0..self.config.thread_count)
            .map(|_| tokio::spawn(worker_loop(Arc::clone(&self.shared), self.load())))
            .collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let controller = async move {
            tokio::time::sleep_until(start + self.config.duration).await;
            self.shared.running.store(false, Ordering::Release);
            self.set_state(StabilityState::Draining);
            tracing::info!("Duration reached, draining workers...");
            self.drain(workers).await;
            // Reporter must not finish before the last worker has recorded.
            let _ = stop_tx.send(true);
        };
        let reporter = self.report_loop(start, stop_rx, console, csv);
        let ((), snapshots) = tokio::join!(controller, reporter);

        self.set_state(StabilityState::Stopped);
        let total_requests = snapshots.iter().map(|s| s.requests_in_interval).sum();
        tracing::info!(
            "Stability test finished: {total_requests} requests in {} rows",
            snapshots.len()
        );
        Ok(StabilityReport {
            snapshots,
            total_requests,
        })
    }

    fn load(&self) -> WorkerLoad {
        WorkerLoad {
            cpu_work_loops: self.config.cpu_work_loops,
            allocation_size: self.config.allocation_size,
            yield_sleep: self.config.yield_sleep,
        }
    }

    fn open_csv(&self) -> Option<CsvReporter> {
        let path = self.config.csv_path.as_ref()?;
        match CsvReporter::open(path, self.config.mode_label.clone()) {
            Ok(csv) => {
                tracing::info!("Appending snapshots to {}", path.display());
                Some(csv)
            }
            Err(e) => {
                tracing::error!("Failed to open CSV output, continuing on console only: {e}");
                None
            }
        }
    }

    async fn drain(&self, workers: Vec<JoinHandle<()>>) {
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(self.config.drain_timeout, join_all(workers)).await {
            Ok(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    tracing::warn!("Stability worker ended abnormally: {err}");
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Workers did not finish within {:?}, aborting the rest",
                    self.config.drain_timeout
                );
                aborts.iter().for_each(|handle| handle.abort());
            }
        }
    }

    /// Emits rows on absolute deadlines `start + k * REPORT_INTERVAL`, then
    /// one final row once the controller signals that workers are gone.
    async fn report_loop<R>(
        &self,
        start: Instant,
        mut stop: Receiver<bool>,
        console: &mut R,
        mut csv: Option<CsvReporter>,
    ) -> Vec<StabilitySnapshot>
    where
        R: Reporter<StabilitySnapshot>,
    {
        let total_ticks = self.config.total_ticks();
        let mut snapshots = Vec::with_capacity(total_ticks as usize);
        let mut next_tick = start;
        let mut tick = 0;

        while tick + 1 < total_ticks {
            next_tick += REPORT_INTERVAL;
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(next_tick) => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
            tick += 1;
            let snapshot = self.snapshot(tick);
            emit(&snapshot, console, &mut csv).await;
            snapshots.push(snapshot);
        }

        // A dropped sender also means the controller is done.
        let _ = stop.wait_for(|stopped| *stopped).await;
        tick += 1;
        let snapshot = self.snapshot(tick);
        emit(&snapshot, console, &mut csv).await;
        snapshots.push(snapshot);
        snapshots
    }

    fn snapshot(&self, tick: u64) -> StabilitySnapshot {
        let requests = self.shared.requests.swap(0, Ordering::AcqRel);
        let p99 = self.shared.latencies.percentile99();
        StabilitySnapshot {
            elapsed_seconds: tick,
            requests_in_interval: requests,
            p99_latency_ms: p99.as_secs_f64() * 1_000.0,
            heap_used_mb: self.host.heap_used_bytes() as f64 / MIB,
            gc_time_ms: self.host.gc_time().as_millis() as u64,
        }
    }
}

async fn emit<R, W>(
    snapshot: &StabilitySnapshot,
    console: &mut R,
    csv: &mut Option<CsvReporter<W>>,
) where
    R: Reporter<StabilitySnapshot>,
    W: Write + Send,
{
    if let Err(e) = console.report(snapshot).await {
        tracing::warn!("Failed to print snapshot: {e}");
    }
    if let Some(writer) = csv.as_mut() {
        if let Err(e) = writer.report(snapshot).await {
            tracing::error!("CSV write failed, continuing on console only: {e}");
            *csv = None;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkerLoad {
    cpu_work_loops: usize,
    allocation_size: usize,
    yield_sleep: Duration,
}

async fn worker_loop(shared: Arc<StabilityShared>, load: WorkerLoad) {
    while shared.running.load(Ordering::Acquire) {
        let start = std::time::Instant::now();
        let mut acc = 0.0f64;
        for i in 0..load.cpu_work_loops {
            let x = i as f64;
            acc += x.sin() * x.cos();
        }
        {
            let mut buffer = vec![0u8; load.allocation_size];
            if let Some(first) = buffer.first_mut() {
                *first = 1;
            }
            acc += f64::from(std::hint::black_box(&buffer).first().copied().unwrap_or(0));
        }
        shared.sink.consume(acc as f32);
        shared.latencies.record(start.elapsed());
        shared.requests.fetch_add(1, Ordering::Relaxed);

        tokio::time::sleep(load.yield_sleep).await;
    }
}

/// Streaming console table, header on the first row.
pub struct StabilityTableReporter<W: Write = Stdout> {
    out: W,
    header_written: bool,
}

impl StabilityTableReporter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> StabilityTableReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn header() -> String {
        format!(
            "{:<8} | {:<15} | {:<15} | {:<15} | {:<15}\n{}",
            "Time(s)",
            "Throughput",
            "P99 Lat(ms)",
            "Heap(MB)",
            "GC Time(ms)",
            "-".repeat(80)
        )
    }

    pub fn format_row(s: &StabilitySnapshot) -> String {
        format!(
            "{:<8} | {:<15} | {:<15} | {:<15} | {:<15}",
            s.elapsed_seconds,
            s.requests_in_interval,
            format!("{:.2}", s.p99_latency_ms),
            format!("{:.2}", s.heap_used_mb),
            s.gc_time_ms
        )
    }

    fn write_row(&mut self, row: &StabilitySnapshot) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{}", Self::header())?;
            self.header_written = true;
        }
        writeln!(self.out, "{}", Self::format_row(row))?;
        self.out.flush()
    }
}

impl<W: Write + Send> Reporter<StabilitySnapshot> for StabilityTableReporter<W> {
    async fn report(&mut self, row: &StabilitySnapshot) -> Result<(), HarnessError> {
        self.write_row(row).map_err(|source| HarnessError::Io {
            path: "<stdout>".into(),
            source,
        })
    }
}
