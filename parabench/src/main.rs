use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parabench::{
    HarnessError, Reporter,
    analysis::{DEFAULT_ANALYSIS_SAMPLES, format_summary, summarize_by_mode},
    config::{
        DEFAULT_ITERATIONS, DEFAULT_MODE_LABEL, DEFAULT_POOL_SIZE, HarnessSettings,
        STABILITY_THREAD_COUNT, parse_duration_secs, parse_usize_list,
    },
    context::HarnessContext,
    csv::read_records,
    host::{Host, NativeHost, TrackingAllocator},
    report::group_thousands,
    stability::{StabilityConfig, StabilityRun, StabilityTableReporter},
    sweep::{JsonLinesReporter, Preset, ScenarioRow, Sweep, SweepTableReporter, peak_compute},
};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

#[derive(Parser, Debug)]
#[command(name = "parabench", version, about = "Bounded pool vs. task-per-request benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run both strategies over a concurrency × data-size matrix
    Sweep(SweepArgs),
    /// Run workers continuously and report one row per second
    Stability(StabilityArgs),
    /// Summarize a stability CSV per mode label
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long, value_enum, default_value_t = Preset::Matrix)]
    preset: Preset,
    /// Comma separated concurrency levels, replaces the preset's
    #[arg(long)]
    concurrency: Option<String>,
    /// Comma separated data sizes, replaces the preset's
    #[arg(long)]
    data_sizes: Option<String>,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,
    /// Dataset seed, random when omitted
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    no_warmup: bool,
    /// Also print every row as a JSON line
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StabilityArgs {
    /// Duration in seconds; malformed values fall back to the default
    #[arg(allow_hyphen_values = true)]
    duration: Option<String>,
    /// CSV file to append rows to
    csv: Option<PathBuf>,
    /// Label written into the Mode column
    #[arg(default_value = DEFAULT_MODE_LABEL)]
    label: String,
    #[arg(long, default_value_t = STABILITY_THREAD_COUNT)]
    threads: usize,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    csv: PathBuf,
    /// Rows compared per mode
    #[arg(long, default_value_t = DEFAULT_ANALYSIS_SAMPLES)]
    samples: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Sweep(args) => sweep(args).await,
        Command::Stability(args) => stability(args).await,
        Command::Analyze(args) => analyze(args),
    }
}

fn banner(host: &dyn Host) {
    println!("=== parabench ===");
    println!("Vector width:  {} x f32 lanes", host.vector_width());
    println!("Logical cores: {}", num_cpus::get());
    println!("Allocator:     {}", host.allocator_name());
}

/// Table on stdout, plus JSON lines when asked for.
struct SweepOutput {
    table: SweepTableReporter,
    json: Option<JsonLinesReporter>,
}

impl Reporter<ScenarioRow> for SweepOutput {
    async fn report(&mut self, row: &ScenarioRow) -> Result<(), HarnessError> {
        self.table.report(row).await?;
        if let Some(json) = self.json.as_mut() {
            json.report(row).await?;
        }
        Ok(())
    }
}

async fn sweep(args: SweepArgs) -> Result<()> {
    let mut plan = args.preset.plan();
    if let Some(raw) = args.concurrency.as_deref() {
        plan.concurrency_levels = parse_usize_list(raw)
            .map_err(anyhow::Error::msg)
            .context("invalid --concurrency")?;
    }
    if let Some(raw) = args.data_sizes.as_deref() {
        plan.data_sizes = parse_usize_list(raw)
            .map_err(anyhow::Error::msg)
            .context("invalid --data-sizes")?;
    }
    if args.no_warmup {
        plan.warmup = None;
    }

    let mut settings = HarnessSettings::builder()
        .iterations(args.iterations)
        .pool_size(args.pool_size)
        .build();
    settings.seed = args.seed;

    let ctx = HarnessContext::new(settings);
    banner(ctx.host.as_ref());
    println!(
        "Pool size:     {}\nIterations:    {}\n",
        ctx.settings.pool_size, ctx.settings.iterations
    );
    tracing::debug!(?plan, "Sweep plan");

    let mut output = SweepOutput {
        table: SweepTableReporter::stdout(),
        json: args.json.then(JsonLinesReporter::stdout),
    };
    let rows = Sweep::new(&ctx, plan)
        .run(&mut output)
        .await
        .context("sweep failed")?;

    if let Some(peak) = peak_compute(&rows) {
        println!("\n=== Power analysis ===");
        println!(
            "Peak compute: {} GOps/s (unbounded) at {} requests x {} elements, {:.2}x the bounded throughput",
            group_thousands(peak.unbounded.compute_rate.mean, 2),
            group_thousands(peak.concurrency as f64, 0),
            group_thousands(peak.data_size as f64, 0),
            peak.speedup()
        );
    }
    let failed: usize = rows
        .iter()
        .map(|r| r.bounded.failed_tasks + r.unbounded.failed_tasks)
        .sum();
    if failed > 0 {
        tracing::warn!("{failed} tasks failed during the sweep");
    }
    Ok(())
}

async fn stability(args: StabilityArgs) -> Result<()> {
    let secs = parse_duration_secs(args.duration.as_deref());
    let host: Arc<dyn Host> = Arc::new(NativeHost::new());
    banner(host.as_ref());

    let mut config = StabilityConfig::builder()
        .duration(Duration::from_secs(secs))
        .thread_count(args.threads)
        .mode_label(args.label)
        .build();
    config.csv_path = args.csv;
    println!(
        "Mode:          {}\nWorkers:       {}\nDuration:      {}s\n",
        config.mode_label, config.thread_count, secs
    );

    let run = StabilityRun::with_host(config, host);
    let report = run
        .run(&mut StabilityTableReporter::stdout())
        .await
        .context("stability run failed")?;
    println!(
        "\nTotal requests: {}",
        group_thousands(report.total_requests as f64, 0)
    );
    Ok(())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let records = read_records(&args.csv)
        .with_context(|| format!("failed to read {}", args.csv.display()))?;
    if records.is_empty() {
        tracing::warn!("{} has no data rows", args.csv.display());
        return Ok(());
    }
    let summaries = summarize_by_mode(&records, args.samples);
    print!("{}", format_summary(&summaries));
    Ok(())
}
