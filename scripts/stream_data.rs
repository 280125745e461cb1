//! Replay a captured telemetry archive against an OTLP/HTTP collector.
//!
//! The archive's timeline is squeezed (or stretched) into a fixed-length
//! cycle and replayed forever with timestamps rewritten to the present, so a
//! demo backend always shows fresh data. Stop with Ctrl+C or SIGTERM.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use replay_archive::{load_archive, SignalSet};
use replay_scheduler::{CycleScheduler, ReplayConfig, Reporter, ShutdownFlag, Verbosity};
use replay_transport::{
    preflight, CollectorConfig, HttpSink, PreflightProblem, SharedSink, DEFAULT_ENDPOINT,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const API_KEY_ENV: &str = "HYPERDX_API_KEY";

#[derive(Debug, Parser)]
#[command(author, version, about = "Stream archived telemetry in repeating cycles")]
struct Args {
    /// Cycle duration in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 600.0, value_parser = positive)]
    cycle: f64,

    /// Playback speed multiplier.
    #[arg(long, value_name = "MULTIPLIER", default_value_t = 1.0, value_parser = positive)]
    rate: f64,

    /// Include traces (no signal switch means all signals).
    #[arg(long, action = ArgAction::SetTrue)]
    traces: bool,

    /// Include logs.
    #[arg(long, action = ArgAction::SetTrue)]
    logs: bool,

    /// Include metrics.
    #[arg(long, action = ArgAction::SetTrue)]
    metrics: bool,

    /// Print every batch.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Print a progress line every 30 seconds only.
    #[arg(short, long)]
    quiet: bool,

    /// Gzip-compressed tar archive with traces.json, logs.json, metrics.json.
    #[arg(long, value_name = "PATH", default_value = "sample.tar.gz")]
    archive: PathBuf,

    /// OTLP/HTTP collector base URL.
    #[arg(long, env = "OTLP_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Ingestion key sent as the authorization header.
    #[arg(
        long,
        env = API_KEY_ENV,
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    api_key: String,

    /// Stop cleanly after this many cycles.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    cycles: Option<u64>,

    /// Diagnostic log filter; RUST_LOG takes precedence.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn verbosity(&self) -> Verbosity {
        if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    fn signals(&self) -> SignalSet {
        SignalSet::from_switches(self.traces, self.logs, self.metrics)
    }
}

fn positive(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("must be greater than zero, got {raw}"))
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("building log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(io::stderr))
        .try_init()
        .context("installing log subscriber")
}

fn run(args: Args) -> Result<()> {
    init_logging(&args.log_level)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(stream(args))
}

async fn stream(args: Args) -> Result<()> {
    let collector = CollectorConfig::new(args.endpoint.as_str(), args.api_key.as_str());
    if let Err(err) = preflight(&args.archive, &collector).await {
        eprintln!("Preflight failed:");
        for problem in &err.problems {
            match problem {
                PreflightProblem::MissingApiKey => eprintln!("  ERROR: {API_KEY_ENV} is not set"),
                other => eprintln!("  ERROR: {other}"),
            }
        }
        return Err(anyhow!(err));
    }

    let signals = args.signals();
    let timeline = load_archive(&args.archive, &signals)
        .with_context(|| format!("loading {}", args.archive.display()))?;

    let sink: SharedSink =
        Arc::new(HttpSink::connect(collector).context("configuring OTLP transport")?);
    let config = ReplayConfig {
        cycle_seconds: args.cycle,
        rate: args.rate,
        max_cycles: args.cycles,
    };
    let reporter = Reporter::new(io::stdout(), args.verbosity(), signals);
    let shutdown = ShutdownFlag::new();
    listen_for_shutdown(shutdown.clone())?;

    let mut scheduler = CycleScheduler::new(timeline, config, sink, reporter, shutdown)
        .context("configuring scheduler")?;
    let summary = scheduler.run().await;
    info!(cycles = summary.cycles, sent = summary.sent, "exiting");
    Ok(())
}

/// Translate SIGINT and SIGTERM into a shutdown request.
///
/// Handlers are installed before returning, so a signal that arrives once
/// streaming has started is never lost to the default disposition.
#[cfg(unix)]
fn listen_for_shutdown(shutdown: ShutdownFlag) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind as UnixSignal};

    let mut interrupt = signal(UnixSignal::interrupt()).context("listening for SIGINT")?;
    let mut terminate = signal(UnixSignal::terminate()).context("listening for SIGTERM")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
        shutdown.request();
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_shutdown(shutdown: ShutdownFlag) -> Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C");
                shutdown.request();
            }
            Err(err) => tracing::warn!(error = %err, "cannot listen for Ctrl+C"),
        }
    });
    Ok(())
}

fn main() {
    dotenv::dotenv().ok();
    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
