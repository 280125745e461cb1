//! Sample archive builder.
//!
//! Emits a tar archive shaped like a telemetry capture: `traces.json`,
//! `logs.json` and `metrics.json`, each holding one OTLP/JSON export request
//! per line, plus a `manifest.json` describing how the archive was generated.
//! Output is byte-stable for a given set of arguments.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::{json, Value};
use tar::Builder as TarBuilder;

const FIXED_MTIME: u64 = 1_704_889_600; // 2024-02-10T00:00:00Z for deterministic archives.
const NANOS_PER_SECOND: u64 = 1_000_000_000;
const SPAN_DURATION_NS: u64 = 42_000_000;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Codec {
    Gzip,
    Zstd,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Deterministic telemetry archive builder")]
struct Args {
    /// Archive output path.
    #[arg(long)]
    output: PathBuf,

    /// Compression wrapped around the tar stream.
    #[arg(long, value_enum, default_value_t = Codec::Gzip)]
    compression: Codec,

    /// Export requests written per signal.
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u64).range(1..))]
    batches: u64,

    /// Seconds of simulated capture the batches are spread across.
    #[arg(long, default_value_t = 3_600)]
    span_seconds: u64,

    /// Timestamp of the first batch.
    #[arg(long, default_value_t = FIXED_MTIME * NANOS_PER_SECOND)]
    start_unix_nanos: u64,
}

impl Args {
    /// Evenly spaced batch timestamps starting at `start_unix_nanos`.
    fn timestamps(&self) -> Vec<u64> {
        let step = self.step_ns();
        (0..self.batches)
            .map(|idx| self.start_unix_nanos.saturating_add(step.saturating_mul(idx)))
            .collect()
    }

    fn step_ns(&self) -> u64 {
        self.span_seconds.saturating_mul(NANOS_PER_SECOND) / self.batches
    }
}

#[derive(Serialize)]
struct ArchiveManifest {
    generated_at: String,
    compression: &'static str,
    batches_per_signal: u64,
    span_seconds: u64,
    start_unix_nanos: u64,
    entries: Vec<&'static str>,
}

fn run(args: Args) -> Result<()> {
    ensure_parent(&args.output)?;
    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    match args.compression {
        Codec::Gzip => {
            let encoder = GzEncoder::new(file, flate2::Compression::default());
            let encoder = append_signals(TarBuilder::new(encoder), &args)?;
            encoder.finish().context("finishing gzip stream")?;
        }
        Codec::Zstd => {
            let encoder =
                zstd::stream::write::Encoder::new(file, 0).context("initialising zstd encoder")?;
            let encoder = append_signals(TarBuilder::new(encoder), &args)?;
            encoder.finish().context("finishing zstd stream")?;
        }
    }
    Ok(())
}

fn append_signals<W: Write>(mut builder: TarBuilder<W>, args: &Args) -> Result<W> {
    let timestamps = args.timestamps();
    let step = args.step_ns();

    let traces = render_lines(&timestamps, trace_request);
    add_tar_entry(&mut builder, "traces.json", traces.as_bytes())?;
    let logs = render_lines(&timestamps, log_request);
    add_tar_entry(&mut builder, "logs.json", logs.as_bytes())?;
    let metrics = render_lines(&timestamps, |idx, ts| metric_request(idx, ts, step));
    add_tar_entry(&mut builder, "metrics.json", metrics.as_bytes())?;

    let manifest = ArchiveManifest {
        generated_at: fixed_timestamp_string(),
        compression: match args.compression {
            Codec::Gzip => "gzip",
            Codec::Zstd => "zstd",
        },
        batches_per_signal: args.batches,
        span_seconds: args.span_seconds,
        start_unix_nanos: args.start_unix_nanos,
        entries: vec!["traces.json", "logs.json", "metrics.json"],
    };
    let json = serde_json::to_vec_pretty(&manifest).context("serialising archive manifest")?;
    add_tar_entry(&mut builder, "manifest.json", &json)?;

    builder.into_inner().context("finishing tar archive")
}

fn render_lines(timestamps: &[u64], request: impl Fn(u64, u64) -> Value) -> String {
    timestamps
        .iter()
        .zip(0_u64..)
        .map(|(ts, idx)| format!("{}\n", request(idx, *ts)))
        .collect()
}

fn resource(service: &str) -> Value {
    json!({
        "attributes": [
            { "key": "service.name", "value": { "stringValue": service } }
        ]
    })
}

fn trace_request(idx: u64, ts: u64) -> Value {
    json!({
        "resourceSpans": [{
            "resource": resource("checkout"),
            "scopeSpans": [{
                "scope": { "name": "archive_builder" },
                "spans": [{
                    "traceId": format!("{:032x}", idx + 1),
                    "spanId": format!("{:016x}", idx + 1),
                    "name": "GET /cart",
                    "kind": 2,
                    "startTimeUnixNano": ts.to_string(),
                    "endTimeUnixNano": ts.saturating_add(SPAN_DURATION_NS).to_string(),
                    "status": { "code": 1 }
                }]
            }]
        }]
    })
}

fn log_request(idx: u64, ts: u64) -> Value {
    json!({
        "resourceLogs": [{
            "resource": resource("checkout"),
            "scopeLogs": [{
                "scope": { "name": "archive_builder" },
                "logRecords": [{
                    "timeUnixNano": ts.to_string(),
                    "observedTimeUnixNano": ts.saturating_add(1_000_000).to_string(),
                    "severityNumber": 9,
                    "severityText": "INFO",
                    "body": { "stringValue": format!("cart {} viewed", idx + 1) },
                    "traceId": format!("{:032x}", idx + 1)
                }]
            }]
        }]
    })
}

fn metric_request(idx: u64, ts: u64, step: u64) -> Value {
    json!({
        "resourceMetrics": [{
            "resource": resource("checkout"),
            "scopeMetrics": [{
                "scope": { "name": "archive_builder" },
                "metrics": [{
                    "name": "http.server.requests",
                    "unit": "1",
                    "sum": {
                        "aggregationTemporality": 1,
                        "isMonotonic": true,
                        "dataPoints": [{
                            "startTimeUnixNano": ts.saturating_sub(step).to_string(),
                            "timeUnixNano": ts.to_string(),
                            "asInt": ((idx % 7) * 15 + 40).to_string()
                        }]
                    }
                }]
            }]
        }]
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

fn fixed_timestamp_string() -> String {
    let ts = SystemTime::UNIX_EPOCH + Duration::from_secs(FIXED_MTIME);
    humantime::format_rfc3339(ts).to_string()
}

fn add_tar_entry<W>(builder: &mut TarBuilder<W>, path: &str, contents: &[u8]) -> Result<()>
where
    W: Write,
{
    let mut header = tar::Header::new_gnu();
    header.set_path(path).context("setting tar path")?;
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(contents.len() as u64);
    header.set_mtime(FIXED_MTIME);
    header.set_cksum();
    builder
        .append(&header, contents)
        .with_context(|| format!("writing tar entry {path}"))
}

fn main() {
    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
