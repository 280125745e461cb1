//! Operator console output.

use std::fmt;
use std::io::Write;
use std::time::{Duration, SystemTime};

use replay_archive::{SignalKind, SignalSet, Timeline};
use replay_transport::DeliveryOutcome;
use tokio::time::Instant;
use tracing::warn;

use crate::{CycleCounters, RunSummary};

/// How chatty the console output is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// One line per batch plus delivery warnings.
    Verbose,
    /// Progress summary every 10 seconds.
    #[default]
    Normal,
    /// Progress summary every 30 seconds.
    Quiet,
}

impl Verbosity {
    /// Cadence of progress lines; `None` when every batch is reported.
    #[must_use]
    pub const fn report_interval(self) -> Option<Duration> {
        match self {
            Self::Verbose => None,
            Self::Normal => Some(Duration::from_secs(10)),
            Self::Quiet => Some(Duration::from_secs(30)),
        }
    }
}

/// Formats counters onto a writer; holds no counters of its own.
#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: W,
    verbosity: Verbosity,
    signals: SignalSet,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, verbosity: Verbosity, signals: SignalSet) -> Self {
        Self {
            out,
            verbosity,
            signals,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn banner(&mut self, timeline: &Timeline, cycle_seconds: f64, rate: f64) {
        let counts = timeline.counts_by_kind();
        let breakdown = counts
            .iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(" + ");
        let span_hours = timeline.duration_ns() as f64 / 1e9 / 3600.0;
        self.line(format_args!(
            "Streaming {} batches ({breakdown}) in {cycle_seconds:.0}s cycles (original span: {span_hours:.1}h, rate: {rate}x)",
            timeline.len()
        ));
        self.line(format_args!("Ctrl+C to stop\n"));
    }

    /// Per-batch hook, called after every delivery attempt.
    pub fn batch(
        &mut self,
        kind: SignalKind,
        index: usize,
        total: usize,
        outcome: &DeliveryOutcome,
        cycle: &mut CycleCounters,
    ) {
        match self.verbosity.report_interval() {
            None => {
                match outcome {
                    DeliveryOutcome::Delivered { .. } => {}
                    DeliveryOutcome::Rejected { status } => {
                        self.line(format_args!("  WARN: {kind} HTTP {status}"));
                    }
                    DeliveryOutcome::Failed { reason } => {
                        self.line(format_args!("  WARN: {kind} {reason}"));
                    }
                }
                self.line(format_args!(
                    "  [{}] {kind} batch {}/{total}",
                    stamp(),
                    index + 1
                ));
            }
            Some(interval) => {
                let now = Instant::now();
                if now.duration_since(cycle.last_report) >= interval {
                    self.progress(cycle, now);
                    cycle.last_report = now;
                }
            }
        }
    }

    fn progress(&mut self, cycle: &CycleCounters, now: Instant) {
        let elapsed = now.duration_since(cycle.started_at).as_secs_f64();
        let rate = if elapsed > 0.0 {
            cycle.sent as f64 / elapsed
        } else {
            0.0
        };
        let parts = self
            .signals
            .iter()
            .map(|kind| format!("{kind}: {}", cycle.count(kind)))
            .collect::<Vec<_>>()
            .join(" ");
        let errors = if cycle.errors > 0 {
            format!(" errors: {}", cycle.errors)
        } else {
            String::new()
        };
        self.line(format_args!(
            "[{}] {} batches | {parts} | {rate:.1}/s{errors}",
            stamp(),
            cycle.sent
        ));
    }

    /// Summary for a cycle that ran to completion.
    pub fn cycle_complete(&mut self, cycle: &CycleCounters, restarting: bool) {
        let elapsed = cycle.started_at.elapsed().as_secs_f64();
        let errors = if cycle.errors > 0 {
            format!(", {} errors", cycle.errors)
        } else {
            String::new()
        };
        let tail = if restarting { " Restarting ---" } else { " ---" };
        self.line(format_args!(
            "\n--- Cycle {} complete ({elapsed:.1}s, {} batches{errors}).{tail}\n",
            cycle.number, cycle.sent
        ));
    }

    pub fn shutdown_requested(&mut self) {
        self.line(format_args!("\nShutting down..."));
    }

    pub fn final_summary(&mut self, summary: &RunSummary) {
        self.line(format_args!(
            "\nStopped after {} cycle(s), {:.0}s total. Sent {} batches ({} errors).",
            summary.cycles,
            summary.elapsed.as_secs_f64(),
            summary.sent,
            summary.errors
        ));
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{args}").and_then(|()| self.out.flush()) {
            warn!(error = %err, "failed to write console report");
        }
    }
}

fn stamp() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
