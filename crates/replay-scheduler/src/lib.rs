//! Continuous replay of an archived telemetry timeline.
//!
//! Each cycle walks the whole [`Timeline`] in order, waits until every
//! batch's slot in the cycle comes up, rewrites the batch's embedded
//! timestamps into the cycle's wall-clock window, and hands it to a
//! [`BatchSink`](replay_transport::BatchSink). Delivery is best-effort:
//! failures are counted, never retried, and never stop the loop. Only the
//! [`ShutdownFlag`] or a cycle limit ends a run.

mod plan;
mod report;
mod state;

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use replay_archive::Timeline;
use replay_transport::SharedSink;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

pub use plan::CyclePlan;
pub use report::{Reporter, Verbosity};
pub use state::{CycleCounters, RunState, RunSummary, ShutdownFlag};

/// Longest single sleep while pacing, so shutdown is noticed promptly.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Replay tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Wall-clock length of one cycle, in seconds.
    pub cycle_seconds: f64,
    /// Playback speed multiplier applied to waits.
    pub rate: f64,
    /// Stop cleanly after this many completed cycles.
    pub max_cycles: Option<u64>,
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(self.cycle_seconds.is_finite() && self.cycle_seconds > 0.0) {
            return Err(SchedulerError::Configuration(format!(
                "cycle duration must be positive, got {}",
                self.cycle_seconds
            )));
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(SchedulerError::Configuration(format!(
                "rate multiplier must be positive, got {}",
                self.rate
            )));
        }
        if self.max_cycles == Some(0) {
            return Err(SchedulerError::Configuration(
                "cycle limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cycle_seconds: 600.0,
            rate: 1.0,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Lifecycle of a [`CycleScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Initializing,
    Running,
    /// Shutdown observed; the in-flight batch (if any) has been finished.
    Draining,
    Stopped,
}

enum CycleEnd {
    Completed,
    Interrupted,
}

/// Single-task control loop replaying a timeline in repeating cycles.
pub struct CycleScheduler<W: Write> {
    timeline: Timeline,
    plan: CyclePlan,
    config: ReplayConfig,
    sink: SharedSink,
    reporter: Reporter<W>,
    shutdown: ShutdownFlag,
    state: SchedulerState,
    acknowledged: bool,
}

impl<W: Write> CycleScheduler<W> {
    pub fn new(
        timeline: Timeline,
        config: ReplayConfig,
        sink: SharedSink,
        reporter: Reporter<W>,
        shutdown: ShutdownFlag,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let plan = CyclePlan::new(&timeline, config.cycle_seconds, config.rate);
        Ok(Self {
            timeline,
            plan,
            config,
            sink,
            reporter,
            shutdown,
            state: SchedulerState::Initializing,
            acknowledged: false,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn into_reporter(self) -> Reporter<W> {
        self.reporter
    }

    /// Replay cycles until shutdown or the cycle limit, then print the final summary.
    pub async fn run(&mut self) -> RunSummary {
        let mut run = RunState::new();
        self.reporter
            .banner(&self.timeline, self.config.cycle_seconds, self.config.rate);
        self.state = SchedulerState::Running;
        info!(
            batches = self.timeline.len(),
            compression_ratio = self.plan.compression_ratio(),
            rate = self.plan.rate(),
            "replay started"
        );

        while !self.stop_requested() {
            let number = run.begin_cycle();
            let mut cycle = CycleCounters::new(number, unix_nanos());
            let end = self.run_cycle(&mut cycle).await;
            run.absorb(&cycle);

            match end {
                CycleEnd::Interrupted => break,
                CycleEnd::Completed => {
                    let limit_reached = self.config.max_cycles.is_some_and(|max| number >= max);
                    if self.stop_requested() {
                        break;
                    }
                    self.reporter.cycle_complete(&cycle, !limit_reached);
                    if limit_reached {
                        info!(cycles = number, "cycle limit reached");
                        break;
                    }
                }
            }
        }

        self.state = SchedulerState::Stopped;
        let summary = run.summary();
        self.reporter.final_summary(&summary);
        info!(
            cycles = summary.cycles,
            sent = summary.sent,
            errors = summary.errors,
            "replay stopped"
        );
        summary
    }

    async fn run_cycle(&mut self, cycle: &mut CycleCounters) -> CycleEnd {
        debug!(cycle = cycle.number, start_ns = cycle.start_ns, "cycle started");
        let total = self.timeline.len();
        for index in 0..total {
            if self.stop_requested() {
                return CycleEnd::Interrupted;
            }
            let batch = &self.timeline.batches()[index];
            let target = self.plan.target_offset(batch);
            let delay = self.plan.pacing_delay(target, cycle.started_at.elapsed());
            if !self.pace(delay).await {
                return CycleEnd::Interrupted;
            }

            let batch = &self.timeline.batches()[index];
            let kind = batch.signal_kind();
            let offset = self.plan.rewrite_offset(batch, cycle.start_ns);
            let payload = replay_timestamps::rewrite(batch.payload(), offset).into_owned();
            debug!(signal = %kind, index, offset, "sending batch");

            let outcome = self.sink.send(kind, payload).await;
            cycle.record(kind, &outcome);
            self.reporter.batch(kind, index, total, &outcome, cycle);
        }
        CycleEnd::Completed
    }

    /// Sleep for `delay` in slices; false if shutdown was requested meanwhile.
    async fn pace(&mut self, delay: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.stop_requested() {
                return false;
            }
            let waited = started.elapsed();
            if waited >= delay {
                break;
            }
            tokio::time::sleep(SLEEP_SLICE.min(delay - waited)).await;
        }
        !self.stop_requested()
    }

    fn stop_requested(&mut self) -> bool {
        if !self.shutdown.is_requested() {
            return false;
        }
        if !self.acknowledged {
            self.acknowledged = true;
            self.state = SchedulerState::Draining;
            self.reporter.shutdown_requested();
            info!("shutdown requested");
        }
        true
    }
}

fn unix_nanos() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX)
}
