use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use replay_archive::SignalKind;
use replay_transport::DeliveryOutcome;
use tokio::time::Instant;

/// Cooperative stop request shared between signal handlers and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Process-wide counters, owned by the control loop.
#[derive(Debug, Clone)]
pub struct RunState {
    cycle_number: u64,
    total_sent: u64,
    total_errors: u64,
    started_at: Instant,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            cycle_number: 0,
            total_sent: 0,
            total_errors: 0,
            started_at: Instant::now(),
        }
    }

    /// Advance to the next cycle and return its number (starting at 1).
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle_number += 1;
        self.cycle_number
    }

    /// Fold a finished (or abandoned) cycle into the totals.
    pub fn absorb(&mut self, cycle: &CycleCounters) {
        self.total_sent += cycle.sent;
        self.total_errors += cycle.errors;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            cycles: self.cycle_number,
            sent: self.total_sent,
            errors: self.total_errors,
            elapsed: self.elapsed(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-cycle counters, reset at every cycle start.
#[derive(Debug, Clone)]
pub struct CycleCounters {
    pub number: u64,
    /// Wall-clock start of the cycle in nanoseconds since the Unix epoch.
    pub start_ns: u64,
    pub started_at: Instant,
    pub last_report: Instant,
    pub sent: u64,
    pub errors: u64,
    pub per_kind: BTreeMap<SignalKind, u64>,
}

impl CycleCounters {
    pub fn new(number: u64, start_ns: u64) -> Self {
        let now = Instant::now();
        Self {
            number,
            start_ns,
            started_at: now,
            last_report: now,
            sent: 0,
            errors: 0,
            per_kind: BTreeMap::new(),
        }
    }

    /// Count one attempted delivery. Rejected and failed sends are both errors.
    pub fn record(&mut self, kind: SignalKind, outcome: &DeliveryOutcome) {
        self.sent += 1;
        *self.per_kind.entry(kind).or_insert(0) += 1;
        if !outcome.is_delivered() {
            self.errors += 1;
        }
    }

    pub fn count(&self, kind: SignalKind) -> u64 {
        self.per_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Totals reported when the scheduler stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub sent: u64,
    pub errors: u64,
    pub elapsed: Duration,
}
