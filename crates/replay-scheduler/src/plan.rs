use std::time::Duration;

use replay_archive::{Batch, Timeline};

/// Mapping from the archive timeline onto one cycle of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclePlan {
    original_start: u64,
    compression_ratio: f64,
    rate: f64,
}

impl CyclePlan {
    /// `cycle_seconds` and `rate` must be positive.
    pub fn new(timeline: &Timeline, cycle_seconds: f64, rate: f64) -> Self {
        let original_seconds = timeline.duration_ns() as f64 / 1e9;
        Self {
            original_start: timeline.original_start(),
            compression_ratio: cycle_seconds / original_seconds,
            rate,
        }
    }

    /// Cycle duration divided by the archive's span; above 1 stretches, below 1 compresses.
    #[must_use]
    pub const fn compression_ratio(&self) -> f64 {
        self.compression_ratio
    }

    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Nanoseconds between the first batch and `batch` in the archive.
    #[must_use]
    pub fn batch_offset_ns(&self, batch: &Batch) -> u64 {
        batch.sort_timestamp().saturating_sub(self.original_start)
    }

    /// Position of `batch` within the cycle, before the rate multiplier.
    #[must_use]
    pub fn target_offset(&self, batch: &Batch) -> Duration {
        let seconds = (self.batch_offset_ns(batch) as f64 / 1e9) * self.compression_ratio;
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// How long to wait for `target` when `elapsed` of the cycle has passed.
    ///
    /// The rate multiplier scales the remaining wait, never the target.
    #[must_use]
    pub fn pacing_delay(&self, target: Duration, elapsed: Duration) -> Duration {
        let remaining = target.saturating_sub(elapsed);
        if remaining.is_zero() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(remaining.as_secs_f64() / self.rate).unwrap_or(Duration::MAX)
    }

    /// Shift that lands `batch`'s timestamps inside the cycle starting at `cycle_start_ns`.
    ///
    /// Measured from the clamped sort timestamp, so clamped outliers move with
    /// their scheduling slot.
    #[must_use]
    pub fn rewrite_offset(&self, batch: &Batch, cycle_start_ns: u64) -> i64 {
        let compressed = (self.batch_offset_ns(batch) as f64 * self.compression_ratio) as i64;
        let desired = i128::from(cycle_start_ns) + i128::from(compressed);
        let offset = desired - i128::from(batch.sort_timestamp());
        offset.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_archive::SignalKind;

    fn timeline(stamps: &[u64]) -> Timeline {
        Timeline::new(
            stamps
                .iter()
                .map(|ts| Batch::new(SignalKind::Traces, *ts, *ts, "{}"))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn one_second_span_stretched_to_ten() {
        let timeline = timeline(&[0, 500_000_000, 1_000_000_000]);
        let plan = CyclePlan::new(&timeline, 10.0, 1.0);
        assert_eq!(plan.compression_ratio(), 10.0);

        let batch = &timeline.batches()[1];
        let target = plan.target_offset(batch);
        assert_eq!(target, Duration::from_secs(5));
        assert_eq!(plan.pacing_delay(target, Duration::ZERO), Duration::from_secs(5));
    }

    #[test]
    fn rate_halves_wait_but_not_target() {
        let timeline = timeline(&[0, 500_000_000, 1_000_000_000]);
        let plan = CyclePlan::new(&timeline, 10.0, 2.0);

        let batch = &timeline.batches()[1];
        let target = plan.target_offset(batch);
        assert_eq!(target, Duration::from_secs(5));
        assert_eq!(
            plan.pacing_delay(target, Duration::ZERO),
            Duration::from_millis(2_500)
        );
    }

    #[test]
    fn late_batches_do_not_wait() {
        let timeline = timeline(&[0, 1_000_000_000]);
        let plan = CyclePlan::new(&timeline, 1.0, 1.0);
        let target = plan.target_offset(&timeline.batches()[1]);
        assert_eq!(plan.pacing_delay(target, Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn rewrite_offset_targets_compressed_slot() {
        let timeline = timeline(&[1_000_000_000, 3_000_000_000]);
        // two seconds of archive squeezed into one: ratio = 0.5
        let plan = CyclePlan::new(&timeline, 1.0, 1.0);
        let cycle_start_ns = 5_000_000_000;

        let first = &timeline.batches()[0];
        assert_eq!(plan.rewrite_offset(first, cycle_start_ns), 4_000_000_000);

        let last = &timeline.batches()[1];
        let offset = plan.rewrite_offset(last, cycle_start_ns);
        assert_eq!(3_000_000_000 + offset, cycle_start_ns as i64 + 1_000_000_000);
    }

    #[test]
    fn single_batch_timeline_starts_every_cycle_immediately() {
        let timeline = timeline(&[1_000_000_000]);
        let plan = CyclePlan::new(&timeline, 1.0, 1.0);
        let batch = &timeline.batches()[0];
        assert_eq!(plan.target_offset(batch), Duration::ZERO);
        assert_eq!(plan.rewrite_offset(batch, 7_000_000_000), 6_000_000_000);
    }
}
