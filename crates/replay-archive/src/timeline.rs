use std::collections::BTreeMap;

use crate::{ArchiveError, SignalKind};

/// One archived export request plus its derived scheduling timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    signal_kind: SignalKind,
    sort_timestamp: u64,
    original_timestamp: u64,
    payload: String,
}

impl Batch {
    pub fn new(
        signal_kind: SignalKind,
        sort_timestamp: u64,
        original_timestamp: u64,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            signal_kind,
            sort_timestamp,
            original_timestamp,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub const fn signal_kind(&self) -> SignalKind {
        self.signal_kind
    }

    /// Percentile-clamped timestamp used for ordering and pacing.
    #[must_use]
    pub const fn sort_timestamp(&self) -> u64 {
        self.sort_timestamp
    }

    /// Unclamped minimum timestamp found in the payload.
    #[must_use]
    pub const fn original_timestamp(&self) -> u64 {
        self.original_timestamp
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Non-empty sequence of batches in ascending `sort_timestamp` order.
#[derive(Debug, Clone)]
pub struct Timeline {
    batches: Vec<Batch>,
}

// Never empty, so `len` has no `is_empty` companion.
#[allow(clippy::len_without_is_empty)]
impl Timeline {
    /// Order `batches` by scheduling timestamp, keeping encounter order for ties.
    pub fn new(mut batches: Vec<Batch>) -> Result<Self, ArchiveError> {
        if batches.is_empty() {
            return Err(ArchiveError::Empty("timeline".into()));
        }
        batches.sort_by_key(Batch::sort_timestamp);
        Ok(Self { batches })
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[must_use]
    pub fn original_start(&self) -> u64 {
        self.batches[0].sort_timestamp
    }

    #[must_use]
    pub fn original_end(&self) -> u64 {
        self.batches[self.batches.len() - 1].sort_timestamp
    }

    /// Span between first and last batch, floored at one nanosecond.
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        (self.original_end() - self.original_start()).max(1)
    }

    pub fn counts_by_kind(&self) -> BTreeMap<SignalKind, usize> {
        let mut counts = BTreeMap::new();
        for batch in &self.batches {
            *counts.entry(batch.signal_kind).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_timeline_is_rejected() {
        assert!(matches!(Timeline::new(Vec::new()), Err(ArchiveError::Empty(_))));
    }

    #[test]
    fn single_batch_has_unit_duration() {
        let timeline =
            Timeline::new(vec![Batch::new(SignalKind::Logs, 7, 7, "{}")]).expect("one batch");
        assert_eq!(timeline.original_start(), 7);
        assert_eq!(timeline.original_end(), 7);
        assert_eq!(timeline.duration_ns(), 1);
    }

    #[test]
    fn ties_keep_encounter_order() {
        let timeline = Timeline::new(vec![
            Batch::new(SignalKind::Metrics, 20, 20, "m"),
            Batch::new(SignalKind::Traces, 10, 3, "t"),
            Batch::new(SignalKind::Logs, 10, 10, "l"),
        ])
        .expect("non-empty");
        let payloads: Vec<&str> = timeline.batches().iter().map(Batch::payload).collect();
        assert_eq!(payloads, vec!["t", "l", "m"]);
        assert_eq!(timeline.counts_by_kind()[&SignalKind::Traces], 1);
    }
}
