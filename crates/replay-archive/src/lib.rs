//! Captured telemetry archive loading.
//!
//! An archive is a compressed tar holding one newline-delimited OTLP/JSON
//! file per signal kind (`traces.json`, `logs.json`, `metrics.json`). Each
//! non-blank line is one export request, which becomes a [`Batch`]. The
//! batches are ordered into a [`Timeline`] by their scheduling timestamp.

mod loader;
mod signal;
mod timeline;

use thiserror::Error;

pub use loader::{clamp_bounds, load_archive, load_reader, ArchiveCompression};
pub use signal::{SignalKind, SignalSet};
pub use timeline::{Batch, Timeline};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("archive decode error: {0}")]
    Decode(String),
    #[error("archive contains no schedulable batches for {0}")]
    Empty(String),
}
