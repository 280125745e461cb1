use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::{ArchiveError, Batch, SignalKind, SignalSet, Timeline};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression wrapping the tar stream, detected from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCompression {
    Gzip,
    Zstd,
}

impl ArchiveCompression {
    pub fn detect(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(&GZIP_MAGIC) {
            Some(Self::Gzip)
        } else if prefix.starts_with(&ZSTD_MAGIC) {
            Some(Self::Zstd)
        } else {
            None
        }
    }
}

/// Load the timeline for `signals` from the archive at `path`.
pub fn load_archive(path: &Path, signals: &SignalSet) -> Result<Timeline, ArchiveError> {
    let file = File::open(path)
        .map_err(|err| ArchiveError::Io(format!("opening {}: {err}", path.display())))?;
    let timeline = load_reader(file, signals)?;
    info!(
        archive = %path.display(),
        batches = timeline.len(),
        "loaded telemetry archive"
    );
    Ok(timeline)
}

/// Load the timeline for `signals` from a compressed tar stream.
pub fn load_reader<R: Read>(reader: R, signals: &SignalSet) -> Result<Timeline, ArchiveError> {
    let mut reader = BufReader::new(reader);
    let prefix = reader
        .fill_buf()
        .map_err(|err| ArchiveError::Io(format!("reading archive header: {err}")))?;
    let compression = ArchiveCompression::detect(prefix);
    let exhausted = prefix.is_empty();
    let raw = match compression {
        Some(ArchiveCompression::Gzip) => read_entries(GzDecoder::new(reader), signals)?,
        Some(ArchiveCompression::Zstd) => {
            let decoder = zstd::Decoder::with_buffer(reader)
                .map_err(|err| ArchiveError::Decode(format!("initialising zstd: {err}")))?;
            read_entries(decoder, signals)?
        }
        None if exhausted => return Err(ArchiveError::Empty(signals.to_string())),
        None => {
            return Err(ArchiveError::Decode(
                "archive is neither gzip nor zstd compressed".into(),
            ))
        }
    };

    let mut sorted: Vec<u64> = raw.iter().map(|candidate| candidate.timestamp).collect();
    sorted.sort_unstable();
    let Some((lo, hi)) = clamp_bounds(&sorted) else {
        return Err(ArchiveError::Empty(signals.to_string()));
    };
    debug!(lo, hi, "clamping scheduling timestamps");

    let batches = raw
        .into_iter()
        .map(|candidate| {
            let sort_timestamp = candidate.timestamp.clamp(lo, hi);
            Batch::new(
                candidate.kind,
                sort_timestamp,
                candidate.timestamp,
                candidate.payload,
            )
        })
        .collect();
    Timeline::new(batches)
}

/// 5th and 95th percentile of an ascending list, by integer-division index.
///
/// `None` for an empty list.
#[must_use]
pub fn clamp_bounds(sorted: &[u64]) -> Option<(u64, u64)> {
    let n = sorted.len();
    Some((*sorted.get(n / 20)?, *sorted.get(19 * n / 20)?))
}

struct Candidate {
    kind: SignalKind,
    timestamp: u64,
    payload: String,
}

fn read_entries<R: Read>(reader: R, signals: &SignalSet) -> Result<Vec<Candidate>, ArchiveError> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| ArchiveError::Decode(format!("reading tar entries: {err}")))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ArchiveError::Decode(format!("tar entry: {err}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|err| ArchiveError::Decode(format!("tar entry path: {err}")))?
            .into_owned();
        let Some(kind) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<SignalKind>().ok())
        else {
            debug!(entry = %path.display(), "skipping unrecognised archive entry");
            continue;
        };
        if !signals.contains(kind) {
            debug!(entry = %path.display(), "skipping unselected signal");
            continue;
        }

        let before = candidates.len();
        let mut dropped = 0usize;
        for line in BufReader::new(entry).lines() {
            let line = line.map_err(|err| {
                ArchiveError::Decode(format!("reading {}: {err}", path.display()))
            })?;
            let payload = line.trim();
            if payload.is_empty() {
                continue;
            }
            match replay_timestamps::min_timestamp(payload) {
                Some(timestamp) => candidates.push(Candidate {
                    kind,
                    timestamp,
                    payload: payload.to_string(),
                }),
                None => dropped += 1,
            }
        }
        debug!(
            signal = %kind,
            batches = candidates.len() - before,
            dropped,
            "read archive entry"
        );
    }
    Ok(candidates)
}
