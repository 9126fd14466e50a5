//! Snapshot sources.
//!
//! A source is untrusted I/O: it may be unreachable, slow, or hand back
//! malformed rows. Whatever it returns is normalized here into a
//! [`SourceReport`] before anything downstream sees it.

mod device;
mod file;
mod sheet;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::history::{HistoryLog, RawRecord, RecordParser};
use crate::snapshot::Snapshot;

pub use device::silence_device;
pub use file::FileSource;
pub use sheet::SheetSource;

/// One successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    /// Newest row of `history`, promoted to a snapshot.
    pub latest: Snapshot,
    pub history: HistoryLog,
    pub fetched_at: DateTime<Utc>,
}

pub trait SnapshotSource {
    fn fetch(&self) -> impl Future<Output = Result<SourceReport, SourceError>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Sheet { values: Vec<RawRecord> },
    Rows(Vec<RawRecord>),
}

/// Accepts `{"values": [...]}` or a bare array of rows.
pub fn decode_payload(value: Value) -> Result<Vec<RawRecord>, SourceError> {
    match serde_json::from_value::<Payload>(value) {
        Ok(Payload::Sheet { values }) | Ok(Payload::Rows(values)) => Ok(values),
        Err(e) => Err(SourceError::Decode(e.to_string())),
    }
}

/// Normalize decoded rows into a report. A payload with no usable rows is
/// an error so it never reaches the engines.
pub fn build_report(
    records: &[RawRecord],
    parser: &RecordParser,
    fetched_at: DateTime<Utc>,
) -> Result<SourceReport, SourceError> {
    let history = parser.normalize_all(records);
    let latest = history
        .last()
        .map(|entry| entry.to_snapshot(fetched_at))
        .ok_or(SourceError::NoData)?;
    Ok(SourceReport {
        latest,
        history,
        fetched_at,
    })
}
