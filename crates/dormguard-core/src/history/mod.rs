//! Canonical door history.
//!
//! Source rows arrive in several shapes (array rows, keyed objects, split
//! date/time cells, combined timestamps). [`record`] normalizes them into
//! [`HistoryEntry`] values and [`HistoryLog`] keeps them in ascending order.
//! [`export`] turns a log (or a window of it) into `Time,Date,Door` text.

pub mod export;
pub mod record;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{Battery, DoorState, Snapshot};

pub use export::{export_all, export_latest, parse_export, ExportRow, EXPORT_HEADER};
pub use record::{RawRecord, RecordParser};

/// Shown wherever a field is missing or unparsable.
pub const PLACEHOLDER: &str = "-";

/// One normalized history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub door: DoorState,
    pub battery: Option<Battery>,
    /// Present only when both halves (or a combined timestamp) parsed.
    pub instant: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// `h:mm AM/PM`, or the placeholder.
    pub fn display_time(&self) -> String {
        self.time
            .map(|t| t.format("%-I:%M %p").to_string())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    /// `D Mon YYYY`, or the placeholder.
    pub fn display_date(&self) -> String {
        self.date
            .map(|d| d.format("%-d %b %Y").to_string())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    /// Promote to a snapshot, falling back to `fallback` when the row has
    /// no usable instant.
    pub fn to_snapshot(&self, fallback: DateTime<Utc>) -> Snapshot {
        Snapshot {
            door: self.door,
            observed_at: self.instant.unwrap_or(fallback),
            battery: self.battery,
        }
    }
}

/// Ascending (oldest first) sequence of entries. Windowing is a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows in arrival order.
    ///
    /// Rows are stably sorted by instant. A row with no instant sorts as if
    /// it carried the instant of the nearest known row before it, so it
    /// stays next to its neighbours instead of sinking to one end.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        let mut carried: Option<DateTime<Utc>> = None;
        let mut keyed: Vec<(Option<DateTime<Utc>>, HistoryEntry)> = entries
            .into_iter()
            .map(|entry| {
                if entry.instant.is_some() {
                    carried = entry.instant;
                }
                (carried, entry)
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        Self {
            entries: keyed.into_iter().map(|(_, e)| e).collect(),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first.
    pub fn latest(&self, n: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    /// Most recent OPEN row ("last opened at").
    pub fn last_opened(&self) -> Option<&HistoryEntry> {
        self.newest_first().find(|e| e.door.is_open())
    }

    /// Earliest known instant of the trailing run of OPEN rows, i.e. when
    /// the current open episode began according to the log.
    pub fn trailing_open_since(&self) -> Option<DateTime<Utc>> {
        self.newest_first()
            .take_while(|e| e.door.is_open())
            .filter_map(|e| e.instant)
            .min()
    }
}
