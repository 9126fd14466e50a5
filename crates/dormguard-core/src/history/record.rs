//! Raw source rows and their normalization.
//!
//! Accepted row shapes:
//!
//! - array rows `[time, date, door, battery?]` (sheet values; a leading
//!   `Time,Date,Door` header row is skipped),
//! - keyed rows `{ "time", "date", "door", "battery", "timestamp" }`.
//!
//! Time cells may be RFC 3339 (sheet-serialised times such as
//! `1899-12-30T14:05:00.000Z`), `HH:MM[:SS]` or `h:mm[:ss] AM/PM`. Date cells
//! may be RFC 3339, `YYYY-MM-DD`, `D Mon YYYY` or `M/D/YYYY`. All wall-clock
//! components are read in one source offset, so a date and a time from the
//! same row always describe one consistent instant.
//!
//! Nothing here fails: an unreadable cell becomes `None` and renders as the
//! placeholder.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{HistoryEntry, HistoryLog};
use crate::snapshot::{Battery, DoorState};

const TIME_FORMATS: &[&str] = &[
    "%H:%M:%S",
    "%H:%M",
    "%I:%M:%S %p",
    "%I:%M %p",
    "%I:%M:%S%p",
    "%I:%M%p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%m/%d/%Y", "%d %B %Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// RFC 3339 values before this year carry a time of day only (sheets
/// serialise bare times on 1899-12-30).
const MIN_COMBINED_YEAR: i32 = 1970;

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawRecord {
    Row(Vec<Value>),
    Keyed(KeyedRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KeyedRecord {
    #[serde(default)]
    pub time: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default, alias = "status", alias = "doorStatus", alias = "door_status")]
    pub door: Option<Value>,
    #[serde(default, alias = "batteryLevel", alias = "battery_level")]
    pub battery: Option<Value>,
    #[serde(default, alias = "observedAt", alias = "observed_at")]
    pub timestamp: Option<Value>,
}

/// Cells of one record after shape dispatch.
#[derive(Debug, Default)]
struct Cells {
    time: Option<String>,
    date: Option<String>,
    door: Option<String>,
    battery: Option<String>,
    timestamp: Option<Value>,
}

impl RawRecord {
    fn cells(&self) -> Cells {
        match self {
            RawRecord::Row(values) => Cells {
                time: values.first().and_then(cell_text),
                date: values.get(1).and_then(cell_text),
                door: values.get(2).and_then(cell_text),
                battery: values.get(3).and_then(cell_text),
                timestamp: None,
            },
            RawRecord::Keyed(keyed) => Cells {
                time: keyed.time.as_ref().and_then(cell_text),
                date: keyed.date.as_ref().and_then(cell_text),
                door: keyed.door.as_ref().and_then(cell_text),
                battery: keyed.battery.as_ref().and_then(cell_text),
                timestamp: keyed.timestamp.clone(),
            },
        }
    }
}

fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Normalizes raw records in one configured source offset.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    offset: FixedOffset,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::utc()
    }
}

impl RecordParser {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Offsets outside ±24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Normalize every record, skipping header and blank rows.
    pub fn normalize_all(&self, records: &[RawRecord]) -> HistoryLog {
        HistoryLog::from_entries(records.iter().filter_map(|r| self.normalize(r)).collect())
    }

    /// `None` for header or blank rows; otherwise always an entry.
    pub fn normalize(&self, record: &RawRecord) -> Option<HistoryEntry> {
        let cells = record.cells();
        if is_header(&cells) {
            return None;
        }
        if cells.time.is_none()
            && cells.date.is_none()
            && cells.door.is_none()
            && cells.timestamp.is_none()
        {
            return None;
        }

        let door = cells
            .door
            .as_deref()
            .map(DoorState::parse)
            .unwrap_or(DoorState::Unknown);
        let battery = cells.battery.as_deref().and_then(Battery::parse);

        let combined = cells
            .timestamp
            .as_ref()
            .and_then(|v| self.parse_timestamp(v));
        let (time, time_instant) = match cells.time.as_deref() {
            Some(raw) => match self.parse_time(raw) {
                Some((time, instant)) => (Some(time), instant),
                None => {
                    debug!(raw, "unparsable time cell");
                    (None, None)
                }
            },
            None => (None, None),
        };
        let date = match cells.date.as_deref() {
            Some(raw) => {
                let parsed = self.parse_date(raw);
                if parsed.is_none() {
                    debug!(raw, "unparsable date cell");
                }
                parsed
            }
            None => None,
        };

        let combined = combined.or(time_instant);
        let entry = match (time, date, combined) {
            (Some(time), Some(date), _) => HistoryEntry {
                time: Some(time),
                date: Some(date),
                door,
                battery,
                instant: self.assemble(date, time),
            },
            (time, date, Some(instant)) => {
                let local = instant.with_timezone(&self.offset);
                HistoryEntry {
                    time: time.or(Some(local.time())),
                    date: date.or(Some(local.date_naive())),
                    door,
                    battery,
                    instant: Some(instant),
                }
            }
            (time, date, None) => HistoryEntry {
                time,
                date,
                door,
                battery,
                instant: None,
            },
        };
        Some(entry)
    }

    /// Time of day, plus a full instant when the cell carried one.
    pub fn parse_time(&self, raw: &str) -> Option<(NaiveTime, Option<DateTime<Utc>>)> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            let local = dt.with_timezone(&self.offset);
            let instant = (dt.year() >= MIN_COMBINED_YEAR).then(|| dt.with_timezone(&Utc));
            return Some((local.time(), instant));
        }
        for fmt in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some((naive.time(), self.assemble(naive.date(), naive.time())));
            }
        }
        TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
            .map(|t| (t, None))
    }

    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&self.offset).date_naive());
        }
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
    }

    fn parse_timestamp(&self, value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::Number(n) => {
                let raw = n.as_i64()?;
                if raw.abs() > EPOCH_MILLIS_CUTOFF {
                    DateTime::from_timestamp_millis(raw)
                } else {
                    DateTime::from_timestamp(raw, 0)
                }
            }
            Value::String(s) => {
                let (_, instant) = self.parse_time(s)?;
                instant
            }
            _ => None,
        }
    }

    fn assemble(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn is_header(cells: &Cells) -> bool {
    let label = |c: &Option<String>| c.as_deref().map(|s| s.to_ascii_lowercase());
    matches!(label(&cells.time).as_deref(), Some("time"))
        || matches!(
            label(&cells.door).as_deref(),
            Some("door") | Some("doorstatus") | Some("door status")
        )
}
