//! `Time,Date,Door` delimited-text export.
//!
//! Fields are quoted RFC 4180 style when they contain a delimiter, quote or
//! line break. [`parse_export`] reads the same format back.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::record::RawRecord;
use super::{HistoryEntry, HistoryLog, RecordParser, PLACEHOLDER};

pub const EXPORT_HEADER: &str = "Time,Date,Door";

/// Default size of the "latest" export window.
pub const DEFAULT_LATEST_WINDOW: usize = 50;

/// One exported line, already display-formatted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub time: String,
    pub date: String,
    pub door: String,
}

impl From<&HistoryEntry> for ExportRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            time: entry.display_time(),
            date: entry.display_date(),
            door: entry.door.to_string(),
        }
    }
}

impl ExportRow {
    /// Back into a source-shaped row so the reconciler can re-read it.
    pub fn to_record(&self) -> RawRecord {
        let cell = |s: &str| {
            if s == PLACEHOLDER {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(s.to_string())
            }
        };
        RawRecord::Row(vec![cell(&self.time), cell(&self.date), cell(&self.door)])
    }
}

/// Entire log, oldest first.
pub fn export_all(log: &HistoryLog) -> String {
    write_rows(log.entries().iter().map(ExportRow::from))
}

/// Last `n` entries, same format.
pub fn export_latest(log: &HistoryLog, n: usize) -> String {
    write_rows(log.latest(n).iter().map(ExportRow::from))
}

pub fn write_rows<I>(rows: I) -> String
where
    I: IntoIterator<Item = ExportRow>,
{
    let mut buf = Vec::new();
    {
        let mut wtr = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut buf);
        if let Err(e) = write_csv(&mut wtr, rows) {
            warn!(error = %e, "export truncated");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn write_csv<W, I>(wtr: &mut csv::Writer<W>, rows: I) -> Result<(), csv::Error>
where
    W: std::io::Write,
    I: IntoIterator<Item = ExportRow>,
{
    wtr.write_record(EXPORT_HEADER.split(','))?;
    for row in rows {
        wtr.write_record([&row.time, &row.date, &row.door])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Parse exported text back into rows. The header line is skipped, short
/// lines are padded with the placeholder, and an unterminated quote runs to
/// the end of input rather than failing.
pub fn parse_export(text: &str) -> Vec<ExportRow> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(row = idx, error = %e, "skipping unreadable export row");
                continue;
            }
        };
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if fields.iter().all(String::is_empty) || (idx == 0 && is_header(&fields)) {
            continue;
        }
        out.push(to_row(fields));
    }
    out
}

/// Re-read an export through the reconciler.
pub fn parse_export_log(text: &str, parser: &RecordParser) -> HistoryLog {
    let records: Vec<RawRecord> = parse_export(text).iter().map(ExportRow::to_record).collect();
    parser.normalize_all(&records)
}

fn is_header(fields: &[String]) -> bool {
    fields.len() >= 3
        && fields[0].eq_ignore_ascii_case("time")
        && fields[1].eq_ignore_ascii_case("date")
        && fields[2].eq_ignore_ascii_case("door")
}

fn to_row(mut fields: Vec<String>) -> ExportRow {
    fields.resize(3, PLACEHOLDER.to_string());
    let mut it = fields.into_iter();
    let mut next = || it.next().unwrap_or_else(|| PLACEHOLDER.to_string());
    ExportRow {
        time: next(),
        date: next(),
        door: next(),
    }
}
