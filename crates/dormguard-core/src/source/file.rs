//! Payload saved to disk. Used for offline exports and replay.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use super::{build_report, decode_payload, SnapshotSource, SourceReport};
use crate::error::SourceError;
use crate::history::RecordParser;

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    parser: RecordParser,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, parser: RecordParser) -> Self {
        Self {
            path: path.into(),
            parser,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for FileSource {
    async fn fetch(&self) -> Result<SourceReport, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|e| SourceError::Decode(e.to_string()))?;
        let records = decode_payload(value)?;
        build_report(&records, &self.parser, Utc::now())
    }
}
