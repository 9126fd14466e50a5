//! HTTP JSON source (sheet-values style endpoint).

use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{build_report, decode_payload, SnapshotSource, SourceReport};
use crate::error::SourceError;
use crate::history::RecordParser;

#[derive(Debug, Clone)]
pub struct SheetSource {
    endpoint: Url,
    client: Client,
    parser: RecordParser,
}

impl SheetSource {
    pub fn new(endpoint: &str, parser: RecordParser) -> Result<Self, SourceError> {
        if endpoint.trim().is_empty() {
            return Err(SourceError::NotConfigured);
        }
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| SourceError::Decode(format!("invalid endpoint '{endpoint}': {e}")))?;
        Ok(Self {
            endpoint,
            client: Client::new(),
            parser,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl SnapshotSource for SheetSource {
    async fn fetch(&self) -> Result<SourceReport, SourceError> {
        let resp = self.client.get(self.endpoint.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }
        let body: Value = resp.json().await?;
        let records = decode_payload(body)?;
        build_report(&records, &self.parser, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_is_not_configured() {
        assert!(matches!(
            SheetSource::new("  ", RecordParser::utc()),
            Err(SourceError::NotConfigured)
        ));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert!(matches!(
            SheetSource::new("not a url", RecordParser::utc()),
            Err(SourceError::Decode(_))
        ));
    }
}
