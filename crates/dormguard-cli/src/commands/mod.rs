pub mod config;
pub mod export;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use dormguard_core::alert::{ConsolePushChannel, PushChannel, WebhookPushChannel};
use dormguard_core::{Config, FileSource, SheetSource, SnapshotSource, SourceError, SourceReport};

/// Single-threaded runtime shared by every async command.
pub fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Where snapshots are read from: a saved payload, or the configured endpoint.
pub enum Input {
    File(FileSource),
    Sheet(SheetSource),
}

impl Input {
    pub fn resolve(config: &Config, file: Option<PathBuf>) -> Result<Self, SourceError> {
        match file {
            Some(path) => Ok(Input::File(FileSource::new(path, config.record_parser()))),
            None => SheetSource::new(&config.source.endpoint, config.record_parser()).map(Input::Sheet),
        }
    }
}

impl SnapshotSource for Input {
    async fn fetch(&self) -> Result<SourceReport, SourceError> {
        match self {
            Input::File(source) => source.fetch().await,
            Input::Sheet(source) => source.fetch().await,
        }
    }
}

/// Webhook when one is configured, terminal otherwise.
pub fn push_channel(config: &Config) -> Box<dyn PushChannel> {
    let permission = config.notifications.permission;
    match config.notifications.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            Box::new(WebhookPushChannel::new(url.trim(), permission))
        }
        _ => Box::new(ConsolePushChannel::new(permission)),
    }
}
