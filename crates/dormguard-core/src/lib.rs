//! # DormGuard Core Library
//!
//! This library provides the core logic for DormGuard, a door-sensor monitor
//! that escalates local alerts while a door is left open and sends at most
//! one push notification per open episode. The `dormguard` CLI is a thin
//! presentation layer over the same library.
//!
//! ## Architecture
//!
//! - **Engines**: wall-clock-free state machines. Every operation takes `now`
//!   explicitly and returns the events it produced; nothing sleeps
//! - **Monitor**: single-threaded tokio driver that polls the source and
//!   services engine deadlines
//! - **History**: normalizes heterogeneous sheet rows and writes CSV exports
//! - **Storage**: TOML-based configuration
//!
//! ## Key Components
//!
//! - [`EscalationEngine`]: debounce then repeating local alerts
//! - [`NotificationEngine`]: one push per open episode
//! - [`Monitor`]: poll loop wiring the source to both engines
//! - [`HistoryLog`]: canonical ascending door history
//! - [`Config`]: application configuration management

pub mod alert;
pub mod clock;
pub mod error;
pub mod events;
pub mod history;
pub mod monitor;
pub mod poller;
pub mod snapshot;
pub mod source;
pub mod storage;

pub use alert::{
    AlertLevel, AlertPhase, EscalationConfig, EscalationEngine, NotificationConfig,
    NotificationEngine, Permission, PushNotification,
};
pub use clock::MonitorClock;
pub use error::{ConfigError, CoreError, NotifyError, SourceError};
pub use events::Event;
pub use history::{HistoryEntry, HistoryLog, RecordParser};
pub use monitor::{Monitor, MonitorCommand, MonitorSettings, MonitorStatus};
pub use poller::{PollOutcome, Poller};
pub use snapshot::{Battery, DoorState, Snapshot};
pub use source::{FileSource, SheetSource, SnapshotSource, SourceReport};
pub use storage::Config;
