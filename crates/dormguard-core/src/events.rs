use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertLevel, Permission};
use crate::snapshot::{Battery, DoorState};

/// Every state change in the monitor produces an Event.
/// The presentation layer renders them; the CLI prints them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A fresh snapshot passed the ordering gate and reached both engines.
    SnapshotAccepted {
        door: DoorState,
        battery: Option<Battery>,
        observed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A snapshot older than the last accepted one was discarded.
    SnapshotDropped {
        observed_at: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The source stopped answering. Emitted once per outage.
    SourceUnreachable {
        reason: String,
        at: DateTime<Utc>,
    },
    SourceRecovered {
        at: DateTime<Utc>,
    },
    /// Door seen open; first local alert scheduled.
    AlertArmed {
        fires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A local (visual + haptic) alert fired. `sequence` starts at 1 for
    /// the debounce alert and counts every repeat in the same episode.
    AlertFired {
        sequence: u32,
        open_since: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// Timers cancelled and indicators reset.
    AlertCleared {
        at: DateTime<Utc>,
    },
    /// User silenced the current open episode.
    AlertDisabled {
        at: DateTime<Utc>,
    },
    AlertsToggled {
        enabled: bool,
        at: DateTime<Utc>,
    },
    NotificationsToggled {
        enabled: bool,
        at: DateTime<Utc>,
    },
    /// Push permission was asked for (at most once per settings lifetime).
    PermissionRequested {
        permission: Permission,
        at: DateTime<Utc>,
    },
    NotificationSent {
        tag: String,
        open_since: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The episode crossed the threshold but could not be notified.
    NotificationSuppressed {
        reason: String,
        at: DateTime<Utc>,
    },
    /// Full presentation state, emitted after every accepted snapshot.
    StateSnapshot {
        door: DoorState,
        battery: Option<Battery>,
        level: AlertLevel,
        last_opened: Option<DateTime<Utc>>,
        unreachable: bool,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::SnapshotAccepted { at, .. }
            | Event::SnapshotDropped { at, .. }
            | Event::SourceUnreachable { at, .. }
            | Event::SourceRecovered { at }
            | Event::AlertArmed { at, .. }
            | Event::AlertFired { at, .. }
            | Event::AlertCleared { at }
            | Event::AlertDisabled { at }
            | Event::AlertsToggled { at, .. }
            | Event::NotificationsToggled { at, .. }
            | Event::PermissionRequested { at, .. }
            | Event::NotificationSent { at, .. }
            | Event::NotificationSuppressed { at, .. }
            | Event::StateSnapshot { at, .. } => *at,
        }
    }
}
