//! Push-notification dedup.
//!
//! Runs on its own, coarser cadence than the escalation engine. At most one
//! notification is requested per continuous open episode, once the door has
//! been open for the silence threshold. Closing the door ends the episode
//! and re-arms eligibility for the next one.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::timer::{TimerKind, TimerSlot};
use crate::error::NotifyError;
use crate::history::HistoryLog;
use crate::snapshot::Snapshot;

pub const DEFAULT_TAG: &str = "door-alert";
pub const DEFAULT_TITLE: &str = "DormGuard Alert";
pub const DEFAULT_BODY: &str = "Door open > 3 minutes";

/// Platform permission for push notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Never asked.
    Default,
    Granted,
    Denied,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Default => "default",
            Permission::Granted => "granted",
            Permission::Denied => "denied",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub threshold: Duration,
    pub title: String,
    pub body: String,
    pub tag: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::minutes(3),
            title: DEFAULT_TITLE.to_string(),
            body: DEFAULT_BODY.to_string(),
            tag: DEFAULT_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    /// Reusing a tag replaces rather than stacks at the OS level.
    pub tag: String,
    pub open_since: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationState {
    pub episode_open_since: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// The episode became eligible while delivery was not permitted.
    pub suppressed: bool,
}

/// What the caller is currently allowed to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryGate {
    pub notifications_enabled: bool,
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No episode, or not yet eligible, or already handled.
    Waiting,
    /// User setting is off; nothing was evaluated.
    Disabled,
    /// Hand this to the push channel. Already recorded as sent.
    Deliver(PushNotification),
    /// Eligible but not deliverable; the episode will not retry.
    Suppressed(NotifyError),
}

#[derive(Debug, Clone)]
pub struct NotificationEngine {
    config: NotificationConfig,
    state: NotificationState,
    eligibility: TimerSlot,
}

impl NotificationEngine {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            state: NotificationState::default(),
            eligibility: TimerSlot::new(),
        }
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// When the current episode becomes eligible, if it has not been
    /// handled yet.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.eligibility.deadline()
    }

    /// Track the open episode from an accepted snapshot.
    ///
    /// The episode start is the earliest OPEN instant of the trailing open
    /// run in `history`, so a slow poll does not delay the threshold.
    pub fn observe(&mut self, snapshot: &Snapshot, history: &HistoryLog) {
        if !snapshot.is_open() {
            if self.state.episode_open_since.is_some() {
                debug!("open episode ended");
            }
            self.state = NotificationState::default();
            self.eligibility.clear();
            return;
        }
        if self.state.episode_open_since.is_some() {
            return;
        }

        let since = history
            .trailing_open_since()
            .map_or(snapshot.observed_at, |h| h.min(snapshot.observed_at));
        self.state.episode_open_since = Some(since);
        self.eligibility
            .arm(TimerKind::Eligibility, since + self.config.threshold);
        debug!(%since, "open episode started");
    }

    /// Periodic threshold check.
    pub fn evaluate(&mut self, now: DateTime<Utc>, gate: DeliveryGate) -> NotifyOutcome {
        if !gate.notifications_enabled {
            return NotifyOutcome::Disabled;
        }
        let Some(timer) = self.eligibility.due(now) else {
            return NotifyOutcome::Waiting;
        };
        self.eligibility.cancel(timer.id);

        let Some(open_since) = self.state.episode_open_since else {
            return NotifyOutcome::Waiting;
        };
        if self.state.last_notified_at.is_some() || self.state.suppressed {
            return NotifyOutcome::Waiting;
        }

        if gate.permission != Permission::Granted {
            self.state.suppressed = true;
            info!(permission = ?gate.permission, "notification suppressed for episode");
            return NotifyOutcome::Suppressed(NotifyError::PermissionDenied);
        }

        self.state.last_notified_at = Some(now);
        info!(%open_since, "door open past threshold, notifying");
        NotifyOutcome::Deliver(PushNotification {
            title: self.config.title.clone(),
            body: self.config.body.clone(),
            tag: self.config.tag.clone(),
            open_since,
            at: now,
        })
    }
}
