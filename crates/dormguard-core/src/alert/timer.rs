//! Deadline slots used by the engines in place of ad-hoc timer handles.
//!
//! A [`TimerSlot`] holds at most one live timer. The engines never sleep;
//! they expose the slot's deadline and the driver calls back once it passes.
//! Cancelling is keyed by [`TimerId`] so a stale handle can never cancel a
//! newer timer, and cancelling twice is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(u64);

impl TimerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    /// One-shot delay before the first local alert.
    Debounce,
    /// Recurring local alert while the door stays open.
    Repeat,
    /// Push-notification eligibility for the current open episode.
    Eligibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub due: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerSlot {
    next_id: u64,
    active: Option<Timer>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, replacing whatever was in the slot.
    ///
    /// Callers guard re-entry with their phase; the slot only guarantees
    /// that a second chain can never coexist with the first.
    pub fn arm(&mut self, kind: TimerKind, due: DateTime<Utc>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.active = Some(Timer { id, kind, due });
        id
    }

    /// Move the live timer to a new deadline, keeping its id.
    pub fn reschedule(&mut self, id: TimerId, due: DateTime<Utc>) -> bool {
        match self.active.as_mut() {
            Some(timer) if timer.id == id => {
                timer.due = due;
                true
            }
            _ => false,
        }
    }

    /// Cancel by id. Returns whether anything was cancelled; a stale or
    /// already-fired id is a no-op.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.active {
            Some(timer) if timer.id == id => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Drop whatever is armed.
    pub fn clear(&mut self) -> Option<Timer> {
        self.active.take()
    }

    pub fn active(&self) -> Option<&Timer> {
        self.active.as_ref()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.active.map(|t| t.due)
    }

    /// The armed timer if its deadline has passed. Does not disarm it.
    pub fn due(&self, now: DateTime<Utc>) -> Option<Timer> {
        self.active.filter(|t| t.due <= now)
    }

    pub fn is_armed(&self) -> bool {
        self.active.is_some()
    }
}
