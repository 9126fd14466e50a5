//! Local alert escalation state machine.
//!
//! Like the rest of the engines this one has no internal thread and never
//! reads the wall clock. The caller feeds snapshots and user actions, asks
//! for [`EscalationEngine::next_deadline`], and calls
//! [`EscalationEngine::advance`] once that instant has passed.
//!
//! ## State Transitions
//!
//! ```text
//!            OPEN                debounce elapsed          repeat tick
//!  Idle ───────────► Armed ────────────────────► Escalating ◄──────┐
//!   ▲                  │                            │  └───────────┘
//!   │                  │ disable                    │ disable
//!   │                  ▼                            ▼
//!   │               Quiesced ◄──────────────────────┘
//!   │                  │
//!   └──────────────────┴── CLOSED / UNKNOWN / global toggle (from any state)
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::timer::{Timer, TimerId, TimerKind, TimerSlot};
use crate::events::Event;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPhase {
    /// Door closed or unknown. No timers.
    Idle,
    /// Door open, debounce running, nothing fired yet.
    Armed,
    /// Door open past debounce, recurring alert running.
    Escalating,
    /// User disabled the alert for this episode. Behaves like `Idle` for
    /// alerting but remembers the door is still open.
    Quiesced,
}

/// Presentation-facing reading of the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Calm,
    Pending,
    Alarm,
    Silenced,
}

impl From<AlertPhase> for AlertLevel {
    fn from(phase: AlertPhase) -> Self {
        match phase {
            AlertPhase::Idle => AlertLevel::Calm,
            AlertPhase::Armed => AlertLevel::Pending,
            AlertPhase::Escalating => AlertLevel::Alarm,
            AlertPhase::Quiesced => AlertLevel::Silenced,
        }
    }
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Calm => "calm",
            AlertLevel::Pending => "pending",
            AlertLevel::Alarm => "alarm",
            AlertLevel::Silenced => "silenced",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    /// Delay before the first local alert.
    pub debounce: Duration,
    /// Period of the recurring alert.
    pub repeat: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::seconds(10),
            repeat: Duration::seconds(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub phase: AlertPhase,
    /// When the current episode was armed.
    pub armed_at: Option<DateTime<Utc>>,
    /// Handle of the single live debounce/repeat timer.
    pub escalation_timer: Option<TimerId>,
    pub alert_disabled_by_user: bool,
    /// Local alerts fired in the current episode.
    pub fired: u32,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            phase: AlertPhase::Idle,
            armed_at: None,
            escalation_timer: None,
            alert_disabled_by_user: false,
            fired: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Input {
    Door { open: bool },
    TimerDue(Timer),
    UserDisable,
    GlobalToggle { enabled: bool },
}

#[derive(Debug, Clone)]
pub struct EscalationEngine {
    config: EscalationConfig,
    alerts_enabled: bool,
    state: AlertState,
    timers: TimerSlot,
}

impl EscalationEngine {
    pub fn new(config: EscalationConfig, alerts_enabled: bool) -> Self {
        Self {
            config,
            alerts_enabled,
            state: AlertState::default(),
            timers: TimerSlot::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn phase(&self) -> AlertPhase {
        self.state.phase
    }

    pub fn level(&self) -> AlertLevel {
        self.state.phase.into()
    }

    pub fn alerts_enabled(&self) -> bool {
        self.alerts_enabled
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// When the driver must call [`advance`](Self::advance) next.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.deadline()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Feed one accepted snapshot. Does not service overdue timers: a
    /// CLOSED reading always wins over a timer that has not been serviced.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<Event> {
        self.transition(
            Input::Door {
                open: snapshot.is_open(),
            },
            now,
        )
    }

    /// Service the timer if its deadline has passed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        match self.timers.due(now) {
            Some(timer) => self.transition(Input::TimerDue(timer), now),
            None => Vec::new(),
        }
    }

    /// User silenced the current open episode.
    pub fn disable_for_episode(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.transition(Input::UserDisable, now)
    }

    /// Global alerts setting. Only an actual change counts as a toggle.
    pub fn set_alerts_enabled(&mut self, enabled: bool, now: DateTime<Utc>) -> Vec<Event> {
        if enabled == self.alerts_enabled {
            return Vec::new();
        }
        self.transition(Input::GlobalToggle { enabled }, now)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn transition(&mut self, input: Input, now: DateTime<Utc>) -> Vec<Event> {
        use AlertPhase::*;

        match (self.state.phase, input) {
            (phase, Input::GlobalToggle { enabled }) => {
                self.alerts_enabled = enabled;
                info!(enabled, "alerts setting toggled");
                let mut events = vec![Event::AlertsToggled { enabled, at: now }];
                if phase != Idle || self.state.alert_disabled_by_user {
                    events.push(self.reset(now));
                }
                events
            }

            (Idle, Input::Door { open: false }) => Vec::new(),
            (_, Input::Door { open: false }) => vec![self.reset(now)],

            (Idle, Input::Door { open: true }) => {
                if !self.alerts_enabled {
                    return Vec::new();
                }
                let fires_at = now + self.config.debounce;
                let id = self.timers.arm(TimerKind::Debounce, fires_at);
                self.state.phase = Armed;
                self.state.armed_at = Some(now);
                self.state.escalation_timer = Some(id);
                self.state.fired = 0;
                info!(%fires_at, "door open, alert armed");
                vec![Event::AlertArmed { fires_at, at: now }]
            }
            // Re-entry while a chain is already running never adds timers.
            (Armed | Escalating | Quiesced, Input::Door { open: true }) => Vec::new(),

            (Armed, Input::TimerDue(timer)) if timer.kind == TimerKind::Debounce => {
                let next = next_boundary(timer.due, self.config.repeat, now);
                let id = self.timers.arm(TimerKind::Repeat, next);
                self.state.phase = Escalating;
                self.state.escalation_timer = Some(id);
                vec![self.fire(now)]
            }
            (Escalating, Input::TimerDue(timer)) if timer.kind == TimerKind::Repeat => {
                let next = next_boundary(timer.due, self.config.repeat, now);
                self.timers.reschedule(timer.id, next);
                vec![self.fire(now)]
            }
            (phase, Input::TimerDue(timer)) => {
                debug!(?phase, ?timer, "dropping timer that does not belong to phase");
                self.timers.cancel(timer.id);
                Vec::new()
            }

            (Armed | Escalating, Input::UserDisable) => {
                self.cancel_timer();
                self.state.phase = Quiesced;
                self.state.alert_disabled_by_user = true;
                info!("alert disabled for current episode");
                vec![Event::AlertDisabled { at: now }]
            }
            (Idle | Quiesced, Input::UserDisable) => Vec::new(),
        }
    }

    fn fire(&mut self, now: DateTime<Utc>) -> Event {
        self.state.fired += 1;
        debug!(sequence = self.state.fired, "local alert");
        Event::AlertFired {
            sequence: self.state.fired,
            open_since: self.state.armed_at.unwrap_or(now),
            at: now,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(id) = self.state.escalation_timer.take() {
            self.timers.cancel(id);
        }
    }

    fn reset(&mut self, now: DateTime<Utc>) -> Event {
        self.cancel_timer();
        self.timers.clear();
        self.state = AlertState::default();
        info!("alert cleared");
        Event::AlertCleared { at: now }
    }
}

/// First `due + k * period` (k >= 1) strictly after `now`. Missed ticks
/// collapse into the one being fired.
fn next_boundary(due: DateTime<Utc>, period: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = due + period;
    if next > now {
        return next;
    }
    let period_ms = period.num_milliseconds().max(1);
    let behind_ms = (now - due).num_milliseconds();
    let periods = behind_ms / period_ms + 1;
    due + Duration::milliseconds(period_ms * periods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DoorState;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn snap(door: DoorState, secs: i64) -> Snapshot {
        Snapshot::new(door, at(secs))
    }

    fn fired(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Event::AlertFired { .. }))
            .count()
    }

    #[test]
    fn open_arms_debounce() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        let events = engine.on_snapshot(&snap(DoorState::Open, 0), at(0));

        assert_eq!(engine.phase(), AlertPhase::Armed);
        assert_eq!(engine.next_deadline(), Some(at(10)));
        assert_eq!(
            events,
            vec![Event::AlertArmed {
                fires_at: at(10),
                at: at(0)
            }]
        );
    }

    #[test]
    fn repeated_open_does_not_rearm() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        let id = engine.state().escalation_timer;

        assert!(engine.on_snapshot(&snap(DoorState::Open, 5), at(5)).is_empty());
        assert_eq!(engine.state().escalation_timer, id);
        assert_eq!(engine.next_deadline(), Some(at(10)));
    }

    #[test]
    fn debounce_then_repeat() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));

        assert!(engine.advance(at(9)).is_empty());
        assert_eq!(fired(&engine.advance(at(10))), 1);
        assert_eq!(engine.phase(), AlertPhase::Escalating);
        assert_eq!(engine.next_deadline(), Some(at(15)));

        assert_eq!(fired(&engine.advance(at(15))), 1);
        assert_eq!(engine.next_deadline(), Some(at(20)));
        assert_eq!(engine.state().fired, 2);
    }

    #[test]
    fn late_service_coalesces_missed_ticks() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        engine.advance(at(10));

        // Driver stalled for 17s past the 15s tick.
        assert_eq!(fired(&engine.advance(at(32))), 1);
        assert_eq!(engine.next_deadline(), Some(at(35)));
    }

    #[test]
    fn unknown_is_treated_as_closed() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        let events = engine.on_snapshot(&snap(DoorState::Unknown, 2), at(2));

        assert_eq!(events, vec![Event::AlertCleared { at: at(2) }]);
        assert_eq!(engine.phase(), AlertPhase::Idle);
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn disabled_globally_never_arms() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), false);
        assert!(engine.on_snapshot(&snap(DoorState::Open, 0), at(0)).is_empty());
        assert_eq!(engine.phase(), AlertPhase::Idle);
    }

    #[test]
    fn user_disable_quiesces_until_close() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        engine.advance(at(10));

        let events = engine.disable_for_episode(at(12));
        assert_eq!(events, vec![Event::AlertDisabled { at: at(12) }]);
        assert_eq!(engine.level(), AlertLevel::Silenced);
        assert!(engine.next_deadline().is_none());

        // Still open: stays quiet.
        assert!(engine.on_snapshot(&snap(DoorState::Open, 20), at(20)).is_empty());
        assert!(engine.advance(at(30)).is_empty());

        engine.on_snapshot(&snap(DoorState::Closed, 31), at(31));
        assert!(!engine.state().alert_disabled_by_user);
        engine.on_snapshot(&snap(DoorState::Open, 32), at(32));
        assert_eq!(engine.phase(), AlertPhase::Armed);
    }

    #[test]
    fn disable_when_idle_is_noop() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        assert!(engine.disable_for_episode(at(0)).is_empty());
        assert!(!engine.state().alert_disabled_by_user);
    }

    #[test]
    fn global_toggle_clears_episode_disable() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        engine.disable_for_episode(at(1));

        engine.set_alerts_enabled(false, at(2));
        assert_eq!(engine.phase(), AlertPhase::Idle);
        assert!(!engine.state().alert_disabled_by_user);

        engine.set_alerts_enabled(true, at(3));
        // Re-evaluated on the next snapshot, not at toggle time.
        assert_eq!(engine.phase(), AlertPhase::Idle);
        engine.on_snapshot(&snap(DoorState::Open, 4), at(4));
        assert_eq!(engine.next_deadline(), Some(at(14)));
    }

    #[test]
    fn setting_same_value_is_not_a_toggle() {
        let mut engine = EscalationEngine::new(EscalationConfig::default(), true);
        engine.on_snapshot(&snap(DoorState::Open, 0), at(0));
        assert!(engine.set_alerts_enabled(true, at(1)).is_empty());
        assert_eq!(engine.phase(), AlertPhase::Armed);
    }

    #[test]
    fn next_boundary_skips_whole_periods() {
        let p = Duration::seconds(5);
        assert_eq!(next_boundary(at(10), p, at(10)), at(15));
        assert_eq!(next_boundary(at(10), p, at(15)), at(20));
        assert_eq!(next_boundary(at(10), p, at(23)), at(25));
    }
}
