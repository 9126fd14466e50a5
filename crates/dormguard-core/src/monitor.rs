//! The monitor loop.
//!
//! One task, one thread. The monitor owns the poller, both engines and the
//! delivery channels, and multiplexes everything that can happen to them:
//!
//! ```text
//!   commands ──┐
//!   fetch done ─┤
//!   escalation ─┼──▶ handle_* ──▶ engines ──▶ Vec<Event> ──▶ events channel
//!   poll tick ──┤                    │
//!   check tick ─┘                    └──▶ local alert / push channel
//! ```
//!
//! The `handle_*` methods are synchronous and take `now` explicitly so they
//! can be driven by hand in tests; [`Monitor::run`] is only the scheduler.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::alert::{
    deliver, ensure_permission_once, AlertLevel, DeliveryGate, EscalationConfig,
    EscalationEngine, LocalAlert, LocalAlertChannel, NotificationConfig, NotificationEngine,
    NotifyOutcome, Permission, PushChannel,
};
use crate::clock::MonitorClock;
use crate::error::SourceError;
use crate::events::Event;
use crate::poller::{PollOutcome, Poller};
use crate::snapshot::{Battery, DoorState};
use crate::source::{SnapshotSource, SourceReport};

/// Far enough out that an idle escalation engine never wakes the loop.
const IDLE_DEADLINE: StdDuration = StdDuration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: StdDuration,
    pub check_interval: StdDuration,
    /// A fetch still pending after this long is abandoned and reported as
    /// an unreachable source.
    pub fetch_timeout: StdDuration,
    pub escalation: EscalationConfig,
    pub notification: NotificationConfig,
    pub alerts_enabled: bool,
    pub notifications_enabled: bool,
    pub permission_prompted: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(5),
            check_interval: StdDuration::from_secs(5),
            fetch_timeout: StdDuration::from_secs(30),
            escalation: EscalationConfig::default(),
            notification: NotificationConfig::default(),
            alerts_enabled: true,
            notifications_enabled: false,
            permission_prompted: false,
        }
    }
}

/// User intents delivered to a running monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Silence the current open episode.
    DisableAlert,
    SetAlertsEnabled(bool),
    SetNotificationsEnabled(bool),
    Shutdown,
}

/// What the presentation layer shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub door: DoorState,
    pub battery: Option<Battery>,
    pub observed_at: Option<DateTime<Utc>>,
    pub last_opened: Option<DateTime<Utc>>,
    pub level: AlertLevel,
    pub alerts_enabled: bool,
    pub notifications_enabled: bool,
    pub permission: Permission,
    pub unreachable: bool,
}

type FetchFuture<'s> = Pin<Box<dyn Future<Output = Result<SourceReport, SourceError>> + 's>>;

pub struct Monitor<L, P> {
    poller: Poller,
    escalation: EscalationEngine,
    notifications: NotificationEngine,
    local: L,
    push: P,
    notifications_enabled: bool,
    permission_prompted: bool,
    clock: MonitorClock,
    poll_interval: StdDuration,
    check_interval: StdDuration,
    fetch_timeout: StdDuration,
}

impl<L: LocalAlertChannel, P: PushChannel> Monitor<L, P> {
    pub fn new(settings: MonitorSettings, local: L, push: P) -> Self {
        Self::with_clock(settings, local, push, MonitorClock::start())
    }

    pub fn with_clock(settings: MonitorSettings, local: L, push: P, clock: MonitorClock) -> Self {
        Self {
            poller: Poller::new(),
            escalation: EscalationEngine::new(settings.escalation, settings.alerts_enabled),
            notifications: NotificationEngine::new(settings.notification),
            local,
            push,
            notifications_enabled: settings.notifications_enabled,
            permission_prompted: settings.permission_prompted,
            clock,
            poll_interval: settings.poll_interval,
            check_interval: settings.check_interval,
            fetch_timeout: settings.fetch_timeout,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn clock(&self) -> &MonitorClock {
        &self.clock
    }

    pub fn escalation(&self) -> &EscalationEngine {
        &self.escalation
    }

    pub fn notifications(&self) -> &NotificationEngine {
        &self.notifications
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn push(&self) -> &P {
        &self.push
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn permission_prompted(&self) -> bool {
        self.permission_prompted
    }

    pub fn status(&self) -> MonitorStatus {
        let latest = self.poller.latest();
        MonitorStatus {
            door: latest.map_or(DoorState::Unknown, |r| r.latest.door),
            battery: latest.and_then(|r| r.latest.battery),
            observed_at: latest.map(|r| r.latest.observed_at),
            last_opened: latest
                .and_then(|r| r.history.last_opened())
                .and_then(|e| e.instant),
            level: self.escalation.level(),
            alerts_enabled: self.escalation.alerts_enabled(),
            notifications_enabled: self.notifications_enabled,
            permission: self.push.permission(),
            unreachable: self.poller.is_unreachable(),
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Ask for push permission if it has never been asked. Returns the
    /// resulting permission and whether a prompt was issued.
    pub fn prompt_permission_once(&mut self) -> (Permission, bool) {
        let (permission, prompted) = ensure_permission_once(&mut self.push, self.permission_prompted);
        if prompted {
            self.permission_prompted = true;
            info!(?permission, "notification permission requested");
        }
        (permission, prompted)
    }

    /// One completed fetch. A fresh report reaches the escalation engine
    /// first and the notification engine second, with the same snapshot.
    pub fn handle_fetch(
        &mut self,
        result: Result<SourceReport, SourceError>,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let recovered = match self.poller.ingest(result, now) {
            PollOutcome::Unreachable { reason, first } => {
                return if first {
                    vec![Event::SourceUnreachable { reason, at: now }]
                } else {
                    Vec::new()
                };
            }
            PollOutcome::Stale {
                observed_at,
                last_accepted,
                recovered,
            } => {
                let mut events = Vec::new();
                if recovered {
                    events.push(Event::SourceRecovered { at: now });
                }
                events.push(Event::SnapshotDropped {
                    observed_at,
                    last_accepted,
                    at: now,
                });
                return events;
            }
            PollOutcome::Fresh { recovered } => recovered,
        };

        let Some(report) = self.poller.latest() else {
            return Vec::new();
        };
        let snapshot = report.latest;

        let mut events = Vec::new();
        if recovered {
            events.push(Event::SourceRecovered { at: now });
        }
        events.push(Event::SnapshotAccepted {
            door: snapshot.door,
            battery: snapshot.battery,
            observed_at: snapshot.observed_at,
            at: now,
        });
        events.extend(self.escalation.on_snapshot(&snapshot, now));
        self.notifications.observe(&snapshot, &report.history);

        self.apply_local(&events);
        events.push(self.state_event(now));
        events
    }

    /// The escalation engine's deadline passed.
    pub fn handle_deadline(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let events = self.escalation.advance(now);
        self.apply_local(&events);
        events
    }

    /// Periodic notification threshold check.
    pub fn handle_check(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let gate = DeliveryGate {
            notifications_enabled: self.notifications_enabled,
            permission: self.push.permission(),
        };
        match self.notifications.evaluate(now, gate) {
            NotifyOutcome::Deliver(notification) => {
                deliver(&self.push, &notification);
                vec![Event::NotificationSent {
                    tag: notification.tag,
                    open_since: notification.open_since,
                    at: now,
                }]
            }
            NotifyOutcome::Suppressed(reason) => vec![Event::NotificationSuppressed {
                reason: reason.to_string(),
                at: now,
            }],
            NotifyOutcome::Waiting | NotifyOutcome::Disabled => Vec::new(),
        }
    }

    pub fn handle_command(&mut self, command: MonitorCommand, now: DateTime<Utc>) -> Vec<Event> {
        let events = match command {
            MonitorCommand::DisableAlert => self.escalation.disable_for_episode(now),
            MonitorCommand::SetAlertsEnabled(enabled) => {
                self.escalation.set_alerts_enabled(enabled, now)
            }
            MonitorCommand::SetNotificationsEnabled(enabled) => {
                if enabled == self.notifications_enabled {
                    return Vec::new();
                }
                self.notifications_enabled = enabled;
                info!(enabled, "notifications setting toggled");
                let mut events = vec![Event::NotificationsToggled { enabled, at: now }];
                if enabled {
                    let (permission, prompted) = self.prompt_permission_once();
                    if prompted {
                        events.push(Event::PermissionRequested { permission, at: now });
                    }
                }
                events
            }
            MonitorCommand::Shutdown => Vec::new(),
        };
        self.apply_local(&events);
        events
    }

    // ── Loop ─────────────────────────────────────────────────────────

    /// Drive the monitor until `Shutdown` arrives.
    ///
    /// Branch order matters: a completed fetch is handled before an overdue
    /// escalation deadline, so a CLOSED snapshot that is already in hand
    /// cancels the timer instead of racing it.
    pub async fn run<'s, S: SnapshotSource>(
        &mut self,
        source: &'s S,
        mut commands: UnboundedReceiver<MonitorCommand>,
        events: UnboundedSender<Event>,
    ) {
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut check = interval(self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut fetch: Option<FetchFuture<'s>> = None;
        let mut commands_open = true;
        info!(
            poll_secs = self.poll_interval.as_secs_f64(),
            check_secs = self.check_interval.as_secs_f64(),
            "monitor started"
        );

        loop {
            let deadline = self
                .escalation
                .next_deadline()
                .map_or_else(|| Instant::now() + IDLE_DEADLINE, |d| self.clock.instant_at(d));

            let batch = tokio::select! {
                biased;

                command = commands.recv(), if commands_open => match command {
                    Some(MonitorCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command, self.clock.now()),
                    None => {
                        debug!("command channel closed");
                        commands_open = false;
                        Vec::new()
                    }
                },

                result = next_fetch(&mut fetch), if fetch.is_some() => {
                    fetch = None;
                    self.handle_fetch(result, self.clock.now())
                }

                _ = sleep_until(deadline) => self.handle_deadline(self.clock.now()),

                _ = poll.tick() => {
                    if self.poller.begin_fetch() {
                        fetch = Some(Box::pin(bounded_fetch(source, self.fetch_timeout)));
                    }
                    Vec::new()
                }

                _ = check.tick() => self.handle_check(self.clock.now()),
            };

            for event in batch {
                if events.send(event).is_err() {
                    debug!("event receiver dropped");
                }
            }
        }

        self.local.clear();
        info!(skipped_polls = self.poller.skipped_ticks(), "monitor stopped");
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn state_event(&self, now: DateTime<Utc>) -> Event {
        let status = self.status();
        Event::StateSnapshot {
            door: status.door,
            battery: status.battery,
            level: status.level,
            last_opened: status.last_opened,
            unreachable: status.unreachable,
            at: now,
        }
    }

    fn apply_local(&self, events: &[Event]) {
        for event in events {
            match event {
                Event::AlertFired {
                    sequence,
                    open_since,
                    at,
                } => self.local.pulse(&LocalAlert {
                    sequence: *sequence,
                    open_since: *open_since,
                    at: *at,
                }),
                Event::AlertCleared { .. } | Event::AlertDisabled { .. } => self.local.clear(),
                _ => {}
            }
        }
    }
}

async fn bounded_fetch<S: SnapshotSource>(
    source: &S,
    limit: StdDuration,
) -> Result<SourceReport, SourceError> {
    match timeout(limit, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Unreachable(format!(
            "fetch timed out after {}s",
            limit.as_secs_f64()
        ))),
    }
}

async fn next_fetch(fetch: &mut Option<FetchFuture<'_>>) -> Result<SourceReport, SourceError> {
    match fetch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ConsolePushChannel;
    use crate::history::HistoryLog;
    use crate::snapshot::Snapshot;
    use chrono::{Duration, TimeZone};
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Recorder {
        pulses: RefCell<Vec<u32>>,
        clears: Cell<u32>,
    }

    impl LocalAlertChannel for Recorder {
        fn pulse(&self, alert: &LocalAlert) {
            self.pulses.borrow_mut().push(alert.sequence);
        }

        fn clear(&self) {
            self.clears.set(self.clears.get() + 1);
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn report(door: DoorState, secs: i64) -> Result<SourceReport, SourceError> {
        Ok(SourceReport {
            latest: Snapshot::new(door, at(secs)),
            history: HistoryLog::new(),
            fetched_at: at(secs),
        })
    }

    fn monitor(permission: Permission) -> Monitor<Recorder, ConsolePushChannel> {
        let settings = MonitorSettings {
            notifications_enabled: true,
            ..MonitorSettings::default()
        };
        Monitor::new(settings, Recorder::default(), ConsolePushChannel::new(permission))
    }

    #[tokio::test]
    async fn fetch_then_deadline_pulses_local_channel() {
        let mut m = monitor(Permission::Granted);
        let events = m.handle_fetch(report(DoorState::Open, 0), at(0));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::AlertArmed { .. })));
        assert!(matches!(events.last(), Some(Event::StateSnapshot { .. })));

        assert!(m.handle_deadline(at(9)).is_empty());
        m.handle_deadline(at(10));
        m.handle_deadline(at(15));
        assert_eq!(*m.local().pulses.borrow(), vec![1, 2]);

        m.handle_fetch(report(DoorState::Closed, 16), at(16));
        assert_eq!(m.local().clears.get(), 1);
        assert!(m.handle_deadline(at(20)).is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_engine_state() {
        let mut m = monitor(Permission::Granted);
        m.handle_fetch(report(DoorState::Open, 0), at(0));

        let events = m.handle_fetch(Err(SourceError::Unreachable("down".into())), at(5));
        assert!(matches!(events[..], [Event::SourceUnreachable { .. }]));
        assert!(m.handle_fetch(Err(SourceError::NoData), at(6)).is_empty());
        assert_eq!(m.escalation().level(), AlertLevel::Pending);
        assert!(m.status().unreachable);

        let events = m.handle_fetch(report(DoorState::Open, 7), at(7));
        assert!(matches!(events[0], Event::SourceRecovered { .. }));
    }

    #[tokio::test]
    async fn stale_fetch_is_reported_and_ignored() {
        let mut m = monitor(Permission::Granted);
        m.handle_fetch(report(DoorState::Open, 10), at(10));
        let events = m.handle_fetch(report(DoorState::Closed, 4), at(11));
        assert!(matches!(events[..], [Event::SnapshotDropped { .. }]));
        assert_eq!(m.escalation().level(), AlertLevel::Pending);
    }

    #[tokio::test]
    async fn notifications_toggle_is_edge_only() {
        let mut m = monitor(Permission::Granted);
        assert!(m
            .handle_command(MonitorCommand::SetNotificationsEnabled(true), at(0))
            .is_empty());
        assert_eq!(
            m.handle_command(MonitorCommand::SetNotificationsEnabled(false), at(1)),
            vec![Event::NotificationsToggled {
                enabled: false,
                at: at(1)
            }]
        );
    }

    #[tokio::test]
    async fn permission_is_prompted_once() {
        let mut m = monitor(Permission::Default);
        assert_eq!(m.prompt_permission_once(), (Permission::Granted, true));
        assert!(m.permission_prompted());
        assert_eq!(m.prompt_permission_once(), (Permission::Granted, false));
    }

    #[tokio::test]
    async fn suppressed_notification_is_surfaced() {
        let mut m = monitor(Permission::Denied);
        m.handle_fetch(report(DoorState::Open, 0), at(0));
        let events = m.handle_check(at(180));
        assert!(matches!(events[..], [Event::NotificationSuppressed { .. }]));
        assert!(m.handle_check(at(185)).is_empty());
    }

    #[tokio::test]
    async fn stale_answer_after_outage_reports_recovery() {
        let mut m = monitor(Permission::Granted);
        m.handle_fetch(report(DoorState::Open, 10), at(10));
        m.handle_fetch(Err(SourceError::NoData), at(15));

        let events = m.handle_fetch(report(DoorState::Open, 8), at(20));
        assert!(matches!(
            events[..],
            [Event::SourceRecovered { .. }, Event::SnapshotDropped { .. }]
        ));
        assert!(!m.status().unreachable);
    }

    #[tokio::test]
    async fn enabling_notifications_prompts_for_permission_once() {
        let settings = MonitorSettings::default();
        let mut m = Monitor::new(
            settings,
            Recorder::default(),
            ConsolePushChannel::new(Permission::Default),
        );

        let events = m.handle_command(MonitorCommand::SetNotificationsEnabled(true), at(0));
        assert_eq!(
            events,
            vec![
                Event::NotificationsToggled {
                    enabled: true,
                    at: at(0)
                },
                Event::PermissionRequested {
                    permission: Permission::Granted,
                    at: at(0)
                },
            ]
        );
        assert_eq!(m.status().permission, Permission::Granted);

        m.handle_command(MonitorCommand::SetNotificationsEnabled(false), at(1));
        let events = m.handle_command(MonitorCommand::SetNotificationsEnabled(true), at(2));
        assert_eq!(events.len(), 1);
    }
}
