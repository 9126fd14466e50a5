//! Integration tests for the monitor loop under paused tokio time.

use std::cell::{Cell, RefCell};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use dormguard_core::alert::{LocalAlert, LocalAlertChannel, PushChannel};
use dormguard_core::{
    DoorState, Event, HistoryEntry, HistoryLog, Monitor, MonitorClock, MonitorCommand,
    MonitorSettings, NotifyError, Permission, PushNotification, Snapshot, SnapshotSource,
    SourceError, SourceReport,
};
use tokio::sync::mpsc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 22, 0, 0).unwrap()
}

fn offset(at: DateTime<Utc>) -> i64 {
    (at - t0()).num_seconds()
}

/// Door transitions keyed by seconds since t0; reads the shared clock.
struct ScriptedSource {
    clock: MonitorClock,
    transitions: Vec<(i64, DoorState)>,
    /// Seconds during which every fetch fails.
    outage: Option<(i64, i64)>,
    /// Fetches starting in this window never resolve.
    stall: Option<(i64, i64)>,
    /// Extra latency per fetch.
    delay: StdDuration,
    fetches: Cell<u32>,
}

impl ScriptedSource {
    fn new(clock: MonitorClock, transitions: &[(i64, DoorState)]) -> Self {
        Self {
            clock,
            transitions: transitions.to_vec(),
            outage: None,
            stall: None,
            delay: StdDuration::ZERO,
            fetches: Cell::new(0),
        }
    }
}

impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> Result<SourceReport, SourceError> {
        self.fetches.set(self.fetches.get() + 1);
        if let Some((from, to)) = self.stall {
            if (from..to).contains(&offset(self.clock.now())) {
                std::future::pending::<()>().await;
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let now = self.clock.now();
        let secs = offset(now);
        if let Some((from, to)) = self.outage {
            if (from..to).contains(&secs) {
                return Err(SourceError::Unreachable("scripted outage".into()));
            }
        }

        let entries: Vec<HistoryEntry> = self
            .transitions
            .iter()
            .filter(|(s, _)| *s <= secs)
            .map(|(s, door)| {
                let instant = t0() + Duration::seconds(*s);
                HistoryEntry {
                    time: Some(instant.time()),
                    date: Some(instant.date_naive()),
                    door: *door,
                    battery: None,
                    instant: Some(instant),
                }
            })
            .collect();
        let door = entries.last().map_or(DoorState::Closed, |e| e.door);
        Ok(SourceReport {
            latest: Snapshot::new(door, now),
            history: HistoryLog::from_entries(entries),
            fetched_at: now,
        })
    }
}

#[derive(Default)]
struct RecordingLocal {
    pulses: RefCell<Vec<u32>>,
}

impl LocalAlertChannel for RecordingLocal {
    fn pulse(&self, alert: &LocalAlert) {
        self.pulses.borrow_mut().push(alert.sequence);
    }
}

struct RecordingPush {
    permission: Permission,
    shown: RefCell<Vec<PushNotification>>,
}

impl RecordingPush {
    fn granted() -> Self {
        Self {
            permission: Permission::Granted,
            shown: RefCell::new(Vec::new()),
        }
    }
}

impl PushChannel for RecordingPush {
    fn permission(&self) -> Permission {
        self.permission
    }

    fn request_permission(&mut self) -> Permission {
        self.permission
    }

    fn show(&self, notification: &PushNotification) -> Result<(), NotifyError> {
        self.shown.borrow_mut().push(notification.clone());
        Ok(())
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        notifications_enabled: true,
        ..MonitorSettings::default()
    }
}

/// Run the monitor until `stop_after` seconds, sending `commands` at the
/// given offsets. Returns the monitor and every event it emitted.
async fn run_monitor(
    source: &ScriptedSource,
    clock: MonitorClock,
    stop_after: u64,
    commands: Vec<(u64, MonitorCommand)>,
) -> (Monitor<RecordingLocal, RecordingPush>, Vec<Event>) {
    let mut monitor =
        Monitor::with_clock(settings(), RecordingLocal::default(), RecordingPush::granted(), clock);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let driver = async move {
        let mut elapsed = 0;
        for (at, command) in commands {
            tokio::time::sleep(StdDuration::from_secs(at - elapsed)).await;
            elapsed = at;
            cmd_tx.send(command).unwrap();
        }
        tokio::time::sleep(StdDuration::from_secs(stop_after - elapsed)).await;
        cmd_tx.send(MonitorCommand::Shutdown).unwrap();
    };
    tokio::join!(monitor.run(source, cmd_rx, event_tx), driver);

    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }
    (monitor, events)
}

fn fired_at(events: &[Event]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::AlertFired { at, .. } => Some(offset(*at)),
            _ => None,
        })
        .collect()
}

/// Test: a door open for 200s gives alerts from 10s every 5s and exactly one
/// notification, at 180s.
#[tokio::test(start_paused = true)]
async fn test_open_200s_end_to_end() {
    let clock = MonitorClock::anchored(t0());
    let source = ScriptedSource::new(clock, &[(0, DoorState::Open), (198, DoorState::Closed)]);
    let (monitor, events) = run_monitor(&source, clock, 260, Vec::new()).await;

    let fired = fired_at(&events);
    assert_eq!(&fired[..3], &[10, 15, 20]);
    assert!(fired.windows(2).all(|w| w[1] - w[0] == 5));
    assert!(fired.iter().all(|s| *s <= 200));

    let cleared = events
        .iter()
        .find_map(|e| match e {
            Event::AlertCleared { at } => Some(offset(*at)),
            _ => None,
        })
        .unwrap();
    assert_eq!(cleared, 200);
    assert!(fired.iter().all(|s| *s <= cleared));

    let sent: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::NotificationSent { tag, at, .. } => Some((tag.clone(), offset(*at))),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![("door-alert".to_string(), 180)]);
    assert_eq!(monitor.push().shown.borrow().len(), 1);
    assert_eq!(monitor.local().pulses.borrow().len(), fired.len());
}

/// Test: the disable command silences the episode until the door closes.
#[tokio::test(start_paused = true)]
async fn test_disable_command_silences_episode() {
    let clock = MonitorClock::anchored(t0());
    let source = ScriptedSource::new(
        clock,
        &[(0, DoorState::Open), (100, DoorState::Closed), (120, DoorState::Open)],
    );
    let (_, events) =
        run_monitor(&source, clock, 152, vec![(17, MonitorCommand::DisableAlert)]).await;

    let fired = fired_at(&events);
    assert_eq!(fired, vec![10, 15, 130, 135, 140, 145, 150]);
    assert!(events.iter().any(|e| matches!(e, Event::AlertDisabled { .. })));
}

/// Test: a source outage surfaces once, keeps engine state, and recovers.
#[tokio::test(start_paused = true)]
async fn test_outage_is_edge_triggered() {
    let clock = MonitorClock::anchored(t0());
    let mut source = ScriptedSource::new(clock, &[(0, DoorState::Open)]);
    source.outage = Some((20, 40));
    let (_, events) = run_monitor(&source, clock, 60, Vec::new()).await;

    let unreachable = events
        .iter()
        .filter(|e| matches!(e, Event::SourceUnreachable { .. }))
        .count();
    let recovered = events
        .iter()
        .filter(|e| matches!(e, Event::SourceRecovered { .. }))
        .count();
    assert_eq!((unreachable, recovered), (1, 1));

    // Alerts keep their cadence through the outage.
    let fired = fired_at(&events);
    assert!(fired.contains(&25));
    assert!(fired.contains(&35));
}

/// Test: a fetch slower than the poll interval never overlaps itself.
#[tokio::test(start_paused = true)]
async fn test_slow_fetch_skips_poll_ticks() {
    let clock = MonitorClock::anchored(t0());
    let mut source = ScriptedSource::new(clock, &[(0, DoorState::Open)]);
    source.delay = StdDuration::from_secs(12);
    let (monitor, events) = run_monitor(&source, clock, 60, Vec::new()).await;

    assert!(source.fetches.get() <= 6);
    assert!(monitor.poller().skipped_ticks() > 0);
    // Timers still fire while the fetch is outstanding.
    assert_eq!(&fired_at(&events)[..2], &[22, 27]);
}

/// Test: a fetch that never answers is abandoned after the fetch timeout,
/// reported once, and polling picks up again.
#[tokio::test(start_paused = true)]
async fn test_stuck_fetch_times_out_and_polling_resumes() {
    let clock = MonitorClock::anchored(t0());
    let mut source = ScriptedSource::new(clock, &[(0, DoorState::Open), (70, DoorState::Closed)]);
    source.stall = Some((20, 40));
    let (monitor, events) = run_monitor(&source, clock, 122, Vec::new()).await;

    let unreachable: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::SourceUnreachable { at, .. } => Some(offset(*at)),
            _ => None,
        })
        .collect();
    assert_eq!(unreachable, vec![50]);
    let recovered = events
        .iter()
        .filter(|e| matches!(e, Event::SourceRecovered { .. }))
        .count();
    assert_eq!(recovered, 1);

    let cleared = events
        .iter()
        .find_map(|e| match e {
            Event::AlertCleared { at } => Some(offset(*at)),
            _ => None,
        })
        .unwrap();
    assert_eq!(cleared, 70);
    assert!(fired_at(&events).iter().all(|s| *s <= cleared));

    assert!(source.fetches.get() > 10);
    assert!(!monitor.status().unreachable);
}
