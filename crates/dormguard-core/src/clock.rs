//! Wall-clock view anchored on the tokio clock.
//!
//! Engines take `DateTime<Utc>`; the runtime sleeps on `tokio::time::Instant`.
//! `MonitorClock` maps one onto the other so that pausing or advancing tokio
//! time in tests moves engine time by exactly the same amount.

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MonitorClock {
    origin: Instant,
    origin_wall: DateTime<Utc>,
}

impl MonitorClock {
    pub fn start() -> Self {
        Self::anchored(Utc::now())
    }

    /// Pin the current tokio instant to `wall`.
    pub fn anchored(wall: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            origin_wall: wall,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        Duration::from_std(elapsed)
            .ok()
            .and_then(|d| self.origin_wall.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The tokio instant at which wall time reaches `at`. Past times map to
    /// the anchor or later, never before it.
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        match (at - self.origin_wall).to_std() {
            Ok(offset) => self.origin + offset,
            Err(_) => self.origin,
        }
    }
}
