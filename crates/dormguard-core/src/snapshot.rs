//! Canonical door readings.
//!
//! Every record the source hands us is normalized into these types at the
//! poller boundary; the engines never see raw rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DoorState {
    Open,
    Closed,
    Unknown,
}

impl DoorState {
    /// Lenient parse of a source cell. Anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" | "OPENED" => DoorState::Open,
            "CLOSED" | "CLOSE" | "SHUT" => DoorState::Closed,
            _ => DoorState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DoorState::Open => "OPEN",
            DoorState::Closed => "CLOSED",
            DoorState::Unknown => "UNKNOWN",
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Battery charge as a percentage, clamped to 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Battery(u8);

impl Battery {
    pub fn new(percent: u8) -> Self {
        Self(percent.min(100))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Accepts `87`, `87%`, `87.4 %`. Returns `None` for `N/A` and friends.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches('%').trim();
        let value: f64 = trimmed.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Some(Self::new(value.round().min(100.0) as u8))
    }
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// One reported door reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub door: DoorState,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub battery: Option<Battery>,
}

impl Snapshot {
    pub fn new(door: DoorState, observed_at: DateTime<Utc>) -> Self {
        Self {
            door,
            observed_at,
            battery: None,
        }
    }

    pub fn with_battery(mut self, battery: Battery) -> Self {
        self.battery = Some(battery);
        self
    }

    /// UNKNOWN collapses to CLOSED so ambiguous data never escalates.
    pub fn is_open(&self) -> bool {
        self.door.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn door_state_parse_is_lenient() {
        assert_eq!(DoorState::parse("OPEN"), DoorState::Open);
        assert_eq!(DoorState::parse(" open "), DoorState::Open);
        assert_eq!(DoorState::parse("Closed"), DoorState::Closed);
        assert_eq!(DoorState::parse(""), DoorState::Unknown);
        assert_eq!(DoorState::parse("ajar"), DoorState::Unknown);
    }

    #[test]
    fn battery_parse_accepts_percent_suffix() {
        assert_eq!(Battery::parse("87%"), Some(Battery::new(87)));
        assert_eq!(Battery::parse(" 42 "), Some(Battery::new(42)));
        assert_eq!(Battery::parse("99.6 %"), Some(Battery::new(100)));
        assert_eq!(Battery::parse("140"), Some(Battery::new(100)));
        assert_eq!(Battery::parse("N/A"), None);
        assert_eq!(Battery::parse("-3"), None);
    }

    #[test]
    fn door_state_serializes_uppercase() {
        let json = serde_json::to_string(&DoorState::Open).unwrap();
        assert_eq!(json, "\"OPEN\"");
    }
}
