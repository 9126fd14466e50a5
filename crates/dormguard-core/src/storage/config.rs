//! TOML-based application configuration.
//!
//! Stores:
//! - Where snapshots come from and how often to poll
//! - Local alert timing and the global alerts switch
//! - Push notification settings, permission state and webhook target
//! - Export window size
//!
//! Configuration is stored at `~/.config/dormguard/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

use super::data_dir;
use crate::alert::{
    EscalationConfig, NotificationConfig, Permission, DEFAULT_BODY, DEFAULT_TAG, DEFAULT_TITLE,
};
use crate::error::ConfigError;
use crate::history::export::DEFAULT_LATEST_WINDOW;
use crate::history::RecordParser;
use crate::monitor::MonitorSettings;

/// Upper bound for every interval setting.
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Upper bound for `export.latest_window`.
pub const MAX_LATEST_WINDOW: usize = 100_000;

/// Snapshot source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON endpoint returning sheet values or an array of rows.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_5")]
    pub poll_interval_secs: u64,
    /// A fetch still pending after this many seconds counts as a failure.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Offset used to read wall-clock time and date cells.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Sensor base URL, used to silence its buzzer.
    #[serde(default)]
    pub device_url: Option<String>,
}

/// Local alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    #[serde(default = "default_5")]
    pub repeat_secs: u64,
}

/// Push notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold_secs: u64,
    #[serde(default = "default_5")]
    pub check_interval_secs: u64,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_permission")]
    pub permission: Permission,
    /// Set once permission has been asked for; never asked again.
    #[serde(default)]
    pub permission_prompted: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_latest_window")]
    pub latest_window: usize,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/dormguard/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_5() -> u64 {
    5
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_debounce() -> u64 {
    10
}
fn default_threshold() -> u64 {
    180
}
fn default_title() -> String {
    DEFAULT_TITLE.into()
}
fn default_body() -> String {
    DEFAULT_BODY.into()
}
fn default_tag() -> String {
    DEFAULT_TAG.into()
}
fn default_permission() -> Permission {
    Permission::Default
}
fn default_latest_window() -> usize {
    DEFAULT_LATEST_WINDOW
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            poll_interval_secs: default_5(),
            fetch_timeout_secs: default_fetch_timeout(),
            utc_offset_minutes: 0,
            device_url: None,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_secs: default_debounce(),
            repeat_secs: default_5(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_secs: default_threshold(),
            check_interval_secs: default_5(),
            title: default_title(),
            body: default_body(),
            tag: default_tag(),
            permission: default_permission(),
            permission_prompted: false,
            webhook_url: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            latest_window: default_latest_window(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("'{value}' is not true or false")))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    // Unset optional strings serialize as null.
                    serde_json::Value::Null if value.is_empty() => serde_json::Value::Null,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Flattened `key = value` pairs, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    /// Change one value in memory. Returns error if the key is unknown or
    /// the resulting config does not validate.
    pub fn update(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.update(key, value)?;
        self.save()
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        let intervals = [
            ("source.poll_interval_secs", self.source.poll_interval_secs, 1),
            ("source.fetch_timeout_secs", self.source.fetch_timeout_secs, 1),
            ("alerts.debounce_secs", self.alerts.debounce_secs, 0),
            ("alerts.repeat_secs", self.alerts.repeat_secs, 1),
            ("notifications.threshold_secs", self.notifications.threshold_secs, 0),
            (
                "notifications.check_interval_secs",
                self.notifications.check_interval_secs,
                1,
            ),
        ];
        for (key, secs, min) in intervals {
            if secs < min {
                return Err(invalid(key, &format!("must be at least {min}")));
            }
            if secs > MAX_INTERVAL_SECS {
                return Err(invalid(key, &format!("must be at most {MAX_INTERVAL_SECS}")));
            }
        }
        if self.export.latest_window > MAX_LATEST_WINDOW {
            return Err(invalid(
                "export.latest_window",
                &format!("must be at most {MAX_LATEST_WINDOW}"),
            ));
        }
        if !(-14 * 60..=14 * 60).contains(&self.source.utc_offset_minutes) {
            return Err(invalid("source.utc_offset_minutes", "must be within +/-14 hours"));
        }

        let urls = [
            ("source.endpoint", Some(self.source.endpoint.as_str())),
            ("source.device_url", self.source.device_url.as_deref()),
            ("notifications.webhook_url", self.notifications.webhook_url.as_deref()),
        ];
        for (key, url) in urls {
            if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
                Url::parse(url.trim()).map_err(|e| invalid(key, &e.to_string()))?;
            }
        }
        Ok(())
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            debounce: seconds(self.alerts.debounce_secs),
            repeat: seconds(self.alerts.repeat_secs),
        }
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            threshold: seconds(self.notifications.threshold_secs),
            title: self.notifications.title.clone(),
            body: self.notifications.body.clone(),
            tag: self.notifications.tag.clone(),
        }
    }

    pub fn record_parser(&self) -> RecordParser {
        RecordParser::with_offset_minutes(self.source.utc_offset_minutes)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: StdDuration::from_secs(
                self.source.poll_interval_secs.clamp(1, MAX_INTERVAL_SECS),
            ),
            check_interval: StdDuration::from_secs(
                self.notifications.check_interval_secs.clamp(1, MAX_INTERVAL_SECS),
            ),
            fetch_timeout: StdDuration::from_secs(
                self.source.fetch_timeout_secs.clamp(1, MAX_INTERVAL_SECS),
            ),
            escalation: self.escalation_config(),
            notification: self.notification_config(),
            alerts_enabled: self.alerts.enabled,
            notifications_enabled: self.notifications.enabled,
            permission_prompted: self.notifications.permission_prompted,
        }
    }
}

/// Seconds as a chrono duration, clamped to [`MAX_INTERVAL_SECS`] for
/// values that bypassed [`Config::validate`] (a hand-edited file).
fn seconds(secs: u64) -> Duration {
    i64::try_from(secs.min(MAX_INTERVAL_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(Duration::zero)
}
