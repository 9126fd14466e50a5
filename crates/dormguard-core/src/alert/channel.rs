//! Delivery seams for local alerts and push notifications.
//!
//! Both channels are fire-and-forget from the engines' point of view: a
//! failure is logged and dropped, never retried in a loop.

use std::io::Write;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::notification::{Permission, PushNotification};
use crate::error::NotifyError;

/// Haptic pulse pattern in milliseconds (on, off, on).
pub const PULSE_PATTERN_MS: [u64; 3] = [200, 100, 200];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAlert {
    pub sequence: u32,
    pub open_since: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

/// Visual flash + haptic pulse.
pub trait LocalAlertChannel {
    fn pulse(&self, alert: &LocalAlert);

    /// Reset visual indicators.
    fn clear(&self) {}
}

pub trait PushChannel {
    fn permission(&self) -> Permission;

    /// Ask the platform once. Callers must not call this repeatedly; see
    /// [`ensure_permission_once`].
    fn request_permission(&mut self) -> Permission;

    fn show(&self, notification: &PushNotification) -> Result<(), NotifyError>;
}

/// Request permission at most once over the lifetime of the settings.
///
/// Returns the current permission and whether a prompt was issued, so the
/// caller can persist the fact.
pub fn ensure_permission_once<P>(channel: &mut P, already_prompted: bool) -> (Permission, bool)
where
    P: PushChannel + ?Sized,
{
    match channel.permission() {
        Permission::Default if !already_prompted => (channel.request_permission(), true),
        other => (other, false),
    }
}

/// Deliver and swallow the error.
pub fn deliver<P>(channel: &P, notification: &PushNotification)
where
    P: PushChannel + ?Sized,
{
    if let Err(e) = channel.show(notification) {
        debug!(error = %e, tag = %notification.tag, "notification dropped");
    }
}

/// Terminal bell + one stderr line per alert.
#[derive(Debug, Default)]
pub struct TerminalAlert;

impl LocalAlertChannel for TerminalAlert {
    fn pulse(&self, alert: &LocalAlert) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "\x07[ALERT #{}] door open since {}",
            alert.sequence,
            alert.open_since.format("%H:%M:%S")
        );
    }

    fn clear(&self) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "[ALERT] cleared");
    }
}

/// Notifications printed to the terminal. The user owns the terminal, so
/// asking for permission always succeeds unless it was denied in settings.
#[derive(Debug)]
pub struct ConsolePushChannel {
    permission: Permission,
}

impl ConsolePushChannel {
    pub fn new(permission: Permission) -> Self {
        Self { permission }
    }
}

impl PushChannel for ConsolePushChannel {
    fn permission(&self) -> Permission {
        self.permission
    }

    fn request_permission(&mut self) -> Permission {
        if self.permission == Permission::Default {
            self.permission = Permission::Granted;
        }
        self.permission
    }

    fn show(&self, n: &PushNotification) -> Result<(), NotifyError> {
        if self.permission != Permission::Granted {
            return Err(NotifyError::PermissionDenied);
        }
        let mut err = std::io::stderr().lock();
        writeln!(err, "\x07[{}] {} ({})", n.title, n.body, n.tag)
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

/// JSON POST to a webhook. Sends are spawned on the current tokio runtime
/// and never awaited by the caller.
#[derive(Debug, Clone)]
pub struct WebhookPushChannel {
    url: String,
    client: Client,
    permission: Permission,
}

impl WebhookPushChannel {
    pub fn new(url: impl Into<String>, permission: Permission) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            permission,
        }
    }
}

impl PushChannel for WebhookPushChannel {
    fn permission(&self) -> Permission {
        self.permission
    }

    fn request_permission(&mut self) -> Permission {
        if self.permission == Permission::Default {
            self.permission = if self.url.is_empty() {
                Permission::Denied
            } else {
                Permission::Granted
            };
        }
        self.permission
    }

    fn show(&self, n: &PushNotification) -> Result<(), NotifyError> {
        if self.permission != Permission::Granted {
            return Err(NotifyError::PermissionDenied);
        }
        if self.url.is_empty() {
            return Err(NotifyError::NoChannel);
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NotifyError::NoChannel)?;

        let request = self.client.post(&self.url).json(&json!({
            "title": n.title,
            "body": n.body,
            "tag": n.tag,
            "renotify": true,
            "vibrate": PULSE_PATTERN_MS,
            "openSince": n.open_since,
        }));
        let tag = n.tag.clone();
        handle.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => debug!(%tag, "webhook notification sent"),
                Ok(resp) => warn!(%tag, status = resp.status().as_u16(), "webhook rejected notification"),
                Err(e) => warn!(%tag, error = %e, "webhook notification failed"),
            }
        });
        Ok(())
    }
}

impl<P: PushChannel + ?Sized> PushChannel for Box<P> {
    fn permission(&self) -> Permission {
        (**self).permission()
    }

    fn request_permission(&mut self) -> Permission {
        (**self).request_permission()
    }

    fn show(&self, notification: &PushNotification) -> Result<(), NotifyError> {
        (**self).show(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Prompting {
        permission: Permission,
        prompts: Cell<u32>,
    }

    impl PushChannel for Prompting {
        fn permission(&self) -> Permission {
            self.permission
        }

        fn request_permission(&mut self) -> Permission {
            self.prompts.set(self.prompts.get() + 1);
            self.permission = Permission::Granted;
            self.permission
        }

        fn show(&self, _: &PushNotification) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[test]
    fn permission_is_requested_once() {
        let mut channel = Prompting {
            permission: Permission::Default,
            prompts: Cell::new(0),
        };
        assert_eq!(
            ensure_permission_once(&mut channel, false),
            (Permission::Granted, true)
        );
        assert_eq!(
            ensure_permission_once(&mut channel, true),
            (Permission::Granted, false)
        );
        assert_eq!(channel.prompts.get(), 1);
    }

    #[test]
    fn already_prompted_default_is_not_reprompted() {
        let mut channel = Prompting {
            permission: Permission::Default,
            prompts: Cell::new(0),
        };
        assert_eq!(
            ensure_permission_once(&mut channel, true),
            (Permission::Default, false)
        );
        assert_eq!(channel.prompts.get(), 0);
    }

    #[test]
    fn console_channel_refuses_without_grant() {
        let channel = ConsolePushChannel::new(Permission::Denied);
        let n = PushNotification {
            title: "t".into(),
            body: "b".into(),
            tag: "door-alert".into(),
            open_since: Utc::now(),
            at: Utc::now(),
        };
        assert_eq!(channel.show(&n), Err(NotifyError::PermissionDenied));
    }

    #[test]
    fn webhook_without_runtime_has_no_channel() {
        let channel = WebhookPushChannel::new("http://127.0.0.1:9/hook", Permission::Granted);
        let n = PushNotification {
            title: "t".into(),
            body: "b".into(),
            tag: "door-alert".into(),
            open_since: Utc::now(),
            at: Utc::now(),
        };
        assert_eq!(channel.show(&n), Err(NotifyError::NoChannel));
    }
}
