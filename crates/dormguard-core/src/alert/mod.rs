mod channel;
mod escalation;
mod notification;
mod timer;

pub use channel::{
    deliver, ensure_permission_once, ConsolePushChannel, LocalAlert, LocalAlertChannel,
    PushChannel, TerminalAlert, WebhookPushChannel, PULSE_PATTERN_MS,
};
pub use escalation::{AlertLevel, AlertPhase, AlertState, EscalationConfig, EscalationEngine};
pub use notification::{
    DeliveryGate, NotificationConfig, NotificationEngine, NotificationState, NotifyOutcome,
    Permission, PushNotification, DEFAULT_BODY, DEFAULT_TAG, DEFAULT_TITLE,
};
pub use timer::{Timer, TimerId, TimerKind, TimerSlot};
