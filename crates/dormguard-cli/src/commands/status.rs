use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};
use clap::Args;
use dormguard_core::alert::TerminalAlert;
use dormguard_core::{Config, Monitor, MonitorStatus, SnapshotSource};

use super::{push_channel, runtime, Input};

#[derive(Args)]
pub struct StatusArgs {
    /// Read a saved payload instead of the configured endpoint
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let source = Input::resolve(&config, args.input)?;

    let mut monitor = Monitor::new(config.monitor_settings(), TerminalAlert, push_channel(&config));
    let rt = runtime()?;
    let result = rt.block_on(source.fetch());
    let now = monitor.clock().now();
    monitor.handle_fetch(result, now);

    let status = monitor.status();
    if status.unreachable {
        return Err("snapshot source unreachable".into());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render(&status, config.record_parser().offset()));
    }
    Ok(())
}

fn render(status: &MonitorStatus, offset: FixedOffset) -> String {
    let local = |at: Option<DateTime<Utc>>| {
        at.map(|t| t.with_timezone(&offset).format("%-I:%M %p, %-d %b %Y").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let on_off = |b: bool| if b { "on" } else { "off" };
    let battery = status
        .battery
        .map(|b| b.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "Door:          {}\n\
         Battery:       {}\n\
         Observed at:   {}\n\
         Last opened:   {}\n\
         Alert level:   {}\n\
         Alerts:        {}\n\
         Notifications: {} (permission {})\n",
        status.door,
        battery,
        local(status.observed_at),
        local(status.last_opened),
        status.level,
        on_off(status.alerts_enabled),
        on_off(status.notifications_enabled),
        status.permission,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dormguard_core::{AlertLevel, Battery, DoorState, Permission};

    #[test]
    fn render_uses_source_offset() {
        let status = MonitorStatus {
            door: DoorState::Open,
            battery: Some(Battery::new(72)),
            observed_at: Some(Utc.with_ymd_and_hms(2025, 1, 5, 2, 30, 0).unwrap()),
            last_opened: None,
            level: AlertLevel::Pending,
            alerts_enabled: true,
            notifications_enabled: false,
            permission: Permission::Default,
            unreachable: false,
        };
        let text = render(&status, FixedOffset::west_opt(5 * 3600).unwrap());
        assert!(text.contains("Door:          OPEN"));
        assert!(text.contains("Observed at:   9:30 PM, 4 Jan 2025"));
        assert!(text.contains("Last opened:   -"));
        assert!(text.contains("Alert level:   pending"));
        assert!(text.contains("Notifications: off (permission default)"));
    }
}
