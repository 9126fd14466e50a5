use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use dormguard_core::alert::TerminalAlert;
use dormguard_core::source::silence_device;
use dormguard_core::{Config, Event, Monitor, MonitorCommand, Permission};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use super::{push_channel, runtime, Input};

/// Budget for the request that silences the sensor's buzzer.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args)]
pub struct WatchArgs {
    /// Read a saved payload instead of the configured endpoint
    #[arg(long)]
    pub input: Option<PathBuf>,
}

pub fn run(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    let source = Input::resolve(&config, args.input)?;
    let mut monitor = Monitor::new(config.monitor_settings(), TerminalAlert, push_channel(&config));

    if config.notifications.enabled {
        let (permission, prompted) = monitor.prompt_permission_once();
        if prompted {
            config.notifications.permission = permission;
            config.notifications.permission_prompted = true;
            config.save()?;
        }
    }

    let rt = runtime()?;
    rt.block_on(async {
        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();

        tokio::spawn(read_commands(command_tx.clone(), config.source.device_url.clone()));
        let printer = tokio::spawn(print_events(event_rx));
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = command_tx.send(MonitorCommand::Shutdown);
            }
        });

        monitor.run(&source, command_rx, event_tx).await;
        let _ = printer.await;
    });
    // stdin is read on a blocking thread that never returns on its own
    rt.shutdown_background();
    Ok(())
}

/// Parse one line typed into a running `watch`.
fn parse_command(line: &str) -> Option<MonitorCommand> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("disable", None) => MonitorCommand::DisableAlert,
        ("alerts", Some("on")) => MonitorCommand::SetAlertsEnabled(true),
        ("alerts", Some("off")) => MonitorCommand::SetAlertsEnabled(false),
        ("notify", Some("on")) => MonitorCommand::SetNotificationsEnabled(true),
        ("notify", Some("off")) => MonitorCommand::SetNotificationsEnabled(false),
        ("quit" | "exit", None) => MonitorCommand::Shutdown,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

async fn read_commands(commands: UnboundedSender<MonitorCommand>, device_url: Option<String>) {
    let client = reqwest::Client::builder()
        .timeout(SILENCE_TIMEOUT)
        .build()
        .unwrap_or_default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            warn!(input = %line.trim(), "unknown command (try: disable, alerts on|off, notify on|off, quit)");
            continue;
        };
        if !dispatch(command, &commands, &client, device_url.as_deref()) {
            break;
        }
    }
    info!("stdin closed; send SIGINT or type quit to stop");
}

/// Hand one command to the monitor. Device and config side effects never
/// hold up delivery. Returns false once the monitor has gone away.
fn dispatch(
    command: MonitorCommand,
    commands: &UnboundedSender<MonitorCommand>,
    client: &reqwest::Client,
    device_url: Option<&str>,
) -> bool {
    if commands.send(command).is_err() {
        return false;
    }
    match command {
        MonitorCommand::DisableAlert => {
            if let Some(url) = device_url {
                let client = client.clone();
                let url = url.to_string();
                tokio::spawn(async move {
                    if let Err(e) = silence_device(&client, &url).await {
                        warn!(error = %e, "failed to silence device");
                    }
                });
            }
        }
        MonitorCommand::SetAlertsEnabled(enabled) => persist("alerts.enabled", enabled),
        MonitorCommand::SetNotificationsEnabled(enabled) => {
            persist("notifications.enabled", enabled)
        }
        MonitorCommand::Shutdown => {}
    }
    true
}

fn persist(key: &str, enabled: bool) {
    let result = Config::load().and_then(|mut config| config.set(key, &enabled.to_string()));
    if let Err(e) = result {
        warn!(key, error = %e, "failed to save setting");
    }
}

fn persist_permission(permission: Permission) {
    let result = Config::load().and_then(|mut config| {
        config.notifications.permission = permission;
        config.notifications.permission_prompted = true;
        config.save()
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to save notification permission");
    }
}

async fn print_events(mut events: UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        if let Event::PermissionRequested { permission, .. } = &event {
            persist_permission(*permission);
        }
        let Ok(line) = serde_json::to_string(&event) else {
            continue;
        };
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_accepts_known_words() {
        assert_eq!(parse_command("disable"), Some(MonitorCommand::DisableAlert));
        assert_eq!(
            parse_command("  alerts off "),
            Some(MonitorCommand::SetAlertsEnabled(false))
        );
        assert_eq!(
            parse_command("notify on"),
            Some(MonitorCommand::SetNotificationsEnabled(true))
        );
        assert_eq!(parse_command("quit"), Some(MonitorCommand::Shutdown));
        assert_eq!(parse_command("exit"), Some(MonitorCommand::Shutdown));
    }

    #[test]
    fn test_parse_command_rejects_garbage() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("alerts"), None);
        assert_eq!(parse_command("alerts maybe"), None);
        assert_eq!(parse_command("disable now"), None);
        assert_eq!(parse_command("notify on please"), None);
    }

    #[tokio::test]
    async fn test_disable_reaches_monitor_before_device_answers() {
        let (tx, mut rx) = unbounded_channel();
        let client = reqwest::Client::new();
        // Non-routable address: the silence request can only time out.
        let device = Some("http://10.255.255.1");

        assert!(dispatch(MonitorCommand::DisableAlert, &tx, &client, device));
        assert_eq!(rx.try_recv(), Ok(MonitorCommand::DisableAlert));
    }

    #[tokio::test]
    async fn test_dispatch_stops_when_monitor_is_gone() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let client = reqwest::Client::new();
        assert!(!dispatch(MonitorCommand::Shutdown, &tx, &client, None));
    }
}
