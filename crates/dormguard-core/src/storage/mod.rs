mod config;

pub use config::{AlertsConfig, Config, ExportConfig, NotificationsConfig, SourceConfig};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/dormguard[-dev]/` based on DORMGUARD_ENV.
///
/// Set DORMGUARD_ENV=dev to use a development directory, or
/// DORMGUARD_CONFIG_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("DORMGUARD_CONFIG_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("DORMGUARD_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("dormguard-dev")
            } else {
                base_dir.join("dormguard")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DirUnavailable(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
