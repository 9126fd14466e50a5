use std::path::PathBuf;

use clap::{Args, Subcommand};
use dormguard_core::history::{export_all, export_latest};
use dormguard_core::{Config, SnapshotSource};

use super::{runtime, Input};

#[derive(Args)]
pub struct ExportTarget {
    /// Read a saved payload instead of the configured endpoint
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ExportAction {
    /// Full history, oldest first
    All {
        #[command(flatten)]
        target: ExportTarget,
    },
    /// Most recent rows only
    Latest {
        /// Number of rows (defaults to export.latest_window)
        #[arg(short = 'n', long)]
        count: Option<usize>,
        #[command(flatten)]
        target: ExportTarget,
    },
}

pub fn run(action: ExportAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let (target, window) = match action {
        ExportAction::All { target } => (target, None),
        ExportAction::Latest { count, target } => {
            (target, Some(count.unwrap_or(config.export.latest_window)))
        }
    };

    let source = Input::resolve(&config, target.input)?;
    let report = runtime()?.block_on(source.fetch())?;
    let text = match window {
        None => export_all(&report.history),
        Some(n) => export_latest(&report.history, n),
    };

    match target.output {
        Some(path) => {
            let rows = text.lines().count().saturating_sub(1);
            std::fs::write(&path, &text)?;
            eprintln!("exported {rows} rows to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
