use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "dormguard", version, about = "DormGuard door monitor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the door and print events as JSON lines
    Watch(commands::watch::WatchArgs),
    /// Fetch once and print the current door status
    Status(commands::status::StatusArgs),
    /// Export door history as CSV
    Export {
        #[command(subcommand)]
        action: commands::export::ExportAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    logging::init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Export { action } => commands::export::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
