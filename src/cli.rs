//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::models::PageStatus;
use crate::repository::{PageStore, SqlitePageStore};
use crate::server;

/// Check verbosity before clap parsing, so logging can be initialized
/// first.
pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

#[derive(Parser)]
#[command(name = "yomu", version, about = "Manga reader backend with OCR text extraction")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server and the background OCR queue.
    Serve {
        /// Bind host (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print durable OCR status counts and exit.
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.server.host.clone());
            let port = port.unwrap_or(settings.server.port);
            server::serve(&settings, &host, port).await
        }
        Commands::Status => {
            let store = SqlitePageStore::open(&settings.database_path)?;
            let statuses = [
                PageStatus::Pending,
                PageStatus::Processing,
                PageStatus::Completed,
                PageStatus::Failed,
            ];
            let counts = store.count_by_status(&statuses).await?;
            for status in statuses {
                let count = counts.get(&status).copied().unwrap_or(0);
                println!("{:>12}: {}", status.as_str(), count);
            }
            Ok(())
        }
    }
}
