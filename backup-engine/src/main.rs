//! backupctl - operator tool for the archive directory.
//!
//! Works on archives only; it never touches a live datastore.

use anyhow::{Context, Result};
use backup_engine::{archive, config::Config, events::LogSink, utils, BackupService, MemoryStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Archive directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List archives, newest first
    List,

    /// Delete archives older than the retention window
    Prune {
        /// Retention in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u32>,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Check an archive against its checksum and parse it
    Verify { name: String },

    /// Print the snapshot metadata of an archive
    Inspect { name: String },

    /// Write the decrypted payload of an archive to a file
    Decrypt {
        name: String,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Also decompress, writing plain JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    if let Some(dir) = args.dir {
        config.backup.dir = dir;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "backupctl v{} using {}",
        env!("CARGO_PKG_VERSION"),
        config.backup.dir.display()
    );

    let service = BackupService::new(config, Arc::new(MemoryStore::new()), Arc::new(LogSink));

    match args.command {
        Command::List => print_json(&service.list_backups()?)?,
        Command::Prune { days, dry_run } => print_json(&service.prune(days, dry_run)?)?,
        Command::Verify { name } => print_json(&service.verify_backup(&name)?)?,
        Command::Inspect { name } => print_json(&service.load_snapshot(&name)?.meta)?,
        Command::Decrypt { name, output, json } => {
            let stored = service.read_backup(&name)?;
            let mut bytes = stored.payload(service.config().backup.passphrase.as_deref())?;
            if json {
                bytes = archive::decompress(&bytes, service.config().backup.max_inflated_bytes)?;
            }
            std::fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
