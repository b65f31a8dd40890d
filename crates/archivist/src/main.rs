//! Archivist command-line entry point.
//!
//! - `run`: scan the root, then archive new files as they appear
//! - `scan`: archive what is already there and exit
//! - `status` / `reset`: inspect and clear status records
//! - `cid`: compute a file's CID without touching the store

use anyhow::{Context, Result};
use archivist::config::{resolve_config_path, Config};
use archivist::service;
use archivist_logging::LogConfig;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "archivist", version, about = "Content-addressed archiving of a watched directory")]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: /etc/archivist/config.toml)
    #[arg(short = 'c', long, global = true, env = "ARCHIVIST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the watched root, then archive new files until interrupted
    Run,

    /// Archive files already under the root, then exit
    Scan,

    /// Show status records
    Status {
        /// Only records in this state (found, uploading, success, error)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum records to list
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete status records so the next scan ingests those files again
    Reset {
        /// Files whose records to delete
        #[arg(required_unless_present = "status", conflicts_with = "status")]
        paths: Vec<PathBuf>,

        /// Delete every record in this state (found, uploading or error)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Print the CID of a file
    Cid {
        file: PathBuf,

        /// Also write the CAR container here
        #[arg(long)]
        car: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = resolve_config_path(path);
    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            runtime()?.block_on(async {
                let (stop_tx, stop_rx) = watch::channel(false);
                tokio::spawn(async move {
                    service::shutdown_signal().await;
                    let _ = stop_tx.send(true);
                });
                service::run(&config, stop_rx).await.context("Archivist stopped with an error")
            })
        }
        Commands::Scan => {
            let config = load_config(cli.config.as_deref())?;
            let summary = runtime()?.block_on(service::scan_once(&config))?;
            info!(?summary, "Scan finished");
            println!(
                "Scanned {}: {} archived, {} skipped, {} failed",
                config.folder.root.display(),
                summary.archived,
                summary.skipped,
                summary.failed
            );
            Ok(())
        }
        Commands::Status {
            status,
            limit,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let args = cli::status::StatusArgs {
                status,
                limit,
                json,
            };
            runtime()?.block_on(cli::status::run(&config, args))
        }
        Commands::Reset { paths, status } => {
            let config = load_config(cli.config.as_deref())?;
            let args = cli::reset::ResetArgs { paths, status };
            runtime()?.block_on(cli::reset::run(&config, args))
        }
        Commands::Cid { file, car, json } => cli::cid::run(cli::cid::CidArgs { file, car, json }),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = archivist_logging::init_logging(LogConfig {
        app_name: "archivist",
        verbose: cli.verbose,
        log_dir: None,
    });
    if let Err(e) = &logging {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if logging.is_ok() {
                error!("{:#}", err);
            } else {
                eprintln!("Error: {:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
