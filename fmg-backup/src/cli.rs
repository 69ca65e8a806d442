//! # fmg-backup CLI Interface
//!
//! Command parsing and orchestration for the `fmg-backup` binary. Everything that
//! talks to the controller or touches the backup tree lives in `fmg-backup-core`;
//! this module wires configuration, the HTTP client, the filesystem store and the
//! Ctrl-C handler together.
//!
//! ## Subcommands
//! - `sync`: run one backup pass and print the summary.
//! - `validate`: load and validate the configuration without touching the network.
//!
//! ## Exit status
//! `run` returns `Ok` for a completed pass, even one with per-node failures. Config
//! errors, authentication failures and cancelled runs are returned as errors.
use crate::load_config::{load_config, load_env_file};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fmg_backup_core::controller::FortiManagerClient;
use fmg_backup_core::error::SyncError;
use fmg_backup_core::rpc::JsonRpcClient;
use fmg_backup_core::store::FsArtifactStore;
use fmg_backup_core::synchronise::synchronise;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// CLI for fmg-backup: back up device configuration revisions from FortiManager.
#[derive(Parser)]
#[clap(
    name = "fmg-backup",
    version,
    about = "Back up FortiGate configuration revisions from a FortiManager controller"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download every revision installed at or after the cutoff that is not yet stored
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Env file providing FMG_API_KEY (defaults to ./config.env when present)
        #[clap(long)]
        env_file: Option<PathBuf>,
    },
    /// Check the configuration without contacting the controller
    Validate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Env file providing FMG_API_KEY (defaults to ./config.env when present)
        #[clap(long)]
        env_file: Option<PathBuf>,
    },
}

/// Cancels `token` on the first Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, stopping the run");
                token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    })
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Validate { config, env_file } => {
            load_env_file(env_file.as_deref())?;
            let config = load_config(config)?;
            tracing::info!(command = "validate", "Configuration is valid");
            println!("Configuration OK");
            println!("{config:#?}");
            Ok(())
        }
        Commands::Sync { config, env_file } => {
            load_env_file(env_file.as_deref())?;
            let config = load_config(config)?;
            tracing::info!(command = "sync", "Starting backup run");

            let cancel = CancellationToken::new();
            let rpc = JsonRpcClient::new(&config.controller, cancel.clone())?;
            let controller = FortiManagerClient::new(rpc);
            let store = FsArtifactStore::new(&config.output_dir);

            let interrupt = spawn_interrupt_handler(cancel.clone());
            let result = synchronise(&config, &controller, &store, &cancel).await;
            interrupt.abort();

            match result {
                Ok(summary) => {
                    println!("{summary}");
                    if summary.cancelled {
                        tracing::warn!(command = "sync", "Backup run cancelled");
                        bail!("backup run was cancelled before completion");
                    }
                    tracing::info!(
                        command = "sync",
                        written = summary.revisions.written,
                        failures = summary.failures.len(),
                        "Backup run complete"
                    );
                    Ok(())
                }
                Err(e @ SyncError::Auth(_)) => {
                    tracing::error!(command = "sync", error = %e, "Backup run aborted");
                    bail!("{e}. Check FMG_API_KEY and the API user's permissions")
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Backup run failed");
                    Err(e.into())
                }
            }
        }
    }
}
