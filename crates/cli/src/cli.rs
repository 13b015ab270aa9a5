use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Confirm meteor camera nights and relay them to the collection server.
#[derive(Parser, Debug)]
#[command(name = "nightrelay", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "NIGHTRELAY_CONFIG",
        default_value = "nightrelay.toml"
    )]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process every pending night: confirm, package and upload
    Run {
        /// Only process this night (STATION_YYYYMMDD_HHMMSS)
        #[arg(long)]
        night: Option<String>,

        /// Accept the archive's detections without launching the tool
        #[arg(long)]
        skip_confirmation: bool,

        /// List what would be done and exit
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the ledger state of every known night
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every recorded transition of a night
    History {
        /// Night id
        night: String,
    },

    /// Make a failed or skipped night eligible for the next run
    Reset {
        /// Night id
        night: String,
    },

    /// Mark a night as skipped so runs ignore it
    Skip {
        /// Night id
        night: String,

        /// Reason recorded in the ledger
        #[arg(long, default_value = "skipped by operator")]
        reason: String,
    },

    /// Record nights already present on the remote as uploaded
    Reconcile,

    /// Print the effective configuration with secrets redacted
    Config,
}
