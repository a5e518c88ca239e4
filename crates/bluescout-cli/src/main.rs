//! # bluescout
//!
//! Command-line surface for the bluescout BLE scanner.
//!
//! Subcommands:
//! - `run` - start a scan event in a dedicated background process
//! - `stop` - request a running scan event to stop
//! - `status` - classify scan events against the live process table
//! - `scan` - host a scan event in this process (what `run` spawns)
//! - `filter` - manage filter rules
//!
//! ## Running
//!
//! ```bash
//! bluescout filter add --company-code 0xFFFF --rssi-min -80
//! bluescout run ScanEvent001
//! bluescout status
//! bluescout stop ScanEvent001
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use bluescout_core::{AppConfig, ScanMode};

mod commands;
mod logging;

#[derive(Debug, Parser)]
#[command(name = "bluescout", version, about = "BLE advertisement scanner with filtered persistence")]
struct Cli {
    /// Configuration file (default: /etc/bluescout/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path override.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a scan event in a dedicated background process.
    ///
    /// Refused while any event is enabled; stop all events first.
    Run {
        /// Scan event name.
        name: String,

        /// Monitor polling interval in seconds (>= 1.0).
        #[arg(long)]
        interval: Option<f64>,

        /// Discovery strategy: continuous or interval.
        #[arg(long)]
        mode: Option<ScanMode>,
    },

    /// Request a scan event to stop.
    ///
    /// Only flips the run flag; the event's monitor loop notices within one
    /// polling interval.
    Stop {
        /// Scan event name.
        name: String,
    },

    /// Show scan events and their liveness status.
    Status {
        /// Limit to one event.
        name: Option<String>,
    },

    /// Host a scan event in this process until it is stopped.
    Scan {
        /// Scan event name.
        name: String,

        /// Monitor polling interval in seconds (>= 1.0).
        #[arg(long)]
        interval: Option<f64>,

        /// Discovery strategy: continuous or interval.
        #[arg(long)]
        mode: Option<ScanMode>,
    },

    /// Manage filter rules.
    Filter {
        #[command(subcommand)]
        command: FilterCommand,
    },
}

#[derive(Debug, Subcommand)]
enum FilterCommand {
    /// Add a filter rule.
    Add {
        /// Free-text note.
        #[arg(long)]
        note: Option<String>,

        /// Exact-match MAC address, e.g. 12:34:56:78:90:AB.
        #[arg(long)]
        mac: Option<String>,

        /// Exact-match advertised local name.
        #[arg(long)]
        local_name: Option<String>,

        /// Company code, decimal or 0x-prefixed hex.
        #[arg(long, value_parser = commands::parse_company_code)]
        company_code: Option<u16>,

        /// Regex over hex-encoded manufacturer payloads, e.g. '^626c65(34|35)2e30$'.
        #[arg(long)]
        manufacturer_data: Option<String>,

        /// Service UUID.
        #[arg(long)]
        service_uuid: Option<Uuid>,

        /// Regex over hex-encoded service payloads.
        #[arg(long)]
        service_data: Option<String>,

        /// Lower RSSI bound in dBm (-100..=0).
        #[arg(long, allow_hyphen_values = true)]
        rssi_min: Option<i16>,

        /// Upper RSSI bound in dBm (-100..=0).
        #[arg(long, allow_hyphen_values = true)]
        rssi_max: Option<i16>,

        /// Create the rule disabled.
        #[arg(long)]
        disabled: bool,
    },

    /// List filter rules.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Long-lived scan processes get production logging (rolling files);
    // one-shot admin commands log to the terminal.
    let is_production = matches!(cli.command, Command::Scan { .. })
        || std::env::var("BLUESCOUT_ENV").is_ok_and(|env| env == "production");
    logging::init(is_production)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(bluescout_core::default_config_path);
    let mut config = AppConfig::load_or_default(&config_path)?;
    if let Some(database) = cli.database.clone() {
        config.database_path = database;
    }

    commands::dispatch(cli, config).await
}
