//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use bluescout_core::filter::compile_payload_regex;
use bluescout_core::store::events::{validate_event_name, validate_interval};
use bluescout_core::{
    ensure_no_enabled_event, is_valid_mac_address, AppConfig, EventLauncher, FilterRule,
    LaunchOptions, ProcessOracle, ScanMode, Store,
};

use crate::{Cli, Command, FilterCommand};

/// Route a parsed command line to its implementation.
pub async fn dispatch(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    match &cli.command {
        Command::Run {
            name,
            interval,
            mode,
        } => run(&cli, &store, name, *interval, *mode).await,
        Command::Stop { name } => stop(&store, name).await,
        Command::Status { name } => status(&store, name.as_deref()).await,
        Command::Scan {
            name,
            interval,
            mode,
        } => scan(&store, &config, name, *interval, *mode).await,
        Command::Filter { command } => filter(&store, command).await,
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Store> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(Store::open(&config.database_path).await?)
}

/// Start `name` in a dedicated background process running `bluescout scan`.
async fn run(
    cli: &Cli,
    store: &Store,
    name: &str,
    interval: Option<f64>,
    mode: Option<ScanMode>,
) -> anyhow::Result<()> {
    validate_event_name(name)?;
    if let Some(interval) = interval {
        validate_interval(interval)?;
    }
    ensure_no_enabled_event(store).await?;

    let exe = std::env::current_exe().context("locating own executable")?;
    let mut command = tokio::process::Command::new(exe);
    command.arg("scan").arg(name);
    if let Some(config) = &cli.config {
        command.arg("--config").arg(config);
    }
    if let Some(database) = &cli.database {
        command.arg("--database").arg(database);
    }
    if let Some(interval) = interval {
        command.arg("--interval").arg(interval.to_string());
    }
    if let Some(mode) = mode {
        command.arg("--mode").arg(mode.to_string());
    }
    command
        .env("BLUESCOUT_ENV", "production")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let child = command.spawn().context("spawning scan process")?;
    let pid = child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string());
    info!(name, %pid, "spawned scan process");
    println!("started scan event '{name}' (pid {pid})");
    Ok(())
}

/// Flip the run flag off; the event's monitor loop does the rest.
async fn stop(store: &Store, name: &str) -> anyhow::Result<()> {
    if !store.set_event_enabled(name, false).await? {
        bail!("scan event '{name}' not found");
    }
    println!("stop requested for scan event '{name}'");
    Ok(())
}

/// Print events with their classification against the live process table.
async fn status(store: &Store, name: Option<&str>) -> anyhow::Result<()> {
    let events = match name {
        Some(name) => match store.get_event(name).await? {
            Some(event) => vec![event],
            None => bail!("scan event '{name}' not found"),
        },
        None => store.list_events().await?,
    };

    if events.is_empty() {
        println!("no scan events");
        return Ok(());
    }

    let oracle = ProcessOracle::new();
    println!(
        "{:<32} {:<8} {:>8} {:>10} {:<10}",
        "NAME", "STATUS", "PID", "INTERVAL", "MODE"
    );
    for event in events {
        let status = oracle.classify(event.pid, event.create_time, event.is_enabled);
        let pid = event
            .pid
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        println!(
            "{:<32} {:<8} {:>8} {:>9.1}s {:<10}",
            event.name, status, pid, event.interval, event.scan_mode
        );
    }
    Ok(())
}

/// Host the event in this process; blocks until it is stopped.
async fn scan(
    store: &Store,
    config: &AppConfig,
    name: &str,
    interval: Option<f64>,
    mode: Option<ScanMode>,
) -> anyhow::Result<()> {
    let radio = build_radio(config).await?;
    let launcher = EventLauncher::new(store.clone(), radio);
    launcher
        .launch(name, LaunchOptions { interval, mode })
        .await?;
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn build_radio(config: &AppConfig) -> anyhow::Result<Arc<bluescout_core::BluerRadio>> {
    Ok(Arc::new(
        bluescout_core::BluerRadio::new(config.adapter.as_deref()).await?,
    ))
}

#[cfg(not(feature = "bluetooth"))]
async fn build_radio(_config: &AppConfig) -> anyhow::Result<Arc<bluescout_core::MockRadio>> {
    Ok(Arc::new(bluescout_core::MockRadio::default()))
}

async fn filter(store: &Store, command: &FilterCommand) -> anyhow::Result<()> {
    match command {
        FilterCommand::Add {
            note,
            mac,
            local_name,
            company_code,
            manufacturer_data,
            service_uuid,
            service_data,
            rssi_min,
            rssi_max,
            disabled,
        } => {
            if let Some(mac) = mac {
                if !is_valid_mac_address(mac) {
                    bail!("'{mac}' is not a valid MAC address");
                }
            }
            let rule = FilterRule {
                note: note.clone(),
                is_enabled: !disabled,
                mac_addr: mac.clone(),
                local_name: local_name.clone(),
                company_code: *company_code,
                manufacturer_data: manufacturer_data
                    .as_deref()
                    .map(|pattern| compile_payload_regex(0, pattern))
                    .transpose()?,
                service_uuid: *service_uuid,
                service_data: service_data
                    .as_deref()
                    .map(|pattern| compile_payload_regex(0, pattern))
                    .transpose()?,
                rssi_min: rssi_min.unwrap_or(bluescout_core::filter::DEFAULT_RSSI_MIN),
                rssi_max: rssi_max.unwrap_or(bluescout_core::filter::DEFAULT_RSSI_MAX),
                ..FilterRule::default()
            };
            validate_rssi_window(rule.rssi_min, rule.rssi_max)?;

            let id = store.add_filter(&rule).await?;
            println!("added filter rule {id}");
            Ok(())
        }
        FilterCommand::List => {
            let rules = store.list_filters().await?;
            if rules.is_empty() {
                println!("no filter rules");
                return Ok(());
            }
            println!(
                "{:>4} {:<8} {:<18} {:<14} {:>9} {:>9}  {}",
                "ID", "ENABLED", "MAC", "COMPANY", "RSSI_MIN", "RSSI_MAX", "NOTE"
            );
            for rule in rules {
                println!(
                    "{:>4} {:<8} {:<18} {:<14} {:>9} {:>9}  {}",
                    rule.id,
                    rule.is_enabled,
                    rule.mac_addr.as_deref().unwrap_or("-"),
                    rule.company_code
                        .map_or_else(|| "-".to_string(), |code| format!("0x{code:04X}")),
                    rule.rssi_min,
                    rule.rssi_max,
                    rule.note.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
    }
}

fn validate_rssi_window(rssi_min: i16, rssi_max: i16) -> anyhow::Result<()> {
    if !(-100..=0).contains(&rssi_min) || !(-100..=0).contains(&rssi_max) {
        bail!("RSSI bounds must lie in -100..=0 dBm");
    }
    if rssi_min > rssi_max {
        bail!("rssi-min ({rssi_min}) must not exceed rssi-max ({rssi_max})");
    }
    Ok(())
}

/// Parse a company code given as decimal or 0x-prefixed hex.
pub fn parse_company_code(input: &str) -> Result<u16, String> {
    let (digits, radix) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .map_or((input, 10), |hex| (hex, 16));
    u16::from_str_radix(digits, radix)
        .map_err(|err| format!("invalid company code '{input}': {err}"))
}
