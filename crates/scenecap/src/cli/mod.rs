//! Command-line interface for scenecap
//!
//! The interactive wizard plus one subcommand per menu action. Each action
//! is a plain function over [`Config`] so the wizard and the subcommands
//! share it.

pub mod capture;
pub mod error;
pub mod prompt;
pub mod send;
pub mod wizard;

use anyhow::{Context, Result};
use error::HelpfulError;
use prompt::Prompter;
use scenecap::config::{Config, API_KEY_COMMENT, API_KEY_VAR};
use scenecap::env_file::update_env_file;
use scenecap::sync::{self, SyncReport};
use std::io::{BufRead, Write};

/// Single-threaded runtime for the async collaborators.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")
}

/// The configured API key, or one asked for and saved to the env file.
pub fn ensure_api_key<R: BufRead, W: Write>(
    config: &mut Config,
    prompter: &mut Prompter<R, W>,
) -> Result<String> {
    if let Some(key) = &config.api_key {
        return Ok(key.clone());
    }

    writeln!(prompter.output(), "A Govee cloud API key is needed to list devices and scenes.")?;
    let key = prompter
        .read_line("API key (Enter to skip): ")?
        .filter(|key| !key.is_empty())
        .ok_or_else(|| HelpfulError::missing_api_key(&config.env_file))?;

    update_env_file(&config.env_file, API_KEY_VAR, &key, API_KEY_COMMENT)?;
    writeln!(prompter.output(), "Saved {} to {}", API_KEY_VAR, config.env_file.display())?;
    config.api_key = Some(key.clone());
    Ok(key)
}

/// Full sync with a printed summary.
pub fn run_sync(
    config: &Config,
    api_key: &str,
    rt: &tokio::runtime::Runtime,
) -> Result<SyncReport> {
    println!("Syncing devices and scenes...");
    let report = rt.block_on(sync::sync(config, api_key))?;
    print_sync_report(&report);
    Ok(report)
}

fn print_sync_report(report: &SyncReport) {
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    println!(
        "Synced {} device(s) and {} scene(s); {} answered on the LAN, {} linked to an address.",
        report.cloud_devices, report.scenes, report.lan_devices, report.linked
    );
}

pub fn run_refresh_ips(config: &Config, rt: &tokio::runtime::Runtime) -> Result<()> {
    println!("Scanning the LAN for devices...");
    let changed = rt.block_on(sync::refresh_ips(config))?;
    println!("Updated {} device address(es).", changed);
    Ok(())
}

pub fn run_refresh_commands(config: &Config) -> Result<()> {
    let linked = sync::refresh_command_associations(config)?;
    println!("Linked {} captured command(s) to devices.", linked);
    Ok(())
}

/// Effective configuration, one `name: value` line each.
pub fn print_config(config: &Config) {
    for (name, value) in config.describe() {
        println!("{:<20} {}", format!("{}:", name), value);
    }
}
