//! Replay captured commands over the LAN.

use super::error::HelpfulError;
use super::prompt::{Prompter, Selection};
use anyhow::Result;
use scenecap::config::Config;
use scenecap::lan;
use scenecap_registry::{CapturedCommand, Device};
use std::io::{BufRead, Write};
use std::time::Duration;

/// Pause between commands when replaying a whole device.
pub const SEND_ALL_PAUSE: Duration = Duration::from_secs(3);

/// Menu-driven replay.
pub fn run<R: BufRead, W: Write>(
    config: &Config,
    prompter: &mut Prompter<R, W>,
    rt: &tokio::runtime::Runtime,
) -> Result<()> {
    let devices: Vec<Device> = config
        .device_registry()
        .load_all(&config.command_registry())?
        .into_iter()
        .filter(|device| !device.commands.is_empty())
        .collect();
    if devices.is_empty() {
        writeln!(prompter.output(), "No captured commands yet; capture a scene first.")?;
        return Ok(());
    }

    let names: Vec<String> = devices
        .iter()
        .map(|d| format!("{} ({} command(s))", d.name, d.commands.len()))
        .collect();
    let Some(index) = prompter.select("Send to which device?", &names)? else {
        return Ok(());
    };
    let device = &devices[index];
    if device.ip.is_none() {
        writeln!(
            prompter.output(),
            "{} has no known LAN address; refresh IPs first.",
            device.name
        )?;
        return Ok(());
    }

    let commands: Vec<&CapturedCommand> = device.commands.values().collect();
    let keys: Vec<String> = commands.iter().map(|c| c.key.clone()).collect();
    let title = format!("Send which command to {}?", device.name);
    while let Some(selection) = prompter.select_or_all(&title, &keys, "all, one after another")? {
        let out = prompter.output();
        let sent = match selection {
            Selection::One(i) => send_one(device, commands[i], rt, out),
            Selection::All => send_all(device, &commands, rt, out),
        };
        if let Err(err) = sent {
            writeln!(prompter.output(), "Send failed: {:#}", err)?;
        }
    }
    writeln!(prompter.output(), "Done sending to {}.", device.name)?;
    Ok(())
}

/// Non-interactive replay: one named command, or every command of the device.
pub fn run_direct(
    config: &Config,
    device_name: &str,
    command: Option<&str>,
    rt: &tokio::runtime::Runtime,
) -> Result<()> {
    let devices = config
        .device_registry()
        .load_all(&config.command_registry())?;
    let device = devices
        .iter()
        .find(|d| {
            d.var == device_name
                || d.name.eq_ignore_ascii_case(device_name)
                || d.has_id(device_name)
        })
        .ok_or_else(|| HelpfulError::unknown_device(device_name))?;

    let mut out = std::io::stdout();
    match command {
        Some(key) => {
            let captured = device.commands.get(key).ok_or_else(|| {
                HelpfulError::new(format!("No captured command '{}' for {}", key, device.name))
                    .with_suggestions(device.commands.keys().map(|k| format!("TRY: {}", k)))
            })?;
            send_one(device, captured, rt, &mut out)
        }
        None => {
            let commands: Vec<&CapturedCommand> = device.commands.values().collect();
            send_all(device, &commands, rt, &mut out)
        }
    }
}

fn send_one(
    device: &Device,
    command: &CapturedCommand,
    rt: &tokio::runtime::Runtime,
    out: &mut impl Write,
) -> Result<()> {
    rt.block_on(lan::send_command(device, &command.fields))?;
    writeln!(out, "Sent '{}' to {}.", command.key, device.name)?;
    Ok(())
}

fn send_all(
    device: &Device,
    commands: &[&CapturedCommand],
    rt: &tokio::runtime::Runtime,
    out: &mut impl Write,
) -> Result<()> {
    for (i, command) in commands.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(SEND_ALL_PAUSE);
        }
        send_one(device, command, rt, out)?;
    }
    Ok(())
}
