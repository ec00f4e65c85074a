//! Interactive scene capture.
//!
//! Per attempt: start the instrumentation (which truncates the capture
//! log), arm the pipeline cursor, count down while its hooks load, then
//! watch until a complete message arrives. Unrelated log output does not
//! end the attempt. The instrumentation is stopped before extraction.

use super::error::HelpfulError;
use super::prompt::Prompter;
use anyhow::Result;
use scenecap::capture::{watch_and_capture, CapturePipeline, SessionOutcome};
use scenecap::config::Config;
use scenecap::instrument::Instrumentation;
use scenecap::watcher::{flush_pending_input, LogWatcher, StdinCancel};
use scenecap_registry::{Device, Scene};
use std::io::{BufRead, Write};
use std::time::Duration;

pub fn run<R: BufRead, W: Write>(config: &Config, prompter: &mut Prompter<R, W>) -> Result<()> {
    if config.instrument_cmd.is_none() {
        return Err(HelpfulError::no_instrument_cmd().into());
    }
    let devices = config.device_registry();
    let loaded = devices.load_all(&config.command_registry())?;
    if loaded.is_empty() {
        return Err(HelpfulError::no_devices(devices.path()).into());
    }

    let mut pipeline =
        CapturePipeline::new(devices, config.command_registry(), &config.capture_log);
    loop {
        let names: Vec<String> = loaded.iter().map(describe_device).collect();
        let Some(index) = prompter.select("Capture for which device?", &names)? else {
            return Ok(());
        };
        let device = &loaded[index];
        if device.scenes.is_empty() {
            writeln!(
                prompter.output(),
                "{} has no DIY scenes on record; run a sync first.",
                device.name
            )?;
            continue;
        }

        let scenes: Vec<String> = device
            .scenes
            .iter()
            .map(|scene| format!("{} ({})", scene.name, scene.value))
            .collect();
        let Some(index) = prompter.select("Which scene?", &scenes)? else {
            continue;
        };

        capture_once(config, &mut pipeline, device, &device.scenes[index], prompter)?;

        if !prompter.confirm("Capture another scene?")? {
            return Ok(());
        }
    }
}

fn describe_device(device: &Device) -> String {
    format!("{} [{}] {} scene(s)", device.name, device.sku, device.scenes.len())
}

fn capture_once<R: BufRead, W: Write>(
    config: &Config,
    pipeline: &mut CapturePipeline,
    device: &Device,
    scene: &Scene,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    let mut instrumentation = Instrumentation::start(config)?;
    pipeline.arm();

    let out = prompter.output();
    for remaining in (1..=config.instrument_delay.as_secs()).rev() {
        write!(out, "\rStarting capture in {}s... ", remaining)?;
        out.flush()?;
        std::thread::sleep(Duration::from_secs(1));
    }
    writeln!(out)?;
    writeln!(
        out,
        "Activate '{}' on '{}' in the vendor app now (Enter cancels, {}s timeout).",
        scene.name,
        device.name,
        config.capture_timeout.as_secs()
    )?;

    let watcher = LogWatcher::new(&config.capture_log);
    let report = watch_and_capture(
        pipeline,
        &mut instrumentation,
        &watcher,
        config.capture_timeout,
        StdinCancel,
        device,
        scene,
    );
    flush_pending_input();
    let report = report?;

    let out = prompter.output();
    if let Some(status) = report.exited_early {
        writeln!(out, "Instrumentation had already exited ({}).", status)?;
    }
    if report.unrelated_growth > 0 {
        writeln!(
            out,
            "Skipped {} burst(s) of unrelated log output.",
            report.unrelated_growth
        )?;
    }
    match report.outcome {
        SessionOutcome::Captured { key, replaced: false } => writeln!(out, "Captured '{}'.", key)?,
        SessionOutcome::Captured { key, replaced: true } => {
            writeln!(out, "Replaced the earlier capture '{}'.", key)?
        }
        SessionOutcome::Cancelled => writeln!(out, "Capture cancelled.")?,
        SessionOutcome::TimedOut => writeln!(
            out,
            "No control message in {} within {}s.",
            config.capture_log.display(),
            config.capture_timeout.as_secs()
        )?,
        SessionOutcome::Lost => writeln!(
            out,
            "The control message was no longer in the log at extraction; try again."
        )?,
    }
    Ok(())
}
