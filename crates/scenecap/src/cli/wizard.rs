//! Interactive main menu.

use super::error::explain;
use super::prompt::Prompter;
use super::{
    capture, ensure_api_key, run_refresh_commands, run_refresh_ips, run_sync, runtime, send,
};
use anyhow::Result;
use scenecap::config::Config;
use scenecap_registry::RegistryError;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Sync,
    RefreshIps,
    Capture,
    RefreshCommands,
    Send,
}

const MENU: [(Action, &str); 5] = [
    (Action::Sync, "Sync devices and scenes from the cloud"),
    (Action::RefreshIps, "Refresh device IP addresses"),
    (Action::Capture, "Capture a scene command"),
    (Action::RefreshCommands, "Refresh command associations"),
    (Action::Send, "Send a captured command"),
];

/// Only a registry with no file and no template stops the wizard.
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RegistryError>()
        .map_or(false, RegistryError::is_missing_template)
}

pub fn run(mut config: Config) -> Result<()> {
    let rt = runtime()?;
    let mut prompter = Prompter::stdio();

    let first_run = config
        .device_registry()
        .load_all(&config.command_registry())
        .map_err(anyhow::Error::from)
        .map_err(explain)?
        .is_empty();
    if first_run {
        println!("No devices registered yet; running an initial sync.");
        let synced = ensure_api_key(&mut config, &mut prompter)
            .and_then(|key| run_sync(&config, &key, &rt).map(|_| ()));
        if let Err(err) = synced {
            report(err, &mut prompter)?;
        }
    }

    let labels: Vec<String> = MENU.iter().map(|(_, label)| label.to_string()).collect();
    loop {
        let Some(index) = prompter.select("scenecap", &labels)? else {
            println!("Bye.");
            return Ok(());
        };

        let result = match MENU[index].0 {
            Action::Sync => ensure_api_key(&mut config, &mut prompter)
                .and_then(|key| run_sync(&config, &key, &rt).map(|_| ())),
            Action::RefreshIps => run_refresh_ips(&config, &rt),
            Action::Capture => capture::run(&config, &mut prompter),
            Action::RefreshCommands => run_refresh_commands(&config),
            Action::Send => send::run(&config, &mut prompter, &rt),
        };

        if let Err(err) = result {
            tracing::warn!("{:?} failed: {:#}", MENU[index].0, err);
            report(err, &mut prompter)?;
        }
    }
}

/// Show a failed action and keep going, unless it is fatal.
fn report<R: BufRead, W: Write>(err: anyhow::Error, prompter: &mut Prompter<R, W>) -> Result<()> {
    if is_fatal(&err) {
        return Err(explain(err));
    }
    writeln!(prompter.output(), "{:#}", explain(err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_only_missing_template_is_fatal() {
        let missing: anyhow::Error = RegistryError::MissingTemplate {
            registry: PathBuf::from("registry/devices.registry"),
            template: PathBuf::from("templates/device_registry.template"),
        }
        .into();
        assert!(is_fatal(&missing.context("Failed to sync")));

        let malformed: anyhow::Error = RegistryError::malformed("k", "bad").into();
        assert!(!is_fatal(&malformed));
        assert!(!is_fatal(&anyhow::anyhow!("network down")));
    }
}
