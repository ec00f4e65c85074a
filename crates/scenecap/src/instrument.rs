//! Instrumentation process control.
//!
//! The observer runs in its own process group with stdio discarded so it
//! cannot steal terminal input from the menu, and so terminating it also
//! takes down anything it forked.

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

/// Environment variable telling the observer where to append messages.
pub const CAPTURE_LOG_ENV: &str = "SCENECAP_CAPTURE_LOG";

/// How a terminate request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Stopped(ExitStatus),
    /// The process had exited before the signal
    AlreadyExited(ExitStatus),
}

/// A running instrumentation process.
#[derive(Debug)]
pub struct Instrumentation {
    child: Option<Child>,
}

impl Instrumentation {
    /// Start the configured observer command.
    pub fn start(config: &Config) -> Result<Self> {
        let command = config
            .instrument_cmd
            .as_deref()
            .context("No instrumentation command configured (SCENECAP_INSTRUMENT_CMD)")?;
        Self::spawn(command, &config.capture_log)
    }

    /// Truncate `log_path` and start `command` through `sh -c`.
    pub fn spawn(command: &str, log_path: &Path) -> Result<Self> {
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(log_path, "")
            .with_context(|| format!("Failed to truncate {}", log_path.display()))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env(CAPTURE_LOG_ENV, log_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start instrumentation '{}'", command))?;
        tracing::info!("Instrumentation started (pid {}): {}", child.id(), command);
        Ok(Self { child: Some(child) })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Signal the whole process group and wait for the leader to exit.
    pub fn terminate(&mut self) -> Result<TerminateOutcome> {
        let Some(mut child) = self.child.take() else {
            anyhow::bail!("Instrumentation was already terminated");
        };

        if let Some(status) = child.try_wait().context("Failed to poll instrumentation")? {
            tracing::info!("Instrumentation had already exited: {}", status);
            return Ok(TerminateOutcome::AlreadyExited(status));
        }

        if !signal_group(&mut child)? {
            let status = child.wait().context("Failed to reap instrumentation")?;
            tracing::info!("Instrumentation had already exited: {}", status);
            return Ok(TerminateOutcome::AlreadyExited(status));
        }

        let status = child.wait().context("Failed to wait for instrumentation")?;
        tracing::info!("Instrumentation stopped: {}", status);
        Ok(TerminateOutcome::Stopped(status))
    }
}

/// SIGTERM the child's group. False when the group no longer exists.
#[cfg(unix)]
fn signal_group(child: &mut Child) -> Result<bool> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: plain syscall on a group this process created.
    if unsafe { libc::killpg(pgid, libc::SIGTERM) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err).context("Failed to signal instrumentation process group")
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child) -> Result<bool> {
    match child.kill() {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(false),
        Err(err) => Err(err).context("Failed to stop instrumentation"),
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(err) = self.terminate() {
                tracing::warn!("Failed to stop instrumentation on drop: {:#}", err);
            }
        }
    }
}
