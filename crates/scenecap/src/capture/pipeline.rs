use super::extract::find_latest_message;
use anyhow::{Context, Result};
use scenecap_registry::atomic::read_optional;
use scenecap_registry::{
    command_key, CommandRegistry, Device, DeviceRegistry, Scene, UpsertOutcome,
};
use std::path::{Path, PathBuf};

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A message was stored under `key`
    Captured { key: String, replaced: bool },
    /// Nothing new and complete in the log
    NoMatch,
}

/// Turns new capture-log text into registry entries.
///
/// Keeps a byte cursor into the log so each message is stored once. On a
/// match the cursor moves to the end of the scanned text; on no match it
/// moves past the last complete line, leaving a half-written tail for the
/// next attempt. A log shorter than the cursor was truncated and is read
/// from the start.
#[derive(Debug)]
pub struct CapturePipeline {
    devices: DeviceRegistry,
    commands: CommandRegistry,
    log_path: PathBuf,
    cursor: usize,
}

impl CapturePipeline {
    pub fn new(
        devices: DeviceRegistry,
        commands: CommandRegistry,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            devices,
            commands,
            log_path: log_path.into(),
            cursor: 0,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Only consider text appended from now on.
    pub fn arm(&mut self) {
        self.cursor = std::fs::metadata(&self.log_path)
            .map(|meta| meta.len() as usize)
            .unwrap_or(0);
        tracing::debug!("Capture cursor armed at {}", self.cursor);
    }

    /// Whether the log holds a complete message after the cursor. Reads
    /// without moving the cursor or touching the registries.
    pub fn has_pending_message(&self) -> Result<bool> {
        let contents = read_optional(&self.log_path)
            .with_context(|| format!("Failed to read {}", self.log_path.display()))?
            .unwrap_or_default();
        let start = if contents.is_char_boundary(self.cursor) {
            self.cursor
        } else {
            0
        };
        Ok(find_latest_message(&contents[start..]).is_some())
    }

    /// Store the newest complete message after the cursor for `device` and
    /// `scene`.
    pub fn extract_latest(
        &mut self,
        log_contents: &str,
        device: &Device,
        scene: &Scene,
    ) -> Result<CaptureOutcome> {
        if self.cursor > log_contents.len() || !log_contents.is_char_boundary(self.cursor) {
            tracing::info!("Capture log was truncated; rescanning from the start");
            self.cursor = 0;
        }
        let window = &log_contents[self.cursor..];

        let Some(fields) = find_latest_message(window) else {
            self.cursor += window.rfind('\n').map_or(0, |at| at + 1);
            tracing::info!("No complete control message in the new log text");
            return Ok(CaptureOutcome::NoMatch);
        };

        let key = command_key(&device.name, &scene.name, scene.value);
        let stored = self
            .commands
            .upsert_record(&key, Some(&device.id), &fields)
            .with_context(|| format!("Failed to store command '{}'", key))?;

        let var = self.device_var(device)?;
        self.devices
            .attach_command(&var, stored.key())
            .with_context(|| format!("Failed to link '{}' to device '{}'", stored.key(), var))?;

        self.cursor = log_contents.len();
        let replaced = matches!(stored, UpsertOutcome::Replaced(_));
        tracing::info!(
            "Captured '{}' for {} ({})",
            stored.key(),
            device.name,
            if replaced { "replaced" } else { "new" }
        );
        Ok(CaptureOutcome::Captured {
            key: stored.key().to_string(),
            replaced,
        })
    }

    /// [`extract_latest`](Self::extract_latest) over the capture log file.
    pub fn capture_from_file(&mut self, device: &Device, scene: &Scene) -> Result<CaptureOutcome> {
        let contents = read_optional(&self.log_path)
            .with_context(|| format!("Failed to read {}", self.log_path.display()))?;
        match contents {
            Some(text) => self.extract_latest(&text, device, scene),
            None => {
                tracing::warn!("Capture log {} does not exist", self.log_path.display());
                Ok(CaptureOutcome::NoMatch)
            }
        }
    }

    /// Registry variable of `device`, declaring it first if needed.
    fn device_var(&self, device: &Device) -> Result<String> {
        let declared = self
            .devices
            .declarations()?
            .into_iter()
            .find(|decl| device.has_id(&decl.id));
        match declared {
            Some(decl) => Ok(decl.var),
            None => Ok(self.devices.upsert_device(device)?),
        }
    }
}
