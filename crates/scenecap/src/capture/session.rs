//! One watched capture: wait for the log to grow until it holds a complete
//! control message, stop the instrumentation, then extract.
//!
//! Growth that only adds unrelated output keeps the wait going on what is
//! left of the timeout. The instrumentation keeps running through those
//! rounds and is always stopped before the extraction reads the log.

use super::pipeline::{CaptureOutcome, CapturePipeline};
use crate::instrument::{Instrumentation, TerminateOutcome};
use crate::watcher::{CancelSignal, LogWatcher, WatchOutcome};
use anyhow::Result;
use scenecap_registry::{Device, Scene};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

/// How a watched capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Captured { key: String, replaced: bool },
    /// The operator cancelled before a message arrived
    Cancelled,
    /// No complete message within the timeout
    TimedOut,
    /// A message was seen but was gone by extraction time
    Lost,
}

/// Outcome plus what the instrumentation was doing when it was stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Log growth events that held no complete message
    pub unrelated_growth: usize,
    /// Set when the instrumentation had exited on its own
    pub exited_early: Option<ExitStatus>,
}

/// Watch `pipeline`'s log until a complete message for `device`/`scene`
/// arrives, `timeout` runs out, or `cancel` fires. `instrumentation` is
/// stopped before this returns.
pub fn watch_and_capture<C: CancelSignal>(
    pipeline: &mut CapturePipeline,
    instrumentation: &mut Instrumentation,
    watcher: &LogWatcher,
    timeout: Duration,
    mut cancel: C,
    device: &Device,
    scene: &Scene,
) -> Result<SessionReport> {
    let deadline = Instant::now() + timeout;
    let mut baseline = watcher.size();
    let mut unrelated_growth = 0;

    let watched = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match watcher.wait_from(baseline, remaining, &mut cancel, |_| {}) {
            WatchOutcome::Detected { size } => {
                if pipeline.has_pending_message()? {
                    break WatchOutcome::Detected { size };
                }
                unrelated_growth += 1;
                tracing::debug!(
                    "Log grew to {} bytes without a control message; still watching",
                    size
                );
                baseline = size;
            }
            other => break other,
        }
    };

    let exited_early = match instrumentation.terminate() {
        Ok(TerminateOutcome::AlreadyExited(status)) => Some(status),
        Ok(TerminateOutcome::Stopped(_)) => None,
        Err(err) => {
            tracing::warn!("Failed to stop instrumentation: {:#}", err);
            None
        }
    };

    let outcome = match watched {
        WatchOutcome::Cancelled => SessionOutcome::Cancelled,
        WatchOutcome::TimedOut => SessionOutcome::TimedOut,
        WatchOutcome::Detected { .. } => match pipeline.capture_from_file(device, scene)? {
            CaptureOutcome::Captured { key, replaced } => {
                SessionOutcome::Captured { key, replaced }
            }
            CaptureOutcome::NoMatch => SessionOutcome::Lost,
        },
    };
    Ok(SessionReport {
        outcome,
        unrelated_growth,
        exited_early,
    })
}

