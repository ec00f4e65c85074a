//! Log Watcher: waits for the capture log to grow.
//!
//! Two workers race on one channel: a size poller and a cancel poller. The
//! first message decides the outcome; both workers then see the stop flag
//! and are joined before [`LogWatcher::wait`] returns, so nothing fires
//! after teardown. The detection callback runs on the caller's thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The log grew to `size` bytes
    Detected { size: u64 },
    TimedOut,
    /// The operator cancelled
    Cancelled,
}

/// Operator cancellation source.
pub trait CancelSignal: Send {
    /// Block for at most `wait`; true once the operator has cancelled.
    fn poll_cancel(&mut self, wait: Duration) -> bool;
}

impl<C: CancelSignal + ?Sized> CancelSignal for &mut C {
    fn poll_cancel(&mut self, wait: Duration) -> bool {
        (**self).poll_cancel(wait)
    }
}

/// Never cancels.
#[derive(Debug, Default)]
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn poll_cancel(&mut self, wait: Duration) -> bool {
        thread::sleep(wait);
        false
    }
}

/// Cancels when a message arrives (or the sender goes away).
#[derive(Debug)]
pub struct ChannelCancel(pub mpsc::Receiver<()>);

impl CancelSignal for ChannelCancel {
    fn poll_cancel(&mut self, wait: Duration) -> bool {
        match self.0.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Cancels when the operator presses Enter.
#[derive(Debug, Default)]
pub struct StdinCancel;

#[cfg(unix)]
impl CancelSignal for StdinCancel {
    fn poll_cancel(&mut self, wait: Duration) -> bool {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = wait.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd for the duration of the call.
        let ready = unsafe { libc::poll(&mut fds, 1, millis) };
        if ready <= 0 || fds.revents & libc::POLLIN == 0 {
            return false;
        }
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        true
    }
}

#[cfg(not(unix))]
impl CancelSignal for StdinCancel {
    fn poll_cancel(&mut self, wait: Duration) -> bool {
        thread::sleep(wait);
        false
    }
}

/// Discard keystrokes typed while a wait was running.
#[cfg(unix)]
pub fn flush_pending_input() {
    // SAFETY: tcflush on the process's own stdin descriptor.
    unsafe {
        libc::tcflush(libc::STDIN_FILENO, libc::TCIFLUSH);
    }
}

#[cfg(not(unix))]
pub fn flush_pending_input() {}

enum Signal {
    Grew(u64),
    Cancelled,
}

/// Watches one log file for growth.
#[derive(Debug, Clone)]
pub struct LogWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl LogWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current log length; 0 when the file is missing.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Block until the log grows past its current size, `timeout` elapses,
    /// or `cancel` fires. `on_detected` runs only for a detection.
    pub fn wait<C, F>(&self, timeout: Duration, cancel: C, on_detected: F) -> WatchOutcome
    where
        C: CancelSignal,
        F: FnOnce(u64),
    {
        self.wait_from(self.size(), timeout, cancel, on_detected)
    }

    /// Like [`wait`](Self::wait), measuring growth against `baseline`. A log
    /// already larger than `baseline` is detected on the first poll.
    pub fn wait_from<C, F>(
        &self,
        baseline: u64,
        timeout: Duration,
        mut cancel: C,
        on_detected: F,
    ) -> WatchOutcome
    where
        C: CancelSignal,
        F: FnOnce(u64),
    {
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Signal>();
        tracing::debug!(
            "Watching {} from {} bytes for up to {:?}",
            self.path.display(),
            baseline,
            timeout
        );

        let outcome = thread::scope(|scope| {
            let size_tx = tx.clone();
            let stop_ref = &stop;
            scope.spawn(move || {
                while !stop_ref.load(Ordering::SeqCst) {
                    let size = self.size();
                    if size > baseline {
                        let _ = size_tx.send(Signal::Grew(size));
                        return;
                    }
                    thread::sleep(self.poll_interval);
                }
            });

            let cancel_tx = tx;
            let interval = self.poll_interval;
            scope.spawn(move || {
                while !stop_ref.load(Ordering::SeqCst) {
                    if cancel.poll_cancel(interval) {
                        let _ = cancel_tx.send(Signal::Cancelled);
                        return;
                    }
                }
            });

            let outcome = match rx.recv_timeout(timeout) {
                Ok(Signal::Grew(size)) => WatchOutcome::Detected { size },
                Ok(Signal::Cancelled) => WatchOutcome::Cancelled,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    WatchOutcome::TimedOut
                }
            };
            stop.store(true, Ordering::SeqCst);
            outcome
        });

        tracing::info!("Log watch finished: {:?}", outcome);
        if let WatchOutcome::Detected { size } = outcome {
            on_detected(size);
        }
        outcome
    }
}
