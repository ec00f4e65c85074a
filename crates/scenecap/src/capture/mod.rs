//! Capture Pipeline: from instrumentation log text to registry entries.

pub mod extract;
pub mod pipeline;
pub mod session;

pub use extract::{find_latest_message, parse_line, MARKER};
pub use pipeline::{CaptureOutcome, CapturePipeline};
pub use session::{watch_and_capture, SessionOutcome, SessionReport};
