//! Line-oriented refresh-in-place.
//!
//! The rewriter walks a registry file line by line. In `Scanning` state every
//! line is handed to the policy, which usually echoes it. A block start the
//! policy tracks switches to `InsideBlock`, where lines are dropped until the
//! matching end marker; the policy may then emit a replacement before
//! scanning resumes. Anything the policy does not recognize passes through,
//! so comments and hand edits survive a refresh. Output keeps the input's
//! line ending.

use crate::atomic::LineEnding;
use crate::syntax::{classify, Line};

/// Rewriter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Scanning,
    /// Dropping the lines of a tracked block
    InsideBlock {
        kind: String,
        owner: Option<String>,
        /// Original lines, restored if the block never ends
        dropped: Vec<String>,
    },
}

/// Decides what a rewrite keeps, drops and regenerates.
pub trait RewritePolicy {
    /// Whether the block `kind`/`owner` is dropped and regenerated.
    fn tracks(&self, kind: &str, owner: Option<&str>) -> bool;

    /// A line outside any tracked block.
    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        out.push(line.to_string());
    }

    /// A tracked block just ended.
    fn on_block_end(&mut self, _kind: &str, _owner: Option<&str>, _out: &mut Vec<String>) {}

    /// End of input.
    fn finish(&mut self, _out: &mut Vec<String>) {}
}

/// Run `policy` over `text`.
pub fn rewrite<P: RewritePolicy + ?Sized>(text: &str, policy: &mut P) -> String {
    let ending = LineEnding::detect(text);
    let mut out = Vec::new();
    let mut state = ScanState::Scanning;

    for line in text.lines() {
        state = match state {
            ScanState::Scanning => match classify(line) {
                Line::BlockStart { kind, owner } if policy.tracks(kind, owner) => {
                    ScanState::InsideBlock {
                        kind: kind.to_string(),
                        owner: owner.map(str::to_string),
                        dropped: vec![line.to_string()],
                    }
                }
                _ => {
                    policy.on_line(line, &mut out);
                    ScanState::Scanning
                }
            },
            ScanState::InsideBlock {
                kind,
                owner,
                mut dropped,
            } => match classify(line) {
                Line::BlockEnd { kind: end } if end == kind => {
                    policy.on_block_end(&kind, owner.as_deref(), &mut out);
                    ScanState::Scanning
                }
                _ => {
                    dropped.push(line.to_string());
                    ScanState::InsideBlock {
                        kind,
                        owner,
                        dropped,
                    }
                }
            },
        };
    }

    if let ScanState::InsideBlock { kind, dropped, .. } = state {
        tracing::warn!(
            "Unterminated '{}' block; keeping its {} lines unchanged",
            kind,
            dropped.len()
        );
        out.extend(dropped);
    }

    policy.finish(&mut out);
    ending.join(&out)
}
