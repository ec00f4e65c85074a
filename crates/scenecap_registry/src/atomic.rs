//! Whole-file reads and atomic replaces.

use crate::error::{RegistryError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Replace `path` with `contents`.
///
/// The new contents are written and synced to a temp file in the same
/// directory, then renamed over the target, so readers see either the old
/// file or the new one.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| RegistryError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    tracing::debug!("Replaced {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Line terminator of a registry file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// The terminator of the first line; `Lf` for single-line text.
    pub(crate) fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(at) if text[..at].ends_with('\r') => Self::CrLf,
            _ => Self::Lf,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Join lines, ending with a terminator when non-empty.
    pub(crate) fn join(self, lines: &[String]) -> String {
        if lines.is_empty() {
            return String::new();
        }
        let mut text = lines.join(self.as_str());
        text.push_str(self.as_str());
        text
    }
}

/// Drop trailing blank lines.
pub(crate) fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_optional_missing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_optional(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn test_write_atomic_replaces_and_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("devices.registry");

        write_atomic(&path, "first\n").unwrap();
        write_atomic(&path, "second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files must not be left behind");
    }

    #[test]
    fn test_join_and_trim() {
        let mut lines = vec!["a".to_string(), "".to_string(), "  ".to_string()];
        trim_trailing_blank(&mut lines);
        assert_eq!(LineEnding::Lf.join(&lines), "a\n");
        assert_eq!(LineEnding::Lf.join(&[]), "");
    }

    #[test]
    fn test_line_ending_follows_first_line() {
        assert_eq!(LineEnding::detect("a\r\nb\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect("a\nb\r\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect("no newline"), LineEnding::Lf);

        let lines = vec!["a".to_string(), "b".to_string()];
        assert_eq!(LineEnding::CrLf.join(&lines), "a\r\nb\r\n");
    }
}
