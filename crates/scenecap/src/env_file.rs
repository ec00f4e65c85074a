//! `.env` file reading and in-place key updates.
//!
//! Reading goes through `dotenvy`. Writes keep every other line as it was
//! and always use the `KEY="value"  # comment` form.

use anyhow::{Context, Result};
use scenecap_registry::atomic::{read_optional, write_atomic};
use std::collections::HashMap;
use std::path::Path;

/// Read a `.env` file; a missing file has no entries. Later assignments win.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }

    tracing::debug!("Loading {}", path.display());
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    for item in iter {
        match item {
            Ok((key, value)) => {
                vars.insert(key, value);
            }
            Err(err) => tracing::warn!("Skipping line in {}: {}", path.display(), err),
        }
    }
    Ok(vars)
}

/// Key and trailing comment of an assignment line.
fn split_assignment(line: &str) -> Option<(&str, Option<&str>)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, rest) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let rest = rest.trim_start();
    let tail = match rest.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let mut escaped = false;
            let close = rest.char_indices().skip(1).find(|&(_, ch)| {
                let hit = !escaped && ch == quote;
                escaped = !escaped && ch == '\\' && quote == '"';
                hit
            });
            close.map_or("", |(at, _)| &rest[at + 1..])
        }
        _ => rest.find(" #").map_or("", |at| &rest[at..]),
    };

    let comment = tail
        .trim_start()
        .strip_prefix('#')
        .map(str::trim)
        .filter(|c| !c.is_empty());
    Some((key, comment))
}

fn format_assignment(key: &str, value: &str, comment: Option<&str>) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    match comment {
        Some(comment) => format!("{}=\"{}\"  # {}", key, escaped, comment),
        None => format!("{}=\"{}\"", key, escaped),
    }
}

/// Set `key` to `value`, keeping the line's existing trailing comment (or
/// using `comment` when it has none). Absent keys are appended.
pub fn update_env_text(text: &str, key: &str, value: &str, comment: &str) -> String {
    let fallback = Some(comment).filter(|c| !c.is_empty());
    let mut updated = false;
    let mut lines: Vec<String> = text
        .lines()
        .map(|line| match split_assignment(line) {
            Some((found, existing)) if found == key => {
                updated = true;
                format_assignment(key, value, existing.or(fallback))
            }
            _ => line.to_string(),
        })
        .collect();

    if !updated {
        lines.push(format_assignment(key, value, fallback));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// [`update_env_text`] applied to a file.
pub fn update_env_file(path: &Path, key: &str, value: &str, comment: &str) -> Result<()> {
    let text = read_optional(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .unwrap_or_default();
    write_atomic(path, &update_env_text(&text, key, value, comment))
        .with_context(|| format!("Failed to update {}", path.display()))?;
    tracing::info!("Saved {} to {}", key, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_env_file_forms() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# header\nA=\"one\"  # note\nexport B=two # trailing\nC='three'\nD=\"has \\\"quote\\\"\"\n",
        )
        .unwrap();

        let env = read_env_file(&path).unwrap();
        assert_eq!(env["A"], "one");
        assert_eq!(env["B"], "two");
        assert_eq!(env["C"], "three");
        assert_eq!(env["D"], "has \"quote\"");
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_read_missing_env_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_env_file(&dir.path().join(".env")).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_comment_after_escaped_quote() {
        let text = "KEY=\"a \\\"b\\\"\"  # kept\n";
        assert_eq!(update_env_text(text, "KEY", "c", "new"), "KEY=\"c\"  # kept\n");
    }

    #[test]
    fn test_update_preserves_existing_comment() {
        let text = "# keys\nGOVEE_API_KEY=\"old\"  # from the developer portal\nOTHER=1\n";
        let out = update_env_text(text, "GOVEE_API_KEY", "new", "ignored");
        assert_eq!(
            out,
            "# keys\nGOVEE_API_KEY=\"new\"  # from the developer portal\nOTHER=1\n"
        );
    }

    #[test]
    fn test_update_uses_supplied_comment_when_none() {
        let out = update_env_text("GOVEE_API_KEY=old\n", "GOVEE_API_KEY", "new", "api key");
        assert_eq!(out, "GOVEE_API_KEY=\"new\"  # api key\n");
    }

    #[test]
    fn test_update_appends_absent_key() {
        let out = update_env_text("A=\"1\"\n", "B", "2", "");
        assert_eq!(out, "A=\"1\"\nB=\"2\"\n");
        assert_eq!(update_env_text("", "B", "2", "c"), "B=\"2\"  # c\n");
    }

    #[test]
    fn test_update_does_not_touch_prefixed_keys() {
        let out = update_env_text("KEY_EXTRA=\"x\"\n", "KEY", "y", "");
        assert_eq!(out, "KEY_EXTRA=\"x\"\nKEY=\"y\"\n");
    }
}
