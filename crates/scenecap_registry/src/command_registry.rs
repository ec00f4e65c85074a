//! Command Registry store.
//!
//! One `record` block per captured command, sorted by key, followed by the
//! export list. The file is rebuilt on every upsert: template prologue,
//! record blocks (unchanged ones carried verbatim), export block.

use crate::atomic::{read_optional, trim_trailing_blank, write_atomic, LineEnding};
use crate::error::{RegistryError, Result};
use crate::model::{CapturedCommand, CommandFields};
use crate::sanitize::disambiguate;
use crate::syntax::{
    classify, format_block, is_record_end, parse_record_field, parse_record_start, record_start,
    Line, EXPORT_BLOCK, INDENT,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where an upsert landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New record under this key
    Inserted(String),
    /// Existing record for the same device overwritten in place
    Replaced(String),
}

impl UpsertOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Inserted(key) | Self::Replaced(key) => key,
        }
    }
}

/// A record block as it appears in the file.
#[derive(Debug, Clone, PartialEq)]
struct RecordBlock {
    device_id: Option<String>,
    lines: Vec<String>,
}

impl RecordBlock {
    fn render(key: &str, device_id: Option<&str>, fields: &CommandFields) -> Self {
        let mut lines = vec![record_start(key, device_id)];
        lines.extend(
            fields
                .ordered()
                .into_iter()
                .map(|(name, value)| format!("{}{} = {}", INDENT, name, value)),
        );
        lines.push("end record".to_string());
        Self {
            device_id: device_id.map(str::to_string),
            lines,
        }
    }

    fn same_device(&self, device_id: Option<&str>) -> bool {
        match (self.device_id.as_deref(), device_id) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }

    fn decode(&self, key: &str) -> Result<CapturedCommand> {
        let mut map = Map::new();
        for line in self.lines.iter().skip(1) {
            if is_record_end(line) {
                break;
            }
            if let Some((name, raw)) = parse_record_field(line) {
                let value: Value = serde_json::from_str(raw)
                    .map_err(|err| RegistryError::malformed(key, format!("{}: {}", name, err)))?;
                map.insert(name.to_string(), value);
            }
        }
        let fields: CommandFields = serde_json::from_value(Value::Object(map))
            .map_err(|err| RegistryError::malformed(key, err.to_string()))?;
        Ok(CapturedCommand {
            key: key.to_string(),
            device_id: self.device_id.clone(),
            fields,
        })
    }
}

/// Parsed command registry text.
#[derive(Debug, Default)]
struct ParsedCommands {
    prologue: Vec<String>,
    records: BTreeMap<String, RecordBlock>,
    ending: LineEnding,
}

impl ParsedCommands {
    fn parse(text: &str) -> Self {
        let mut parsed = Self {
            ending: LineEnding::detect(text),
            ..Self::default()
        };
        let mut seen_body = false;
        let mut open: Option<(String, RecordBlock)> = None;

        for line in text.lines() {
            if let Some((key, mut block)) = open.take() {
                block.lines.push(line.to_string());
                if is_record_end(line) {
                    parsed.insert(key, block);
                } else {
                    open = Some((key, block));
                }
                continue;
            }

            if let Some((key, device_id)) = parse_record_start(line) {
                seen_body = true;
                open = Some((
                    key,
                    RecordBlock {
                        device_id,
                        lines: vec![line.to_string()],
                    },
                ));
                continue;
            }

            match classify(line) {
                Line::BlockStart {
                    kind: EXPORT_BLOCK, ..
                } => seen_body = true,
                _ if !seen_body => parsed.prologue.push(line.to_string()),
                _ => {}
            }
        }

        if let Some((key, mut block)) = open {
            tracing::warn!("Record '{}' has no end marker; closing it", key);
            block.lines.push("end record".to_string());
            parsed.insert(key, block);
        }
        parsed
    }

    fn insert(&mut self, key: String, block: RecordBlock) {
        if self.records.insert(key.clone(), block).is_some() {
            tracing::warn!("Duplicate record '{}'; keeping the last one", key);
        }
    }

    fn render(&self) -> String {
        let mut out = self.prologue.clone();
        trim_trailing_blank(&mut out);
        for block in self.records.values() {
            if !out.is_empty() {
                out.push(String::new());
            }
            out.extend(block.lines.iter().cloned());
        }
        if !out.is_empty() {
            out.push(String::new());
        }
        out.extend(format_block(EXPORT_BLOCK, None, self.records.keys()));
        self.ending.join(&out)
    }
}

/// Insert or replace the record for `key`, returning the new text.
///
/// `prologue_source` supplies the leading comment block (normally the
/// template). A key held by a different device moves to the first free or
/// same-device `_N` suffix.
pub fn apply_upsert_record(
    text: &str,
    prologue_source: Option<&str>,
    key: &str,
    device_id: Option<&str>,
    fields: &CommandFields,
) -> (String, UpsertOutcome) {
    let mut parsed = ParsedCommands::parse(text);
    if let Some(source) = prologue_source {
        parsed.prologue = ParsedCommands::parse(source).prologue;
    }

    let final_key = disambiguate(key, |candidate| {
        parsed
            .records
            .get(candidate)
            .map_or(true, |block| block.same_device(device_id))
    });
    if final_key != key {
        tracing::info!(
            "Command key '{}' belongs to another device; storing as '{}'",
            key,
            final_key
        );
    }

    let block = RecordBlock::render(&final_key, device_id, fields);
    let outcome = match parsed.records.insert(final_key.clone(), block) {
        Some(_) => UpsertOutcome::Replaced(final_key),
        None => UpsertOutcome::Inserted(final_key),
    };
    (parsed.render(), outcome)
}

/// Decode every record; malformed ones are skipped with a warning.
pub fn parse_records(text: &str) -> Vec<CapturedCommand> {
    ParsedCommands::parse(text)
        .records
        .iter()
        .filter_map(|(key, block)| match block.decode(key) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("Skipping record: {}", err);
                None
            }
        })
        .collect()
}

/// The command registry file plus the template it is seeded from.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    path: PathBuf,
    template: PathBuf,
}

impl CommandRegistry {
    pub fn new(path: impl Into<PathBuf>, template: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or overwrite a captured command.
    ///
    /// Fails with [`RegistryError::MissingTemplate`] when neither the
    /// registry nor its template exists.
    pub fn upsert_record(
        &self,
        key: &str,
        device_id: Option<&str>,
        fields: &CommandFields,
    ) -> Result<UpsertOutcome> {
        let existing = read_optional(&self.path)?;
        let template = read_optional(&self.template)?;
        let text = match (&existing, &template) {
            (Some(text), _) => text.as_str(),
            (None, Some(template)) => {
                tracing::info!(
                    "Seeding {} from template {}",
                    self.path.display(),
                    self.template.display()
                );
                template.as_str()
            }
            (None, None) => {
                return Err(RegistryError::MissingTemplate {
                    registry: self.path.clone(),
                    template: self.template.clone(),
                })
            }
        };

        let (updated, outcome) =
            apply_upsert_record(text, template.as_deref(), key, device_id, fields);
        if existing.as_deref() == Some(updated.as_str()) {
            tracing::debug!("{} unchanged", self.path.display());
        } else {
            write_atomic(&self.path, &updated)?;
        }
        tracing::info!("Stored command '{}'", outcome.key());
        Ok(outcome)
    }

    /// Every decodable record, sorted by key. A missing file has none.
    pub fn records(&self) -> Result<Vec<CapturedCommand>> {
        let text = read_optional(&self.path)?.unwrap_or_default();
        Ok(parse_records(&text))
    }

    pub fn get(&self, key: &str) -> Result<Option<CapturedCommand>> {
        Ok(self.records()?.into_iter().find(|record| record.key == key))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let text = read_optional(&self.path)?.unwrap_or_default();
        Ok(ParsedCommands::parse(&text).records.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "# captured commands\n\nbegin export\nend export\n";

    fn fields(transaction: &str) -> CommandFields {
        CommandFields {
            topic: "GA/abc".into(),
            cmd: "ptReal".into(),
            transaction: transaction.into(),
            kind: 1,
            write: Some(false),
            command: Some(vec!["owABAQ==".into(), "owH/".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_into_template() {
        let (text, outcome) = apply_upsert_record(
            TEMPLATE,
            Some(TEMPLATE),
            "lamp_sunset_42",
            Some("AA:BB"),
            &fields("v_1"),
        );
        assert_eq!(outcome, UpsertOutcome::Inserted("lamp_sunset_42".into()));
        assert_eq!(
            text,
            concat!(
                "# captured commands\n",
                "\n",
                "record lamp_sunset_42 device=\"AA:BB\"\n",
                "    topic = \"GA/abc\"\n",
                "    cmd = \"ptReal\"\n",
                "    transaction = \"v_1\"\n",
                "    type = 1\n",
                "    write = false\n",
                "    command = [\"owABAQ==\",\"owH/\"]\n",
                "end record\n",
                "\n",
                "begin export\n",
                "    lamp_sunset_42\n",
                "end export\n",
            )
        );
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (once, _) = apply_upsert_record(TEMPLATE, Some(TEMPLATE), "k", None, &fields("v_1"));
        let (twice, outcome) =
            apply_upsert_record(&once, Some(TEMPLATE), "k", None, &fields("v_1"));
        assert_eq!(once, twice);
        assert_eq!(outcome, UpsertOutcome::Replaced("k".into()));
    }

    #[test]
    fn test_upsert_keeps_crlf_endings() {
        let (lf, _) = apply_upsert_record(TEMPLATE, Some(TEMPLATE), "k", None, &fields("v_1"));
        let crlf = lf.replace('\n', "\r\n");

        let (out, _) = apply_upsert_record(&crlf, Some(TEMPLATE), "k", None, &fields("v_1"));
        assert_eq!(out, crlf);
        assert_eq!(parse_records(&out)[0].fields, fields("v_1"));
    }

    #[test]
    fn test_records_sorted_and_recapture_overwrites() {
        let (text, _) = apply_upsert_record(TEMPLATE, None, "b_1", Some("X"), &fields("v_1"));
        let (text, _) = apply_upsert_record(&text, None, "a_1", Some("X"), &fields("v_2"));
        let (text, outcome) = apply_upsert_record(&text, None, "b_1", Some("x"), &fields("v_3"));
        assert_eq!(outcome.key(), "b_1");

        let records = parse_records(&text);
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a_1", "b_1"]);
        assert_eq!(records[1].fields.transaction, "v_3");
        assert!(text.ends_with("begin export\n    a_1\n    b_1\nend export\n"));
    }

    #[test]
    fn test_collision_with_other_device_gets_suffix() {
        let (text, _) =
            apply_upsert_record(TEMPLATE, None, "lamp_sunset_42", Some("AA"), &fields("v_1"));
        let (text, outcome) =
            apply_upsert_record(&text, None, "lamp_sunset_42", Some("BB"), &fields("v_2"));
        assert_eq!(outcome, UpsertOutcome::Inserted("lamp_sunset_42_2".into()));

        let (_, again) =
            apply_upsert_record(&text, None, "lamp_sunset_42", Some("BB"), &fields("v_3"));
        assert_eq!(again, UpsertOutcome::Replaced("lamp_sunset_42_2".into()));
    }

    #[test]
    fn test_extras_roundtrip_and_malformed_skipped() {
        let mut with_extras = fields("v_1");
        with_extras.color_temp_kelvin = Some(Value::from(2700));
        with_extras.open = Some(Value::from(1));
        let (text, _) = apply_upsert_record(TEMPLATE, None, "good", None, &with_extras);
        let text = text.replace(
            "begin export",
            "record broken\n    topic = not json\nend record\n\nbegin export",
        );

        let records = parse_records(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields, with_extras);
    }
}
