//! Control-message extraction from instrumentation log lines.
//!
//! A candidate line carries free text, the marker `Message: `, then a JSON
//! object whose `msg` member holds `accountTopic`, `cmd`, `data`,
//! `transaction` and `type`.

use scenecap_registry::CommandFields;
use serde_json::{Map, Value};

/// Token preceding the JSON payload on a log line.
pub const MARKER: &str = "Message: ";

const REQUIRED: [&str; 5] = ["accountTopic", "cmd", "data", "transaction", "type"];

/// Decode one log line into replayable fields, if it is a complete message.
pub fn parse_line(line: &str) -> Option<CommandFields> {
    let start = line.find(MARKER)? + MARKER.len();
    let entry: Value = serde_json::from_str(line[start..].trim()).ok()?;
    let msg = entry.get("msg")?.as_object()?;
    if !REQUIRED.iter().all(|key| msg.contains_key(*key)) {
        return None;
    }

    let fields = CommandFields {
        topic: text(&msg["accountTopic"])?,
        cmd: text(&msg["cmd"])?,
        transaction: text(&msg["transaction"])?,
        kind: integer(&msg["type"])?,
        ..Default::default()
    };
    let data = msg["data"].as_object()?;
    Some(with_data(fields, data))
}

/// Copy the allow-listed members of the nested data object. Anything else
/// is dropped.
fn with_data(mut fields: CommandFields, data: &Map<String, Value>) -> CommandFields {
    for (name, value) in data {
        match name.as_str() {
            "write" => fields.write = value.as_bool(),
            "command" => {
                fields.command = value.as_array().map(|parts| {
                    parts
                        .iter()
                        .map(|part| match part {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
            }
            "color" => fields.color = Some(value.clone()),
            "colorTemInKelvin" => fields.color_temp_kelvin = Some(value.clone()),
            "val" => fields.value = Some(value.clone()),
            "open" => fields.open = Some(value.clone()),
            "version" => fields.version = Some(value.clone()),
            other => tracing::trace!("Dropping data member '{}'", other),
        }
    }
    fields
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The most recent complete message in `text`.
pub fn find_latest_message(text: &str) -> Option<CommandFields> {
    text.lines().rev().find_map(parse_line)
}
