//! Line grammar shared by both registry files.
//!
//! String values are JSON string literals so display names containing quotes
//! or non-ASCII text round-trip unchanged.

use crate::model::SceneRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::net::IpAddr;

/// Association block listing a device's scene keys.
pub const SCENES_BLOCK: &str = "scenes";
/// Association block listing a device's captured command keys.
pub const COMMANDS_BLOCK: &str = "commands";
/// Export list block.
pub const EXPORT_BLOCK: &str = "export";

/// Indentation of block items and record fields.
pub const INDENT: &str = "    ";

const QUOTED: &str = r#""(?:[^"\\]|\\.)*""#;

static DEVICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^device\s+([A-Za-z0-9_]+)\s+id=({q})\s+name=({q})\s+sku=({q})(?:\s+ip=({q}))?\s*$",
        q = QUOTED
    ))
    .expect("device line regex")
});

static SCENE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^scene\s+([A-Za-z0-9_]+)\s+value=(-?\d+)\s+name=({q})\s+devices=(\[.*\])\s*$",
        q = QUOTED
    ))
    .expect("scene line regex")
});

static BLOCK_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^begin\s+([A-Za-z0-9_]+)(?:\s+([A-Za-z0-9_]+))?\s*$").expect("block start regex")
});

static BLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^end\s+([A-Za-z0-9_]+)\s*$").expect("block end regex"));

static BLOCK_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+([A-Za-z0-9_]+),?\s*$").expect("block item regex"));

static RECORD_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^record\s+([A-Za-z0-9_]+)(?:\s+device=({q}))?\s*$",
        q = QUOTED
    ))
    .expect("record start regex")
});

static RECORD_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+?)\s*$").expect("record field regex")
});

/// Encode a string as a JSON literal.
pub fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Decode a JSON string literal.
pub fn unquote(literal: &str) -> Option<String> {
    serde_json::from_str(literal).ok()
}

/// One `device` declaration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDecl {
    pub var: String,
    pub id: String,
    pub name: String,
    pub sku: String,
    pub ip: Option<IpAddr>,
}

impl DeviceDecl {
    /// Parse a declaration line. Lines that do not fit the shape (including
    /// an unparseable address) are not declarations.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = DEVICE_LINE.captures(line)?;
        let ip = match caps.get(5) {
            Some(m) => Some(unquote(m.as_str())?.parse().ok()?),
            None => None,
        };
        Some(Self {
            var: caps[1].to_string(),
            id: unquote(&caps[2])?,
            name: unquote(&caps[3])?,
            sku: unquote(&caps[4])?,
            ip,
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = format!(
            "device {} id={} name={} sku={}",
            self.var,
            quote(&self.id),
            quote(&self.name),
            quote(&self.sku)
        );
        if let Some(ip) = self.ip {
            line.push_str(&format!(" ip={}", quote(&ip.to_string())));
        }
        line
    }
}

/// Parse a scene table line.
pub fn parse_scene_line(line: &str) -> Option<SceneRecord> {
    let caps = SCENE_LINE.captures(line)?;
    Some(SceneRecord {
        key: caps[1].to_string(),
        value: caps[2].parse().ok()?,
        name: unquote(&caps[3])?,
        devices: serde_json::from_str(&caps[4]).ok()?,
    })
}

pub fn scene_line(record: &SceneRecord) -> String {
    format!(
        "scene {} value={} name={} devices={}",
        record.key,
        record.value,
        quote(&record.name),
        Value::from(record.devices.clone())
    )
}

/// A classified device registry line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line<'a> {
    Device(DeviceDecl),
    Scene(SceneRecord),
    BlockStart { kind: &'a str, owner: Option<&'a str> },
    BlockEnd { kind: &'a str },
    Other,
}

pub fn classify(line: &str) -> Line<'_> {
    if let Some(caps) = BLOCK_START.captures(line) {
        let kind = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return Line::BlockStart {
            kind,
            owner: caps.get(2).map(|m| m.as_str()),
        };
    }
    if let Some(caps) = BLOCK_END.captures(line) {
        return Line::BlockEnd {
            kind: caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        };
    }
    if let Some(decl) = DeviceDecl::parse(line) {
        return Line::Device(decl);
    }
    if let Some(scene) = parse_scene_line(line) {
        return Line::Scene(scene);
    }
    Line::Other
}

/// Item name on a block line (`    lamp_sunset_42`).
pub fn block_item(line: &str) -> Option<&str> {
    BLOCK_ITEM
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Render a delimited block.
pub fn format_block<I, S>(kind: &str, owner: Option<&str>, items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut lines = vec![match owner {
        Some(owner) => format!("begin {} {}", kind, owner),
        None => format!("begin {}", kind),
    }];
    lines.extend(
        items
            .into_iter()
            .map(|item| format!("{}{}", INDENT, item.as_ref())),
    );
    lines.push(format!("end {}", kind));
    lines
}

/// `record <key> [device="<id>"]` header.
pub fn parse_record_start(line: &str) -> Option<(String, Option<String>)> {
    let caps = RECORD_START.captures(line)?;
    let device = match caps.get(2) {
        Some(m) => Some(unquote(m.as_str())?),
        None => None,
    };
    Some((caps[1].to_string(), device))
}

pub fn record_start(key: &str, device_id: Option<&str>) -> String {
    match device_id {
        Some(id) => format!("record {} device={}", key, quote(id)),
        None => format!("record {}", key),
    }
}

/// `    name = <json>` field line.
pub fn parse_record_field(line: &str) -> Option<(&str, &str)> {
    let caps = RECORD_FIELD.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

pub fn is_record_end(line: &str) -> bool {
    matches!(classify(line), Line::BlockEnd { kind: "record" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_line_roundtrip_with_quotes() {
        let decl = DeviceDecl {
            var: "porch".into(),
            id: "AA:BB:CC".into(),
            name: "Porch \"Front\" Light".into(),
            sku: "H6001".into(),
            ip: Some("192.168.1.20".parse().unwrap()),
        };
        let line = decl.to_line();
        assert_eq!(DeviceDecl::parse(&line), Some(decl));
    }

    #[test]
    fn test_device_line_without_ip() {
        let line = r#"device lamp id="AA:BB" name="Lamp" sku="H6001""#;
        let decl = DeviceDecl::parse(line).unwrap();
        assert_eq!(decl.var, "lamp");
        assert_eq!(decl.ip, None);
    }

    #[test]
    fn test_device_line_bad_ip_is_not_a_declaration() {
        let line = r#"device lamp id="AA:BB" name="Lamp" sku="H6001" ip="not-an-ip""#;
        assert_eq!(DeviceDecl::parse(line), None);
        assert_eq!(classify(line), Line::Other);
    }

    #[test]
    fn test_classify_blocks() {
        assert_eq!(
            classify("begin commands lamp"),
            Line::BlockStart {
                kind: "commands",
                owner: Some("lamp")
            }
        );
        assert_eq!(
            classify("begin export"),
            Line::BlockStart {
                kind: "export",
                owner: None
            }
        );
        assert_eq!(classify("end scenes"), Line::BlockEnd { kind: "scenes" });
        assert_eq!(classify("# a comment"), Line::Other);
    }

    #[test]
    fn test_scene_line() {
        let record = SceneRecord {
            key: "sunset_42".into(),
            value: 42,
            name: "Sunset".into(),
            devices: vec!["AA:BB".into(), "CC:DD".into()],
        };
        let line = scene_line(&record);
        assert_eq!(
            line,
            r#"scene sunset_42 value=42 name="Sunset" devices=["AA:BB","CC:DD"]"#
        );
        assert_eq!(parse_scene_line(&line), Some(record));
    }

    #[test]
    fn test_record_lines() {
        assert_eq!(
            parse_record_start(r#"record lamp_sunset_42 device="AA:BB""#),
            Some(("lamp_sunset_42".to_string(), Some("AA:BB".to_string())))
        );
        assert_eq!(
            parse_record_start("record legacy"),
            Some(("legacy".to_string(), None))
        );
        assert_eq!(
            parse_record_field(r#"    topic = "GA/1""#),
            Some(("topic", r#""GA/1""#))
        );
        assert!(is_record_end("end record"));
        assert!(!is_record_end("end export"));
    }

    #[test]
    fn test_format_block() {
        let lines = format_block(COMMANDS_BLOCK, Some("lamp"), ["a", "b"]);
        assert_eq!(lines, vec!["begin commands lamp", "    a", "    b", "end commands"]);
    }
}
