//! Domain model: devices, scenes, captured command payloads.

use crate::sanitize::{disambiguate, sanitize, scene_key};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

/// LAN UDP port devices accept control commands on.
pub const DEFAULT_COMMAND_PORT: u16 = 4003;

/// Variable used when a device name sanitizes to nothing.
const FALLBACK_DEVICE_VAR: &str = "device";

/// A named preset lighting effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Vendor-assigned numeric value
    pub value: i64,
    /// Display name
    pub name: String,
    /// Identifiers of the devices that offer this scene
    #[serde(default)]
    pub devices: BTreeSet<String>,
}

impl Scene {
    pub fn new(value: i64, name: impl Into<String>) -> Self {
        Self {
            value,
            name: name.into(),
            devices: BTreeSet::new(),
        }
    }

    /// Scene table key before collision handling.
    pub fn key(&self) -> String {
        scene_key(&self.name, self.value)
    }
}

/// A smart-lighting device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Opaque vendor identifier (globally unique)
    pub id: String,
    /// Display name
    pub name: String,
    /// Model code
    pub sku: String,
    /// LAN address, once discovery resolved it
    pub ip: Option<IpAddr>,
    /// Command port
    pub port: u16,
    /// Registry variable naming this device
    pub var: String,
    /// Scenes the device offers
    pub scenes: Vec<Scene>,
    /// Captured commands, keyed by command key
    pub commands: BTreeMap<String, CapturedCommand>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sku: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            var: device_var(&name),
            name,
            sku: sku.into(),
            ip: None,
            port: DEFAULT_COMMAND_PORT,
            scenes: Vec::new(),
            commands: BTreeMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_scenes(mut self, scenes: Vec<Scene>) -> Self {
        self.scenes = scenes;
        self
    }

    /// Case-insensitive identifier comparison (LAN responses and the cloud
    /// disagree on hex case).
    pub fn has_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}

/// Default registry variable for a device display name.
pub fn device_var(name: &str) -> String {
    let var = sanitize(name);
    if var.is_empty() {
        FALLBACK_DEVICE_VAR.to_string()
    } else {
        var
    }
}

/// The replayable part of a captured control message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandFields {
    /// Account-scoped topic
    pub topic: String,
    /// Command-type tag
    pub cmd: String,
    /// Transaction token
    pub transaction: String,
    /// Numeric message-type tag
    #[serde(rename = "type")]
    pub kind: i64,
    /// Write flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    /// Opaque encoded command fragments, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
}

impl CommandFields {
    /// Registry field lines in their fixed order.
    pub fn ordered(&self) -> Vec<(&'static str, Value)> {
        let mut fields = vec![
            ("topic", Value::String(self.topic.clone())),
            ("cmd", Value::String(self.cmd.clone())),
            ("transaction", Value::String(self.transaction.clone())),
            ("type", Value::from(self.kind)),
        ];
        if let Some(write) = self.write {
            fields.push(("write", Value::Bool(write)));
        }
        if let Some(command) = &self.command {
            fields.push((
                "command",
                Value::Array(command.iter().cloned().map(Value::String).collect()),
            ));
        }
        let extras = [
            ("color", &self.color),
            ("color_temp_kelvin", &self.color_temp_kelvin),
            ("value", &self.value),
            ("open", &self.open),
            ("version", &self.version),
        ];
        for (name, value) in extras {
            if let Some(value) = value {
                fields.push((name, value.clone()));
            }
        }
        fields
    }
}

/// A captured command as stored in the command registry.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedCommand {
    /// Registry key
    pub key: String,
    /// Identifier of the device the capture was taken for
    pub device_id: Option<String>,
    pub fields: CommandFields,
}

/// One deduplicated scene table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRecord {
    pub key: String,
    pub value: i64,
    pub name: String,
    /// Device identifiers offering this scene, in first-seen order
    pub devices: Vec<String>,
}

impl SceneRecord {
    pub fn to_scene(&self) -> Scene {
        Scene {
            value: self.value,
            name: self.name.clone(),
            devices: self.devices.iter().cloned().collect(),
        }
    }
}

/// Scene table keyed by (name, value), shared by every device that offers
/// the same scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneCatalog {
    records: Vec<SceneRecord>,
    /// device id -> scene keys, in the device's catalog order
    by_device: BTreeMap<String, Vec<String>>,
}

impl SceneCatalog {
    /// Deduplicate the scenes of `devices`.
    pub fn build(devices: &[Device]) -> Self {
        let mut catalog = Self::default();
        let mut index: HashMap<(String, i64), usize> = HashMap::new();

        for device in devices {
            for scene in &device.scenes {
                let identity = (scene.name.clone(), scene.value);
                let slot = match index.get(&identity).copied() {
                    Some(slot) => slot,
                    None => {
                        let key = disambiguate(&scene.key(), |candidate| {
                            !catalog.records.iter().any(|r| r.key == candidate)
                        });
                        catalog.records.push(SceneRecord {
                            key,
                            value: scene.value,
                            name: scene.name.clone(),
                            devices: Vec::new(),
                        });
                        index.insert(identity, catalog.records.len() - 1);
                        catalog.records.len() - 1
                    }
                };

                let record = &mut catalog.records[slot];
                if !record.devices.contains(&device.id) {
                    record.devices.push(device.id.clone());
                }
                let keys = catalog.by_device.entry(device.id.clone()).or_default();
                if !keys.contains(&record.key) {
                    keys.push(record.key.clone());
                }
            }
        }

        catalog
    }

    pub(crate) fn from_parts(
        records: Vec<SceneRecord>,
        by_device: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self { records, by_device }
    }

    pub fn records(&self) -> &[SceneRecord] {
        &self.records
    }

    pub fn get(&self, key: &str) -> Option<&SceneRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    /// Scene keys offered by a device.
    pub fn keys_for(&self, device_id: &str) -> &[String] {
        self.by_device
            .get(device_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
