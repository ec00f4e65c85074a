//! Device Registry store.
//!
//! Holds one `device` declaration per device, the deduplicated scene table
//! and, per device, a `scenes` and a `commands` association block. Every
//! mutation is a line-oriented rewrite driven by [`RegistryRefresh`]; the
//! pure `apply_*` functions do the text work and [`DeviceRegistry`] wraps
//! them with file reads and atomic replaces.

use crate::atomic::{read_optional, trim_trailing_blank, write_atomic};
use crate::command_registry::CommandRegistry;
use crate::error::{RegistryError, Result};
use crate::model::{device_var, CapturedCommand, Device, SceneCatalog, SceneRecord};
use crate::rewrite::{rewrite, RewritePolicy};
use crate::sanitize::disambiguate;
use crate::syntax::{
    block_item, classify, format_block, scene_line, Line, COMMANDS_BLOCK, EXPORT_BLOCK,
    SCENES_BLOCK,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub use crate::syntax::DeviceDecl;

/// Device variable -> association keys.
pub type Associations = BTreeMap<String, Vec<String>>;

/// Everything a read of the device registry yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRegistry {
    pub declarations: Vec<DeviceDecl>,
    pub scenes: Vec<SceneRecord>,
    /// `scenes` blocks by owner variable
    pub scene_blocks: Associations,
    /// `commands` blocks by owner variable
    pub command_blocks: Associations,
}

impl ParsedRegistry {
    pub fn parse(text: &str) -> Self {
        let mut parsed = Self::default();
        let mut open: Option<(String, String, Vec<String>)> = None;

        for line in text.lines() {
            if let Some((kind, owner, mut items)) = open.take() {
                match classify(line) {
                    Line::BlockEnd { kind: end } if end == kind => {
                        parsed.store_block(&kind, owner, items);
                    }
                    _ => {
                        items.extend(block_item(line).map(str::to_string));
                        open = Some((kind, owner, items));
                    }
                }
                continue;
            }

            match classify(line) {
                Line::Device(decl) => parsed.declarations.push(decl),
                Line::Scene(record) => parsed.scenes.push(record),
                Line::BlockStart {
                    kind,
                    owner: Some(owner),
                } if kind == SCENES_BLOCK || kind == COMMANDS_BLOCK => {
                    open = Some((kind.to_string(), owner.to_string(), Vec::new()));
                }
                _ => {}
            }
        }

        if let Some((kind, owner, items)) = open {
            tracing::warn!("Unterminated '{}' block for {}", kind, owner);
            parsed.store_block(&kind, owner, items);
        }
        parsed
    }

    fn store_block(&mut self, kind: &str, owner: String, items: Vec<String>) {
        let target = if kind == SCENES_BLOCK {
            &mut self.scene_blocks
        } else {
            &mut self.command_blocks
        };
        target.entry(owner).or_default().extend(items);
    }

    pub fn declaration_for_id(&self, id: &str) -> Option<&DeviceDecl> {
        self.declarations
            .iter()
            .find(|decl| decl.id.eq_ignore_ascii_case(id))
    }

    /// Scene table plus device id -> scene keys.
    pub fn scene_catalog(&self) -> SceneCatalog {
        let by_device = self
            .declarations
            .iter()
            .filter_map(|decl| {
                self.scene_blocks
                    .get(&decl.var)
                    .map(|keys| (decl.id.clone(), keys.clone()))
            })
            .collect();
        SceneCatalog::from_parts(self.scenes.clone(), by_device)
    }
}

/// Regenerated scene table and `scenes` blocks.
#[derive(Debug, Clone, Default)]
struct SceneRewrite {
    table: Vec<SceneRecord>,
    blocks: Associations,
}

/// The single rewrite policy behind every device registry mutation.
#[derive(Debug, Default)]
struct RegistryRefresh {
    /// Replacement declarations by lowercase device id
    replace: HashMap<String, DeviceDecl>,
    /// New declarations, written after the existing content
    append: Vec<DeviceDecl>,
    /// Regenerated `commands` blocks; `None` leaves existing ones alone
    commands: Option<Associations>,
    /// Regenerated scene table and `scenes` blocks
    scenes: Option<SceneRewrite>,
    regenerate_export: bool,

    // Pass state
    table_emitted: bool,
    /// Owner whose `scenes` block waits for its `commands` block to pass
    pending_scenes: Option<String>,
    inside_pending_commands: bool,
    exported: Vec<String>,
}

impl RegistryRefresh {
    fn emit_table(&mut self, out: &mut Vec<String>) {
        if self.table_emitted {
            return;
        }
        if let Some(scenes) = &self.scenes {
            out.extend(scenes.table.iter().map(scene_line));
        }
        self.table_emitted = true;
    }

    fn flush_pending_scenes(&mut self, out: &mut Vec<String>) {
        let Some(owner) = self.pending_scenes.take() else {
            return;
        };
        self.inside_pending_commands = false;
        if let Some(keys) = self
            .scenes
            .as_ref()
            .and_then(|scenes| scenes.blocks.get(&owner))
        {
            out.extend(format_block(SCENES_BLOCK, Some(owner.as_str()), keys));
        }
    }

    /// A declaration line followed by whatever blocks are regenerated for it.
    fn emit_declaration(&mut self, decl: DeviceDecl, line: String, out: &mut Vec<String>) {
        self.flush_pending_scenes(out);
        out.push(line);

        if let Some(keys) = self
            .commands
            .as_ref()
            .and_then(|commands| commands.get(&decl.var))
            .filter(|keys| !keys.is_empty())
        {
            let sorted: BTreeSet<&String> = keys.iter().collect();
            out.extend(format_block(COMMANDS_BLOCK, Some(decl.var.as_str()), sorted));
        }
        if self
            .scenes
            .as_ref()
            .is_some_and(|scenes| scenes.blocks.contains_key(&decl.var))
        {
            self.pending_scenes = Some(decl.var.clone());
            if self.commands.is_some() {
                // Our own commands block was just written
                self.flush_pending_scenes(out);
            }
        }
        self.exported.push(decl.var);
    }
}

impl RewritePolicy for RegistryRefresh {
    fn tracks(&self, kind: &str, _owner: Option<&str>) -> bool {
        (kind == EXPORT_BLOCK && self.regenerate_export)
            || (kind == COMMANDS_BLOCK && self.commands.is_some())
            || (kind == SCENES_BLOCK && self.scenes.is_some())
    }

    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if let Some(owner) = self.pending_scenes.clone() {
            match classify(line) {
                Line::BlockStart {
                    kind: COMMANDS_BLOCK,
                    owner: Some(o),
                } if o == owner => {
                    self.inside_pending_commands = true;
                    out.push(line.to_string());
                    return;
                }
                Line::BlockEnd {
                    kind: COMMANDS_BLOCK,
                } if self.inside_pending_commands => {
                    out.push(line.to_string());
                    self.flush_pending_scenes(out);
                    return;
                }
                _ if self.inside_pending_commands => {
                    out.push(line.to_string());
                    return;
                }
                _ => self.flush_pending_scenes(out),
            }
        }

        match classify(line) {
            Line::Scene(_) if self.scenes.is_some() => {}
            Line::Device(decl) => {
                self.emit_table(out);
                // Only replaced declarations are re-rendered
                match self.replace.get(&decl.id.to_ascii_lowercase()).cloned() {
                    Some(fresh) => {
                        let rendered = fresh.to_line();
                        self.emit_declaration(fresh, rendered, out);
                    }
                    None => self.emit_declaration(decl, line.to_string(), out),
                }
            }
            _ => out.push(line.to_string()),
        }
    }

    fn finish(&mut self, out: &mut Vec<String>) {
        self.flush_pending_scenes(out);

        let needs_table = !self.table_emitted
            && self
                .scenes
                .as_ref()
                .is_some_and(|scenes| !scenes.table.is_empty());
        let appended = std::mem::take(&mut self.append);
        if needs_table || !appended.is_empty() {
            trim_trailing_blank(out);
            if !out.is_empty() {
                out.push(String::new());
            }
            self.emit_table(out);
            for decl in appended {
                let rendered = decl.to_line();
                self.emit_declaration(decl, rendered, out);
            }
            self.flush_pending_scenes(out);
        }

        if self.regenerate_export {
            trim_trailing_blank(out);
            if !out.is_empty() {
                out.push(String::new());
            }
            out.extend(format_block(EXPORT_BLOCK, None, &self.exported));
        }
    }
}

/// Plan declarations for `devices`: replacements for known ids, appended
/// declarations (with collision-free variables) for new ones.
fn plan_declarations(
    existing: &[DeviceDecl],
    devices: &[Device],
) -> (HashMap<String, DeviceDecl>, Vec<DeviceDecl>) {
    let mut replace: HashMap<String, DeviceDecl> = HashMap::new();
    let mut append: Vec<DeviceDecl> = Vec::new();

    for device in devices {
        if let Some(old) = existing.iter().find(|decl| device.has_id(&decl.id)) {
            let fresh = DeviceDecl {
                var: old.var.clone(),
                id: device.id.clone(),
                name: device.name.clone(),
                sku: device.sku.clone(),
                ip: device.ip.or(old.ip),
            };
            if fresh != *old {
                replace.insert(old.id.to_ascii_lowercase(), fresh);
            }
            continue;
        }

        if let Some(pending) = append.iter_mut().find(|decl| device.has_id(&decl.id)) {
            pending.name = device.name.clone();
            pending.sku = device.sku.clone();
            pending.ip = device.ip.or(pending.ip);
            continue;
        }

        let var = disambiguate(&device_var(&device.name), |candidate| {
            !existing.iter().any(|decl| decl.var == candidate)
                && !append.iter().any(|decl| decl.var == candidate)
        });
        if var != device_var(&device.name) {
            tracing::info!(
                "Device variable '{}' already taken; using '{}' for {}",
                device_var(&device.name),
                var,
                device.id
            );
        }
        append.push(DeviceDecl {
            var,
            id: device.id.clone(),
            name: device.name.clone(),
            sku: device.sku.clone(),
            ip: device.ip,
        });
    }

    (replace, append)
}

/// Write or confirm declarations for `devices`, regenerating the export list.
pub fn apply_upsert(text: &str, devices: &[Device]) -> String {
    let parsed = ParsedRegistry::parse(text);
    let (replace, append) = plan_declarations(&parsed.declarations, devices);
    let mut policy = RegistryRefresh {
        replace,
        append,
        regenerate_export: true,
        ..Default::default()
    };
    rewrite(text, &mut policy)
}

/// Rewrite the address of every declaration whose id is in `ips`.
///
/// Returns the new text and how many declarations changed.
pub fn apply_refresh_ip(text: &str, ips: &HashMap<String, IpAddr>) -> (String, usize) {
    let lowered: HashMap<String, IpAddr> = ips
        .iter()
        .map(|(id, ip)| (id.to_ascii_lowercase(), *ip))
        .collect();

    let mut replace = HashMap::new();
    for decl in ParsedRegistry::parse(text).declarations {
        let id_key = decl.id.to_ascii_lowercase();
        if let Some(ip) = lowered.get(&id_key) {
            if decl.ip != Some(*ip) {
                replace.insert(
                    id_key,
                    DeviceDecl {
                        ip: Some(*ip),
                        ..decl
                    },
                );
            }
        }
    }

    let changed = replace.len();
    let mut policy = RegistryRefresh {
        replace,
        ..Default::default()
    };
    (rewrite(text, &mut policy), changed)
}

/// Replace every `commands` block with one generated from `associations`.
pub fn apply_command_associations(text: &str, associations: &Associations) -> String {
    let mut policy = RegistryRefresh {
        commands: Some(associations.clone()),
        ..Default::default()
    };
    rewrite(text, &mut policy)
}

/// Merge a cloud snapshot: upsert declarations, rebuild the scene table and
/// every `scenes` block. Devices missing from the snapshot keep their
/// declaration and scenes.
pub fn apply_sync_catalog(text: &str, snapshot: &[Device]) -> (String, SceneCatalog) {
    let parsed = ParsedRegistry::parse(text);
    let existing_catalog = parsed.scene_catalog();
    let (replace, append) = plan_declarations(&parsed.declarations, snapshot);

    // Catalog order: declared devices first, then new ones
    let mut merged: Vec<(String, Device)> = Vec::new();
    for decl in &parsed.declarations {
        let device = match snapshot.iter().find(|d| d.has_id(&decl.id)) {
            Some(fresh) => fresh.clone(),
            None => Device::new(&decl.id, &decl.name, &decl.sku).with_scenes(
                existing_catalog
                    .keys_for(&decl.id)
                    .iter()
                    .filter_map(|key| existing_catalog.get(key))
                    .map(SceneRecord::to_scene)
                    .collect(),
            ),
        };
        merged.push((decl.var.clone(), device));
    }
    for decl in &append {
        if let Some(device) = snapshot.iter().find(|d| d.has_id(&decl.id)) {
            merged.push((decl.var.clone(), device.clone()));
        }
    }

    let devices: Vec<Device> = merged.iter().map(|(_, device)| device.clone()).collect();
    let catalog = SceneCatalog::build(&devices);
    let blocks = merged
        .iter()
        .filter_map(|(var, device)| {
            let keys = catalog.keys_for(&device.id);
            (!keys.is_empty()).then(|| (var.clone(), keys.to_vec()))
        })
        .collect();

    let mut policy = RegistryRefresh {
        replace,
        append,
        scenes: Some(SceneRewrite {
            table: catalog.records().to_vec(),
            blocks,
        }),
        regenerate_export: true,
        ..Default::default()
    };
    (rewrite(text, &mut policy), catalog)
}

/// Rebuild device var -> command keys from command record provenance.
///
/// Records without a device id fall back to the longest declared variable
/// that prefixes the key.
pub fn associations_from_records(
    records: &[CapturedCommand],
    declarations: &[DeviceDecl],
) -> Associations {
    let mut associations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for record in records {
        let by_id = record.device_id.as_deref().and_then(|id| {
            declarations
                .iter()
                .find(|decl| decl.id.eq_ignore_ascii_case(id))
        });
        let owner = by_id.or_else(|| {
            declarations
                .iter()
                .filter(|decl| record.key.starts_with(&format!("{}_", decl.var)))
                .max_by_key(|decl| decl.var.len())
        });

        match owner {
            Some(decl) => {
                associations
                    .entry(decl.var.clone())
                    .or_default()
                    .insert(record.key.clone());
            }
            None => tracing::debug!("No declared device owns command '{}'", record.key),
        }
    }

    associations
        .into_iter()
        .map(|(var, keys)| (var, keys.into_iter().collect()))
        .collect()
}

/// The device registry file plus the template it is seeded from.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    path: PathBuf,
    template: PathBuf,
}

impl DeviceRegistry {
    pub fn new(path: impl Into<PathBuf>, template: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current text, or the template when the registry does not exist yet.
    fn base_text(&self) -> Result<String> {
        if let Some(text) = read_optional(&self.path)? {
            return Ok(text);
        }
        match read_optional(&self.template)? {
            Some(text) => {
                tracing::info!(
                    "Seeding {} from template {}",
                    self.path.display(),
                    self.template.display()
                );
                Ok(text)
            }
            None => Err(RegistryError::MissingTemplate {
                registry: self.path.clone(),
                template: self.template.clone(),
            }),
        }
    }

    fn store(&self, before: &str, after: &str) -> Result<bool> {
        if before == after && self.path.exists() {
            tracing::debug!("{} unchanged", self.path.display());
            return Ok(false);
        }
        write_atomic(&self.path, after)?;
        Ok(true)
    }

    /// Parse the registry. A missing file reads as empty.
    pub fn parse(&self) -> Result<ParsedRegistry> {
        let text = read_optional(&self.path)?.unwrap_or_default();
        Ok(ParsedRegistry::parse(&text))
    }

    pub fn declarations(&self) -> Result<Vec<DeviceDecl>> {
        Ok(self.parse()?.declarations)
    }

    /// Write or confirm one declaration. Returns the device's variable.
    pub fn upsert_device(&self, device: &Device) -> Result<String> {
        let mut vars = self.upsert_devices(std::slice::from_ref(device))?;
        Ok(vars.pop().unwrap_or_default())
    }

    /// Write or confirm declarations. Returns each device's variable, in
    /// input order.
    pub fn upsert_devices(&self, devices: &[Device]) -> Result<Vec<String>> {
        let text = self.base_text()?;
        let updated = apply_upsert(&text, devices);
        self.store(&text, &updated)?;

        let declarations = ParsedRegistry::parse(&updated).declarations;
        Ok(devices
            .iter()
            .filter_map(|device| {
                declarations
                    .iter()
                    .find(|decl| device.has_id(&decl.id))
                    .map(|decl| decl.var.clone())
            })
            .collect())
    }

    /// Apply discovered addresses. Devices absent from `ips` keep theirs.
    pub fn refresh_ip(&self, ips: &HashMap<String, IpAddr>) -> Result<usize> {
        let text = self.base_text()?;
        let (updated, changed) = apply_refresh_ip(&text, ips);
        self.store(&text, &updated)?;
        tracing::info!("Refreshed {} device address(es)", changed);
        Ok(changed)
    }

    /// Replace every `commands` block.
    pub fn refresh_command_associations(&self, associations: &Associations) -> Result<()> {
        let text = self.base_text()?;
        let updated = apply_command_associations(&text, associations);
        self.store(&text, &updated)?;
        Ok(())
    }

    /// Current `commands` blocks.
    pub fn associations(&self) -> Result<Associations> {
        Ok(self.parse()?.command_blocks)
    }

    /// Add `key` to a device's `commands` block.
    pub fn attach_command(&self, device_var: &str, key: &str) -> Result<()> {
        let mut associations = self.associations()?;
        let keys = associations.entry(device_var.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        keys.sort();
        self.refresh_command_associations(&associations)
    }

    pub fn scene_catalog(&self) -> Result<SceneCatalog> {
        Ok(self.parse()?.scene_catalog())
    }

    /// Merge a cloud snapshot into the registry.
    pub fn sync_catalog(&self, devices: &[Device]) -> Result<SceneCatalog> {
        let text = self.base_text()?;
        let (updated, catalog) = apply_sync_catalog(&text, devices);
        self.store(&text, &updated)?;
        tracing::info!(
            "Catalog synced: {} device(s), {} scene(s)",
            devices.len(),
            catalog.records().len()
        );
        Ok(catalog)
    }

    /// Hydrate every declared device with its scenes and captured commands.
    /// An empty or missing registry yields an empty list (first run).
    pub fn load_all(&self, commands: &CommandRegistry) -> Result<Vec<Device>> {
        let parsed = self.parse()?;
        if parsed.declarations.is_empty() {
            return Ok(Vec::new());
        }
        let catalog = parsed.scene_catalog();
        let records: BTreeMap<String, CapturedCommand> = commands
            .records()?
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();

        let mut devices = Vec::with_capacity(parsed.declarations.len());
        for decl in &parsed.declarations {
            let scenes = catalog
                .keys_for(&decl.id)
                .iter()
                .filter_map(|key| catalog.get(key))
                .map(SceneRecord::to_scene)
                .collect();

            let mut device = Device::new(&decl.id, &decl.name, &decl.sku).with_scenes(scenes);
            device.var = decl.var.clone();
            device.ip = decl.ip;

            for key in parsed.command_blocks.get(&decl.var).into_iter().flatten() {
                match records.get(key) {
                    Some(record) => {
                        device.commands.insert(key.clone(), record.clone());
                    }
                    None => tracing::warn!(
                        "Device '{}' lists command '{}' with no record",
                        decl.var,
                        key
                    ),
                }
            }
            devices.push(device);
        }
        Ok(devices)
    }
}
