//! Sync workflow: cloud snapshot, LAN addresses, registry merge.

use crate::cloud::CloudClient;
use crate::config::Config;
use crate::lan::{self, LanDevice};
use anyhow::{Context, Result};
use scenecap_registry::{associations_from_records, Device, SceneCatalog};
use std::collections::HashMap;
use std::net::IpAddr;

/// What a sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub cloud_devices: usize,
    pub scenes: usize,
    pub lan_devices: usize,
    pub linked: usize,
    /// Recoverable failures, already logged
    pub warnings: Vec<String>,
}

/// Address map keyed by lowercase device identifier.
pub fn address_map(found: &[LanDevice]) -> HashMap<String, IpAddr> {
    found
        .iter()
        .map(|d| (d.device.to_ascii_lowercase(), d.ip))
        .collect()
}

/// Attach discovered addresses to cloud devices. Returns how many linked.
pub fn link_addresses(devices: &mut [Device], found: &[LanDevice]) -> usize {
    let addresses = address_map(found);
    let mut linked = 0;
    for device in devices.iter_mut() {
        if let Some(ip) = addresses.get(&device.id.to_ascii_lowercase()) {
            device.ip = Some(*ip);
            linked += 1;
        }
    }
    linked
}

/// Refresh the whole registry from the cloud and the LAN.
///
/// Cloud and LAN failures degrade to empty results with a warning; a device
/// whose scene list cannot be fetched keeps the scenes already on record.
pub async fn sync(config: &Config, api_key: &str) -> Result<SyncReport> {
    let devices_registry = config.device_registry();
    let commands_registry = config.command_registry();
    let client = CloudClient::new(&config.cloud_base_url, api_key)?;
    let mut report = SyncReport::default();

    let mut devices = match client.list_devices().await {
        Ok(devices) => devices,
        Err(err) => {
            report.warn(format!("Cloud device list unavailable: {:#}", err));
            Vec::new()
        }
    };
    report.cloud_devices = devices.len();

    let known = devices_registry.scene_catalog()?;
    for device in devices.iter_mut() {
        device.scenes = match client.list_diy_scenes(&device.id, &device.sku).await {
            Ok(scenes) => scenes,
            Err(err) => {
                report.warn(format!("Scenes for '{}' unavailable: {:#}", device.name, err));
                recorded_scenes(&known, &device.id)
            }
        };
    }

    let found = match lan::discover(&config.lan).await {
        Ok(found) => found,
        Err(err) => {
            report.warn(format!("LAN discovery failed: {:#}", err));
            Vec::new()
        }
    };
    report.lan_devices = found.len();
    report.linked = link_addresses(&mut devices, &found);

    let catalog = devices_registry
        .sync_catalog(&devices)
        .context("Failed to update the device registry")?;
    report.scenes = catalog.records().len();

    // Devices the cloud omitted still pick up their LAN address
    devices_registry.refresh_ip(&address_map(&found))?;

    let records = commands_registry.records()?;
    let declarations = devices_registry.declarations()?;
    let associations = associations_from_records(&records, &declarations);
    devices_registry.refresh_command_associations(&associations)?;

    tracing::info!(
        "Sync complete: {} cloud device(s), {} scene(s), {} on LAN, {} linked",
        report.cloud_devices,
        report.scenes,
        report.lan_devices,
        report.linked
    );
    Ok(report)
}

/// Discover devices on the LAN and update recorded addresses.
pub async fn refresh_ips(config: &Config) -> Result<usize> {
    let found = lan::discover(&config.lan).await?;
    let changed = config.device_registry().refresh_ip(&address_map(&found))?;
    Ok(changed)
}

/// Rebuild every device's `commands` block from the command registry.
pub fn refresh_command_associations(config: &Config) -> Result<usize> {
    let devices = config.device_registry();
    let records = config.command_registry().records()?;
    let associations = associations_from_records(&records, &devices.declarations()?);
    let linked = associations.values().map(Vec::len).sum();
    devices.refresh_command_associations(&associations)?;
    tracing::info!("Linked {} of {} command(s) to devices", linked, records.len());
    Ok(linked)
}

fn recorded_scenes(catalog: &SceneCatalog, device_id: &str) -> Vec<scenecap_registry::Scene> {
    catalog
        .keys_for(device_id)
        .iter()
        .filter_map(|key| catalog.get(key))
        .map(|record| record.to_scene())
        .collect()
}

impl SyncReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}
