//! Vendor cloud API client.
//!
//! Two calls: the account's device list and each device's DIY scene list.
//! Raw HTTP through `reqwest`, no vendor SDK.

use anyhow::{Context, Result};
use scenecap_registry::{Device, Scene};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openapi.api.govee.com";

const API_KEY_HEADER: &str = "Govee-API-Key";
const DEVICES_PATH: &str = "/router/api/v1/user/devices";
const DIY_SCENES_PATH: &str = "/router/api/v1/device/diy-scenes";
const DYNAMIC_SCENE_TYPE: &str = "devices.capabilities.dynamic_scene";
const DIY_SCENE_INSTANCE: &str = "diyScene";
const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    data: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    device: Option<String>,
    sku: Option<String>,
    #[serde(rename = "deviceName")]
    device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScenesResponse {
    payload: Option<ScenesPayload>,
}

#[derive(Debug, Deserialize)]
struct ScenesPayload {
    #[serde(default)]
    capabilities: Vec<Capability>,
}

#[derive(Debug, Deserialize)]
struct Capability {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    instance: String,
    parameters: Option<CapabilityParameters>,
}

#[derive(Debug, Deserialize)]
struct CapabilityParameters {
    #[serde(default)]
    options: Vec<SceneOption>,
}

#[derive(Debug, Deserialize)]
struct SceneOption {
    name: String,
    value: i64,
}

/// Devices from a user-devices response body. Entries without an
/// identifier or model code are skipped.
pub fn parse_devices(body: &str) -> Result<Vec<Device>> {
    let response: DevicesResponse =
        serde_json::from_str(body).context("Failed to parse device list response")?;
    let devices = response
        .data
        .into_iter()
        .filter_map(|entry| match (entry.device, entry.sku) {
            (Some(id), Some(sku)) => {
                let name = entry
                    .device_name
                    .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
                Some(Device::new(id, name, sku))
            }
            (id, sku) => {
                tracing::warn!(
                    "Skipping cloud device entry missing id or model (id={:?}, sku={:?})",
                    id,
                    sku
                );
                None
            }
        })
        .collect();
    Ok(devices)
}

/// DIY scenes from a diy-scenes response body.
pub fn parse_diy_scenes(body: &str) -> Result<Vec<Scene>> {
    let response: ScenesResponse =
        serde_json::from_str(body).context("Failed to parse scene list response")?;
    let scenes = response
        .payload
        .map(|payload| payload.capabilities)
        .unwrap_or_default()
        .into_iter()
        .filter(|cap| cap.kind == DYNAMIC_SCENE_TYPE && cap.instance == DIY_SCENE_INSTANCE)
        .filter_map(|cap| cap.parameters)
        .flat_map(|params| params.options)
        .map(|option| Scene::new(option.value, option.name))
        .collect();
    Ok(scenes)
}

/// Client for the vendor's cloud API.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Every device on the account.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let url = format!("{}{}", self.base_url, DEVICES_PATH);
        tracing::info!("Fetching device list from {}", url);

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to request device list")?;
        let body = checked_body(response, "Device list request").await?;

        let devices = parse_devices(&body)?;
        tracing::info!("Cloud reported {} device(s)", devices.len());
        Ok(devices)
    }

    /// DIY scenes configured for one device.
    pub async fn list_diy_scenes(&self, device_id: &str, sku: &str) -> Result<Vec<Scene>> {
        let url = format!("{}{}", self.base_url, DIY_SCENES_PATH);
        let request = json!({
            "requestId": uuid::Uuid::new_v4().to_string(),
            "payload": { "device": device_id, "sku": sku },
        });
        tracing::debug!("Fetching DIY scenes for {} ({})", device_id, sku);

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to request scenes for {}", device_id))?;
        let body = checked_body(response, "Scene list request").await?;

        let scenes = parse_diy_scenes(&body)?;
        tracing::info!("Device {} has {} DIY scene(s)", device_id, scenes.len());
        Ok(scenes)
    }
}

async fn checked_body(response: reqwest::Response, what: &str) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("{} returned an unreadable body", what))?;
    if !status.is_success() {
        anyhow::bail!("{} failed with {}: {}", what, status, body);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_skips_incomplete_entries() {
        let body = r#"{"code":200,"data":[
            {"device":"AA:BB","sku":"H6001","deviceName":"Lamp"},
            {"device":"CC:DD","sku":"H6163"},
            {"sku":"H6000","deviceName":"No id"},
            {"device":"EE:FF","deviceName":"No sku"}
        ]}"#;
        let devices = parse_devices(body).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Lamp");
        assert_eq!(devices[0].var, "lamp");
        assert_eq!(devices[1].name, "Unknown Device");
        assert_eq!(devices[1].sku, "H6163");
    }

    #[test]
    fn test_parse_devices_without_data() {
        assert!(parse_devices(r#"{"code":200}"#).unwrap().is_empty());
        assert!(parse_devices("not json").is_err());
    }

    #[test]
    fn test_parse_diy_scenes_picks_dynamic_scene_options() {
        let body = r#"{"payload":{"capabilities":[
            {"type":"devices.capabilities.on_off","instance":"powerSwitch","parameters":{"options":[{"name":"on","value":1}]}},
            {"type":"devices.capabilities.dynamic_scene","instance":"lightScene","parameters":{"options":[{"name":"Ocean","value":7}]}},
            {"type":"devices.capabilities.dynamic_scene","instance":"diyScene","parameters":{"options":[
                {"name":"Sunset","value":42},{"name":"Disco","value":43}
            ]}}
        ]}}"#;
        let scenes = parse_diy_scenes(body).unwrap();
        assert_eq!(scenes, vec![Scene::new(42, "Sunset"), Scene::new(43, "Disco")]);
    }

    #[test]
    fn test_parse_diy_scenes_empty_payload() {
        assert!(parse_diy_scenes(r#"{"payload":{}}"#).unwrap().is_empty());
        assert!(parse_diy_scenes("{}").unwrap().is_empty());
    }
}
