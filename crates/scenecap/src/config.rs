//! Runtime configuration.
//!
//! Built once in `main` and passed to each component. Sources, lowest to
//! highest precedence: built-in defaults, the `.env` file, the process
//! environment.

use crate::env_file::read_env_file;
use anyhow::{Context, Result};
use scenecap_registry::{CommandRegistry, DeviceRegistry, DEFAULT_COMMAND_PORT};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const API_KEY_VAR: &str = "GOVEE_API_KEY";
pub const API_KEY_COMMENT: &str =
    "Govee cloud API key. Reference: https://developer.govee.com/reference/apply-you-govee-api-key";

/// Every environment key the configuration reads, in display order.
pub const KEYS: &[&str] = &[
    API_KEY_VAR,
    "SCENECAP_DEVICE_REGISTRY",
    "SCENECAP_COMMAND_REGISTRY",
    "SCENECAP_DEVICE_TEMPLATE",
    "SCENECAP_COMMAND_TEMPLATE",
    "SCENECAP_CAPTURE_LOG",
    "SCENECAP_INSTRUMENT_CMD",
    "SCENECAP_INSTRUMENT_DELAY_SECS",
    "SCENECAP_CAPTURE_TIMEOUT_SECS",
    "SCENECAP_LAN_MULTICAST_GROUP",
    "SCENECAP_LAN_SCAN_PORT",
    "SCENECAP_LAN_LISTEN_PORT",
    "SCENECAP_LAN_TIMEOUT_SECS",
    "SCENECAP_CLOUD_BASE_URL",
];

/// LAN discovery and control settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LanConfig {
    pub multicast_group: Ipv4Addr,
    /// Port devices listen on for scan requests
    pub scan_port: u16,
    /// Port scan responses arrive on
    pub listen_port: u16,
    pub command_port: u16,
    pub timeout: Duration,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(239, 255, 255, 250),
            scan_port: 4001,
            listen_port: 4002,
            command_port: DEFAULT_COMMAND_PORT,
            timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub env_file: PathBuf,
    pub api_key: Option<String>,
    pub device_registry: PathBuf,
    pub command_registry: PathBuf,
    pub device_template: PathBuf,
    pub command_template: PathBuf,
    /// Log the instrumentation appends observed messages to
    pub capture_log: PathBuf,
    /// Shell command that starts the instrumentation
    pub instrument_cmd: Option<String>,
    /// Time the instrumentation needs before hooks are live
    pub instrument_delay: Duration,
    pub capture_timeout: Duration,
    pub lan: LanConfig,
    pub cloud_base_url: String,
}

impl Config {
    /// Built-in defaults.
    pub fn defaults(env_file: impl Into<PathBuf>) -> Self {
        Self {
            env_file: env_file.into(),
            api_key: None,
            device_registry: PathBuf::from("registry/devices.registry"),
            command_registry: PathBuf::from("registry/commands.registry"),
            device_template: PathBuf::from("templates/device_registry.template"),
            command_template: PathBuf::from("templates/command_registry.template"),
            capture_log: PathBuf::from("logs/capture.log"),
            instrument_cmd: None,
            instrument_delay: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(60),
            lan: LanConfig::default(),
            cloud_base_url: crate::cloud::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Load from `env_file` and the process environment.
    pub fn load(env_file: &Path) -> Result<Self> {
        let file = read_env_file(env_file)?;
        Self::from_sources(env_file, |key| {
            std::env::var(key).ok().or_else(|| file.get(key).cloned())
        })
    }

    /// Build from a key lookup that already applies precedence.
    pub fn from_sources(env_file: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::defaults(env_file);

        config.api_key = get(API_KEY_VAR);
        if let Some(v) = get("SCENECAP_DEVICE_REGISTRY") {
            config.device_registry = v.into();
        }
        if let Some(v) = get("SCENECAP_COMMAND_REGISTRY") {
            config.command_registry = v.into();
        }
        if let Some(v) = get("SCENECAP_DEVICE_TEMPLATE") {
            config.device_template = v.into();
        }
        if let Some(v) = get("SCENECAP_COMMAND_TEMPLATE") {
            config.command_template = v.into();
        }
        if let Some(v) = get("SCENECAP_CAPTURE_LOG") {
            config.capture_log = v.into();
        }
        config.instrument_cmd = get("SCENECAP_INSTRUMENT_CMD");
        if let Some(secs) = parsed::<u64>(&get, "SCENECAP_INSTRUMENT_DELAY_SECS")? {
            config.instrument_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>(&get, "SCENECAP_CAPTURE_TIMEOUT_SECS")? {
            config.capture_timeout = Duration::from_secs(secs);
        }
        if let Some(group) = parsed::<Ipv4Addr>(&get, "SCENECAP_LAN_MULTICAST_GROUP")? {
            config.lan.multicast_group = group;
        }
        if let Some(port) = parsed::<u16>(&get, "SCENECAP_LAN_SCAN_PORT")? {
            config.lan.scan_port = port;
        }
        if let Some(port) = parsed::<u16>(&get, "SCENECAP_LAN_LISTEN_PORT")? {
            config.lan.listen_port = port;
        }
        if let Some(secs) = parsed::<u64>(&get, "SCENECAP_LAN_TIMEOUT_SECS")? {
            config.lan.timeout = Duration::from_secs(secs);
        }
        if let Some(url) = get("SCENECAP_CLOUD_BASE_URL") {
            config.cloud_base_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    pub fn device_registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(&self.device_registry, &self.device_template)
    }

    pub fn command_registry(&self) -> CommandRegistry {
        CommandRegistry::new(&self.command_registry, &self.command_template)
    }

    /// Effective values for display; the API key is masked.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let masked = self.api_key.as_deref().map(mask).unwrap_or_else(|| "(unset)".into());
        vec![
            ("env file", self.env_file.display().to_string()),
            (API_KEY_VAR, masked),
            ("device registry", self.device_registry.display().to_string()),
            ("command registry", self.command_registry.display().to_string()),
            ("device template", self.device_template.display().to_string()),
            ("command template", self.command_template.display().to_string()),
            ("capture log", self.capture_log.display().to_string()),
            (
                "instrument command",
                self.instrument_cmd.clone().unwrap_or_else(|| "(unset)".into()),
            ),
            ("instrument delay", format!("{}s", self.instrument_delay.as_secs())),
            ("capture timeout", format!("{}s", self.capture_timeout.as_secs())),
            (
                "lan scan",
                format!("{}:{}", self.lan.multicast_group, self.lan.scan_port),
            ),
            ("lan listen port", self.lan.listen_port.to_string()),
            ("lan timeout", format!("{}s", self.lan.timeout.as_secs())),
            ("cloud base url", self.cloud_base_url.clone()),
        ]
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        })
        .transpose()
}

fn mask(secret: &str) -> String {
    let skip = secret.chars().count().saturating_sub(4);
    format!("****{}", secret.chars().skip(skip).collect::<String>())
}
