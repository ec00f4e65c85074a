//! LAN discovery and command replay over UDP.

use crate::config::LanConfig;
use anyhow::{Context, Result};
use scenecap_registry::{CommandFields, Device};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

const MULTICAST_TTL: u32 = 2;
const MAX_DATAGRAM: usize = 4096;

/// A device that answered a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanDevice {
    pub ip: IpAddr,
    pub device: String,
    pub sku: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    msg: ScanMessage,
}

#[derive(Debug, Deserialize)]
struct ScanMessage {
    data: ScanData,
}

#[derive(Debug, Deserialize)]
struct ScanData {
    device: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    device_name: Option<String>,
}

/// The scan request devices answer.
pub fn scan_request() -> Value {
    json!({"msg": {"cmd": "scan", "data": {"account_topic": "reserve"}}})
}

/// Decode a scan response received from `ip`.
pub fn parse_scan_response(packet: &[u8], ip: IpAddr) -> Result<LanDevice> {
    let response: ScanResponse =
        serde_json::from_slice(packet).context("Undecodable scan response")?;
    Ok(LanDevice {
        ip,
        device: response.msg.data.device,
        sku: response.msg.data.sku,
        name: response.msg.data.device_name,
    })
}

/// Multicast a scan and collect responses until the discovery timeout.
pub async fn discover(config: &LanConfig) -> Result<Vec<LanDevice>> {
    let listener = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listen_port)))
        .await
        .with_context(|| format!("Failed to bind discovery port {}", config.listen_port))?;
    let sender = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .context("Failed to bind scan socket")?;
    sender
        .set_multicast_ttl_v4(MULTICAST_TTL)
        .context("Failed to set multicast TTL")?;

    let request = serde_json::to_vec(&scan_request())?;
    let target = SocketAddr::from((config.multicast_group, config.scan_port));
    sender
        .send_to(&request, target)
        .await
        .with_context(|| format!("Failed to send scan to {}", target))?;
    tracing::info!("Scan sent to {}; listening on port {}", target, config.listen_port);

    let deadline = Instant::now() + config.timeout;
    let mut found: Vec<LanDevice> = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match timeout_at(deadline, listener.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(received) => received.context("Failed to receive scan response")?,
        };
        match parse_scan_response(&buf[..len], from.ip()) {
            Ok(device) => {
                tracing::debug!("Discovered {} ({}) at {}", device.device, device.sku, device.ip);
                if !found.iter().any(|d| d.device.eq_ignore_ascii_case(&device.device)) {
                    found.push(device);
                }
            }
            Err(err) => tracing::warn!("Ignoring packet from {}: {:#}", from, err),
        }
    }

    tracing::info!("LAN discovery found {} device(s)", found.len());
    Ok(found)
}

/// The replay envelope for one captured command.
pub fn envelope(device_id: &str, fields: &CommandFields) -> Value {
    let mut data = Map::new();
    if let Some(command) = &fields.command {
        data.insert("command".into(), json!(command));
    }
    if let Some(write) = fields.write {
        data.insert("write".into(), Value::Bool(write));
    }
    let extras = [
        ("color", &fields.color),
        ("colorTemInKelvin", &fields.color_temp_kelvin),
        ("val", &fields.value),
        ("open", &fields.open),
        ("version", &fields.version),
    ];
    for (name, value) in extras {
        if let Some(value) = value {
            data.insert(name.into(), value.clone());
        }
    }

    json!({
        "msg": {
            "accountTopic": fields.topic,
            "cmd": fields.cmd,
            "cmdVersion": 0,
            "data": data,
            "transaction": fields.transaction,
            "type": fields.kind,
        },
        "device": device_id,
        "cmd": fields.cmd,
    })
}

/// Send a captured command to a device's command port.
pub async fn send_command(device: &Device, fields: &CommandFields) -> Result<()> {
    let ip = device
        .ip
        .with_context(|| format!("Device '{}' has no known LAN address", device.name))?;
    let target = SocketAddr::new(ip, device.port);
    let bind = match ip {
        IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        IpAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
    };

    let socket = UdpSocket::bind(bind).await.context("Failed to bind send socket")?;
    let payload = serde_json::to_vec(&envelope(&device.id, fields))?;
    socket
        .send_to(&payload, target)
        .await
        .with_context(|| format!("Failed to send command to {}", target))?;
    tracing::info!("Sent '{}' to {} at {}", fields.cmd, device.name, target);
    Ok(())
}
