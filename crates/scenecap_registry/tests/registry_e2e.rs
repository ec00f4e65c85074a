//! End-to-end tests for the device and command registries.
//!
//! Every test works on real files in a temp directory, seeded from the
//! templates shipped in the repository.

use proptest::prelude::*;
use scenecap_registry::{
    associations_from_records, command_key, sanitize, CommandFields, CommandRegistry, Device,
    DeviceRegistry, RegistryError, Scene, UpsertOutcome,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use tempfile::TempDir;

const DEVICE_TEMPLATE: &str = include_str!("../../../templates/device_registry.template");
const COMMAND_TEMPLATE: &str = include_str!("../../../templates/command_registry.template");

/// Create a test environment with both templates in a temp directory
struct TestEnv {
    /// Temp directory (cleaned up on drop)
    _temp: TempDir,
    pub devices: DeviceRegistry,
    pub commands: CommandRegistry,
    pub device_path: PathBuf,
    pub command_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let device_template = temp.path().join("device_registry.template");
        let command_template = temp.path().join("command_registry.template");
        fs::write(&device_template, DEVICE_TEMPLATE).expect("Failed to write template");
        fs::write(&command_template, COMMAND_TEMPLATE).expect("Failed to write template");

        let device_path = temp.path().join("devices.registry");
        let command_path = temp.path().join("commands.registry");

        Self {
            devices: DeviceRegistry::new(&device_path, &device_template),
            commands: CommandRegistry::new(&command_path, &command_template),
            device_path,
            command_path,
            _temp: temp,
        }
    }

    fn read(&self, path: &PathBuf) -> String {
        fs::read_to_string(path).expect("Failed to read registry")
    }
}

fn fields(transaction: &str) -> CommandFields {
    CommandFields {
        topic: "GA/account".into(),
        cmd: "ptReal".into(),
        transaction: transaction.into(),
        kind: 1,
        write: Some(false),
        command: Some(vec!["owABAQ==".into()]),
        ..Default::default()
    }
}

fn lamp() -> Device {
    Device::new("AA:BB", "Lamp", "H6001")
        .with_scenes(vec![Scene::new(42, "Sunset"), Scene::new(7, "Ocean")])
}

fn strip() -> Device {
    Device::new("CC:DD", "Strip", "H6163").with_scenes(vec![Scene::new(42, "Sunset")])
}

// ============================================================================
// First run
// ============================================================================

#[test]
fn test_load_all_on_missing_registry_is_first_run() {
    let env = TestEnv::new();
    assert!(env.devices.load_all(&env.commands).unwrap().is_empty());
}

#[test]
fn test_load_all_on_template_only_registry_is_first_run() {
    let env = TestEnv::new();
    fs::write(&env.device_path, DEVICE_TEMPLATE).unwrap();
    assert_eq!(env.devices.load_all(&env.commands).unwrap(), Vec::<Device>::new());
}

#[test]
fn test_load_all_on_comments_and_empty_export_is_first_run() {
    let env = TestEnv::new();
    fs::write(
        &env.device_path,
        "# hand-written notes\n\n# nothing declared yet\nbegin export\nend export\n",
    )
    .unwrap();
    assert!(env.devices.load_all(&env.commands).unwrap().is_empty());
}

#[test]
fn test_missing_template_is_fatal() {
    let temp = TempDir::new().unwrap();
    let commands = CommandRegistry::new(temp.path().join("c.registry"), temp.path().join("nope"));
    let err = commands
        .upsert_record("k", None, &fields("v_1"))
        .unwrap_err();
    assert!(err.is_missing_template());

    let devices = DeviceRegistry::new(temp.path().join("d.registry"), temp.path().join("nope"));
    assert!(matches!(
        devices.upsert_device(&lamp()),
        Err(RegistryError::MissingTemplate { .. })
    ));
}

// ============================================================================
// Sync and hydration
// ============================================================================

#[test]
fn test_sync_then_load_all_hydrates_shared_scene() {
    let env = TestEnv::new();
    env.devices.sync_catalog(&[lamp(), strip()]).unwrap();

    let text = env.read(&env.device_path);
    assert!(text.starts_with("# scenecap device registry"));
    assert_eq!(text.matches("\nscene sunset_42 ").count(), 1);

    let devices = env.devices.load_all(&env.commands).unwrap();
    assert_eq!(devices.len(), 2);
    let sunset = devices[1]
        .scenes
        .iter()
        .find(|scene| scene.value == 42)
        .unwrap();
    assert!(sunset.devices.contains("AA:BB"));
    assert!(sunset.devices.contains("CC:DD"));
    assert_eq!(devices[0].scenes.len(), 2);
}

#[test]
fn test_capture_roundtrip_through_both_registries() {
    let env = TestEnv::new();
    let var = env.devices.upsert_device(&lamp()).unwrap();
    assert_eq!(var, "lamp");

    let key = command_key("Lamp", "Sunset", 42);
    let outcome = env
        .commands
        .upsert_record(&key, Some("AA:BB"), &fields("v_1"))
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted("lamp_sunset_42".into()));
    env.devices.attach_command(&var, outcome.key()).unwrap();

    let devices = env.devices.load_all(&env.commands).unwrap();
    let stored = &devices[0].commands["lamp_sunset_42"];
    assert_eq!(stored.fields, fields("v_1"));
    assert_eq!(stored.device_id.as_deref(), Some("AA:BB"));
}

// ============================================================================
// Idempotency
// ============================================================================

#[test]
fn test_upsert_record_twice_is_byte_identical() {
    let env = TestEnv::new();
    env.commands
        .upsert_record("lamp_sunset_42", Some("AA:BB"), &fields("v_1"))
        .unwrap();
    let first = env.read(&env.command_path);
    env.commands
        .upsert_record("lamp_sunset_42", Some("AA:BB"), &fields("v_1"))
        .unwrap();
    assert_eq!(env.read(&env.command_path), first);
}

#[test]
fn test_refresh_command_associations_twice_is_identical() {
    let env = TestEnv::new();
    env.devices.sync_catalog(&[lamp(), strip()]).unwrap();

    let mut assoc = BTreeMap::new();
    assoc.insert(
        "lamp".to_string(),
        vec!["lamp_sunset_42".to_string(), "lamp_ocean_7".to_string()],
    );
    env.devices.refresh_command_associations(&assoc).unwrap();
    let first = env.read(&env.device_path);
    env.devices.refresh_command_associations(&assoc).unwrap();
    assert_eq!(env.read(&env.device_path), first);
    assert_eq!(env.devices.associations().unwrap()["lamp"].len(), 2);
}

#[test]
fn test_associations_rebuilt_from_command_records() {
    let env = TestEnv::new();
    env.devices.sync_catalog(&[lamp(), strip()]).unwrap();
    env.commands
        .upsert_record("lamp_sunset_42", Some("AA:BB"), &fields("v_1"))
        .unwrap();
    env.commands
        .upsert_record("strip_sunset_42", None, &fields("v_2"))
        .unwrap();

    let assoc = associations_from_records(
        &env.commands.records().unwrap(),
        &env.devices.declarations().unwrap(),
    );
    env.devices.refresh_command_associations(&assoc).unwrap();

    let devices = env.devices.load_all(&env.commands).unwrap();
    assert!(devices[0].commands.contains_key("lamp_sunset_42"));
    assert!(devices[1].commands.contains_key("strip_sunset_42"));
}

// ============================================================================
// IP refresh
// ============================================================================

#[test]
fn test_refresh_ip_keeps_absent_devices() {
    let env = TestEnv::new();
    env.devices
        .upsert_devices(&[
            lamp().with_ip("192.168.1.20".parse().unwrap()),
            strip().with_ip("192.168.1.21".parse().unwrap()),
        ])
        .unwrap();
    let before = env.read(&env.device_path);

    let mut ips = HashMap::new();
    ips.insert("aa:bb".to_string(), "192.168.1.99".parse().unwrap());
    assert_eq!(env.devices.refresh_ip(&ips).unwrap(), 1);

    let after = env.read(&env.device_path);
    assert_eq!(before.lines().count(), after.lines().count());
    let decls = env.devices.declarations().unwrap();
    assert_eq!(decls[0].ip, Some("192.168.1.99".parse::<IpAddr>().unwrap()));
    assert_eq!(decls[1].ip, Some("192.168.1.21".parse::<IpAddr>().unwrap()));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn test_sanitize_idempotent(label in ".{0,64}") {
        let once = sanitize(&label);
        prop_assert_eq!(sanitize(&once), once.clone());
        prop_assert!(!once.starts_with('_') && !once.ends_with('_'));
        prop_assert!(!once.contains("__"));
        prop_assert!(once
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_refresh_ip_only_touches_discovered(
        present in proptest::collection::vec(any::<bool>(), 1..6),
        last_octet in 1u8..250,
    ) {
        let env = TestEnv::new();
        let devices: Vec<Device> = (0..present.len())
            .map(|i| {
                Device::new(format!("ID:{}", i), format!("Light {}", i), "H6001")
                    .with_ip(format!("10.0.0.{}", i + 1).parse().unwrap())
            })
            .collect();
        env.devices.upsert_devices(&devices).unwrap();

        let ips: HashMap<String, IpAddr> = present
            .iter()
            .enumerate()
            .filter(|(_, p)| **p)
            .map(|(i, _)| {
                let ip = format!("10.1.{}.{}", i, last_octet).parse().unwrap();
                (format!("id:{}", i), ip)
            })
            .collect();
        env.devices.refresh_ip(&ips).unwrap();

        for (i, decl) in env.devices.declarations().unwrap().iter().enumerate() {
            let expected = if present[i] {
                format!("10.1.{}.{}", i, last_octet)
            } else {
                format!("10.0.0.{}", i + 1)
            };
            prop_assert_eq!(decl.ip, Some(expected.parse::<IpAddr>().unwrap()));
        }
    }
}
