//! End-to-end capture tests: capture log → pipeline → both registries.
//!
//! Each test runs against real files in a temp directory seeded from the
//! repository templates. The process tests drive a shell script standing in
//! for the instrumentation.

use scenecap::capture::{CaptureOutcome, CapturePipeline};
use scenecap::config::Config;
use scenecap_registry::{CommandFields, Device, Scene};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

const DEVICE_TEMPLATE: &str = include_str!("../../../templates/device_registry.template");
const COMMAND_TEMPLATE: &str = include_str!("../../../templates/command_registry.template");

const SUNSET_LINE: &str = r#"2024-05-01 12:00:00 [mqtt] publish Message: {"msg":{"accountTopic":"GA/account","cmd":"ptReal","data":{"command":["owABAQ==","owH/AA=="],"write":false,"debug":true},"transaction":"v_1700000000000","type":1}}"#;

/// Config with every path inside a temp directory
struct TestEnv {
    _temp: TempDir,
    pub config: Config,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path();
        fs::write(root.join("device.template"), DEVICE_TEMPLATE)
            .expect("Failed to write template");
        fs::write(root.join("command.template"), COMMAND_TEMPLATE)
            .expect("Failed to write template");

        let mut config = Config::defaults(root.join(".env"));
        config.device_registry = root.join("registry").join("devices.registry");
        config.command_registry = root.join("registry").join("commands.registry");
        config.device_template = root.join("device.template");
        config.command_template = root.join("command.template");
        config.capture_log = root.join("logs").join("capture.log");

        Self { _temp: temp, config }
    }

    /// Register devices the way a sync would.
    fn with_devices(self, devices: &[Device]) -> Self {
        self.config
            .device_registry()
            .sync_catalog(devices)
            .expect("Failed to seed device registry");
        self
    }

    fn pipeline(&self) -> CapturePipeline {
        CapturePipeline::new(
            self.config.device_registry(),
            self.config.command_registry(),
            &self.config.capture_log,
        )
    }

    fn log_path(&self) -> &PathBuf {
        &self.config.capture_log
    }

    fn write_log(&self, text: &str) {
        fs::create_dir_all(self.log_path().parent().unwrap()).unwrap();
        fs::write(self.log_path(), text).unwrap();
    }

    fn append_log(&self, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }
}

fn lamp() -> Device {
    Device::new("AA:BB", "Lamp", "H6001").with_scenes(vec![Scene::new(42, "Sunset")])
}

fn sunset() -> Scene {
    Scene::new(42, "Sunset")
}

// ============================================================================
// Pipeline over a prepared log
// ============================================================================

#[test]
fn test_capture_stores_record_and_links_device() {
    let env = TestEnv::new().with_devices(&[lamp()]);
    env.write_log(&format!("starting hooks\n{}\nheartbeat\n", SUNSET_LINE));

    let outcome = env.pipeline().capture_from_file(&lamp(), &sunset()).unwrap();
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            key: "lamp_sunset_42".to_string(),
            replaced: false
        }
    );

    let records = env.config.command_registry().records().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key, "lamp_sunset_42");
    assert_eq!(record.device_id.as_deref(), Some("AA:BB"));
    assert_eq!(
        record.fields,
        CommandFields {
            topic: "GA/account".into(),
            cmd: "ptReal".into(),
            transaction: "v_1700000000000".into(),
            kind: 1,
            write: Some(false),
            command: Some(vec!["owABAQ==".into(), "owH/AA==".into()]),
            ..Default::default()
        }
    );

    let associations = env.config.device_registry().associations().unwrap();
    assert_eq!(associations["lamp"], vec!["lamp_sunset_42".to_string()]);

    let devices = env
        .config
        .device_registry()
        .load_all(&env.config.command_registry())
        .unwrap();
    assert!(devices[0].commands.contains_key("lamp_sunset_42"));
}

#[test]
fn test_second_extraction_over_same_log_is_no_match() {
    let env = TestEnv::new().with_devices(&[lamp()]);
    env.write_log(&format!("{}\n", SUNSET_LINE));
    let mut pipeline = env.pipeline();

    assert!(matches!(
        pipeline.capture_from_file(&lamp(), &sunset()).unwrap(),
        CaptureOutcome::Captured { .. }
    ));
    let before = fs::read_to_string(&env.config.command_registry).unwrap();

    assert_eq!(
        pipeline.capture_from_file(&lamp(), &sunset()).unwrap(),
        CaptureOutcome::NoMatch
    );
    assert_eq!(fs::read_to_string(&env.config.command_registry).unwrap(), before);
}

#[test]
fn test_recapture_after_truncation_replaces() {
    let env = TestEnv::new().with_devices(&[lamp()]);
    env.write_log(&format!("noise\nnoise\nnoise\n{}\n", SUNSET_LINE));
    let mut pipeline = env.pipeline();
    pipeline.capture_from_file(&lamp(), &sunset()).unwrap();

    env.write_log(&format!("{}\n", SUNSET_LINE.replace("v_1700000000000", "v_2")));
    let outcome = pipeline.capture_from_file(&lamp(), &sunset()).unwrap();

    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            key: "lamp_sunset_42".to_string(),
            replaced: true
        }
    );
    let records = env.config.command_registry().records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields.transaction, "v_2");
}

#[test]
fn test_partial_tail_line_is_retried() {
    let env = TestEnv::new().with_devices(&[lamp()]);
    let (head, tail) = SUNSET_LINE.split_at(SUNSET_LINE.len() - 20);
    env.write_log(&format!("hooks ready\n{}", head));
    let mut pipeline = env.pipeline();

    assert_eq!(
        pipeline.capture_from_file(&lamp(), &sunset()).unwrap(),
        CaptureOutcome::NoMatch
    );
    assert_eq!(pipeline.cursor(), "hooks ready\n".len());

    env.append_log(&format!("{}\n", tail));
    assert!(matches!(
        pipeline.capture_from_file(&lamp(), &sunset()).unwrap(),
        CaptureOutcome::Captured { .. }
    ));
}

#[test]
fn test_same_name_devices_get_distinct_keys() {
    let other = Device::new("EE:FF", "Lamp", "H6002").with_scenes(vec![Scene::new(42, "Sunset")]);
    let env = TestEnv::new().with_devices(&[lamp(), other.clone()]);
    env.write_log(&format!("{}\n", SUNSET_LINE));

    let first = env.pipeline().capture_from_file(&lamp(), &sunset()).unwrap();
    let second = env.pipeline().capture_from_file(&other, &sunset()).unwrap();

    assert_eq!(
        first,
        CaptureOutcome::Captured { key: "lamp_sunset_42".into(), replaced: false }
    );
    assert_eq!(
        second,
        CaptureOutcome::Captured { key: "lamp_sunset_42_2".into(), replaced: false }
    );
    let associations = env.config.device_registry().associations().unwrap();
    assert_eq!(associations["lamp"], vec!["lamp_sunset_42".to_string()]);
    assert_eq!(associations["lamp_2"], vec!["lamp_sunset_42_2".to_string()]);
}

#[test]
fn test_missing_log_is_no_match() {
    let env = TestEnv::new().with_devices(&[lamp()]);
    assert_eq!(
        env.pipeline().capture_from_file(&lamp(), &sunset()).unwrap(),
        CaptureOutcome::NoMatch
    );
}

#[test]
fn test_unregistered_device_is_declared_on_capture() {
    let env = TestEnv::new();
    env.write_log(&format!("{}\n", SUNSET_LINE));

    env.pipeline().capture_from_file(&lamp(), &sunset()).unwrap();

    let declarations = env.config.device_registry().declarations().unwrap();
    assert_eq!(declarations.len(), 1);
    assert_eq!(declarations[0].var, "lamp");
}

// ============================================================================
// Watcher + instrumentation + pipeline
// ============================================================================

#[cfg(unix)]
mod process {
    use super::*;
    use scenecap::capture::{watch_and_capture, SessionOutcome};
    use scenecap::instrument::{Instrumentation, TerminateOutcome};
    use scenecap::watcher::{ChannelCancel, LogWatcher, NeverCancel, WatchOutcome};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Shell script that appends the sunset message after a short delay.
    fn emitter() -> String {
        format!(
            "sleep 0.5; printf '%s\\n' '{}' >> \"$SCENECAP_CAPTURE_LOG\"; sleep 30",
            SUNSET_LINE
        )
    }

    /// Unrelated output first, the sunset message later.
    fn noisy_emitter() -> String {
        format!(
            "sleep 0.3; printf 'heartbeat\\n' >> \"$SCENECAP_CAPTURE_LOG\"; sleep 0.6; {}",
            emitter()
        )
    }

    fn watcher(env: &TestEnv) -> LogWatcher {
        LogWatcher::new(env.log_path()).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_full_capture_cycle() {
        let env = TestEnv::new().with_devices(&[lamp()]);
        env.write_log("stale output from an earlier session\n");
        let mut pipeline = env.pipeline();

        let mut inst = Instrumentation::spawn(&emitter(), env.log_path()).unwrap();
        pipeline.arm();
        let outcome = watcher(&env).wait(Duration::from_secs(10), NeverCancel, |_| {});
        let stopped = inst.terminate().unwrap();

        assert!(matches!(outcome, WatchOutcome::Detected { .. }));
        assert!(matches!(stopped, TerminateOutcome::Stopped(_)));
        assert_eq!(
            pipeline.capture_from_file(&lamp(), &sunset()).unwrap(),
            CaptureOutcome::Captured { key: "lamp_sunset_42".into(), replaced: false }
        );
    }

    #[test]
    fn test_unrelated_output_keeps_watching_until_message() {
        let env = TestEnv::new().with_devices(&[lamp()]);
        let mut pipeline = env.pipeline();

        let mut inst = Instrumentation::spawn(&noisy_emitter(), env.log_path()).unwrap();
        pipeline.arm();
        let report = watch_and_capture(
            &mut pipeline,
            &mut inst,
            &watcher(&env),
            Duration::from_secs(10),
            NeverCancel,
            &lamp(),
            &sunset(),
        )
        .unwrap();

        assert_eq!(
            report.outcome,
            SessionOutcome::Captured { key: "lamp_sunset_42".into(), replaced: false }
        );
        assert!(report.unrelated_growth >= 1);
        assert_eq!(report.exited_early, None);
        assert_eq!(inst.id(), None, "instrumentation is stopped before returning");
    }

    #[test]
    fn test_only_unrelated_output_times_out() {
        let env = TestEnv::new().with_devices(&[lamp()]);
        let mut pipeline = env.pipeline();
        let script = "sleep 0.1; printf 'heartbeat\\n' >> \"$SCENECAP_CAPTURE_LOG\"; sleep 30";

        let mut inst = Instrumentation::spawn(script, env.log_path()).unwrap();
        pipeline.arm();
        let report = watch_and_capture(
            &mut pipeline,
            &mut inst,
            &watcher(&env),
            Duration::from_millis(600),
            NeverCancel,
            &lamp(),
            &sunset(),
        )
        .unwrap();

        assert_eq!(report.outcome, SessionOutcome::TimedOut);
        assert_eq!(report.unrelated_growth, 1);
        assert!(!env.config.command_registry.exists());
    }

    #[test]
    fn test_cancel_wins_race_and_pipeline_is_not_invoked() {
        let env = TestEnv::new().with_devices(&[lamp()]);
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();

        let mut inst = Instrumentation::spawn(&emitter(), env.log_path()).unwrap();
        let mut detected = false;
        let outcome = watcher(&env).wait(Duration::from_secs(10), ChannelCancel(rx), |_| {
            detected = true
        });
        inst.terminate().unwrap();

        assert_eq!(outcome, WatchOutcome::Cancelled);
        assert!(!detected);
        assert!(!env.config.command_registry.exists());
    }

    #[test]
    fn test_timeout_without_activity() {
        let env = TestEnv::new().with_devices(&[lamp()]);
        let mut inst = Instrumentation::spawn("sleep 30", env.log_path()).unwrap();

        let outcome = watcher(&env).wait(Duration::from_millis(200), NeverCancel, |_| {});
        let stopped = inst.terminate().unwrap();

        assert_eq!(outcome, WatchOutcome::TimedOut);
        assert!(matches!(stopped, TerminateOutcome::Stopped(_)));
        assert!(!env.config.command_registry.exists());
    }

    #[test]
    fn test_start_requires_command() {
        let env = TestEnv::new();
        assert!(Instrumentation::start(&env.config).is_err());
    }
}
