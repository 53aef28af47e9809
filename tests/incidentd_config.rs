use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use incident_witness::config::{AlertKind, IncidentdConfig, LedgerKind, StoreKind};
use incident_witness::ClipCodec;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INCIDENT_CONFIG",
        "INCIDENT_SOURCE",
        "INCIDENT_STAGE_TIMEOUT_SECS",
        "PINATA_API_KEY",
        "PINATA_SECRET_API_KEY",
        "TWILIO_ACCOUNT_SID",
        "TWILIO_AUTH_TOKEN",
        "TWILIO_PHONE_NUMBER",
        "ALERT_RECIPIENT",
        "LEDGER_SIGNING_SEED",
        "LEDGER_RPC_URL",
        "CONTRACT_ADDRESS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = IncidentdConfig::load().expect("load defaults");
    assert_eq!(cfg.source.uri, "stub://front_camera");
    assert_eq!(cfg.source.target_fps, 30);
    assert_eq!(cfg.detection.collision_threshold, 0.65);
    assert_eq!(cfg.detection.fire_threshold, 0.70);
    assert_eq!(cfg.detection.violence_threshold, 0.87);
    assert_eq!(cfg.detection.smoothing_window, 128);
    assert_eq!(cfg.detection.sample_every, 5);
    assert_eq!(cfg.recording.dir.to_str(), Some("Detections"));
    assert_eq!(cfg.recording.codec, ClipCodec::Mjpeg);
    assert_eq!(cfg.recording.max_session, Duration::from_secs(300));
    assert_eq!(cfg.store.kind, StoreKind::Local);
    assert_eq!(cfg.ledger.kind, LedgerKind::Sealed);
    assert_eq!(cfg.ledger.method_selector, [0x53, 0x62, 0x1b, 0x69]);
    assert_eq!(cfg.alert.kind, AlertKind::Log);
    assert!(cfg.alert.shorten_links);
    assert_eq!(cfg.pipeline.stage_timeout, Duration::from_secs(30));
    assert_eq!(cfg.pipeline.upload_attempts, 1);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "source": { "uri": "stub://lot?frames=90", "target_fps": 15 },
            "detection": {
                "collision_threshold": 0.5,
                "sample_every": 3,
                "collision": { "script": [ { "from": 10, "to": 40, "confidence": 0.8 } ] },
                "violence": { "baseline": 0.1 }
            },
            "recording": { "dir": "clips", "codec": "mjpeg", "max_session_secs": 60 },
            "site": { "latitude": 40.7128, "longitude": -74.006, "device_id": "gate-cam" },
            "store": { "kind": "pinata", "api_key": "file-key", "secret_key": "file-secret" },
            "alert": { "kind": "twilio", "account_sid": "AC1", "auth_token": "tok", "from": "+15550000000" },
            "pipeline": { "upload_attempts": 3 }
        }"#,
    );

    std::env::set_var("INCIDENT_CONFIG", file.path());
    std::env::set_var("INCIDENT_SOURCE", "stub://override?frames=5");
    std::env::set_var("PINATA_API_KEY", "env-key");
    std::env::set_var("ALERT_RECIPIENT", "+15551234567");
    std::env::set_var("INCIDENT_STAGE_TIMEOUT_SECS", "12");

    let cfg = IncidentdConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "stub://override?frames=5");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.detection.collision_threshold, 0.5);
    assert_eq!(cfg.detection.fire_threshold, 0.70);
    assert_eq!(cfg.detection.sample_every, 3);
    assert_eq!(cfg.detection.collision.script.len(), 1);
    assert_eq!(cfg.detection.collision.script[0].to, 40);
    assert_eq!(cfg.detection.violence.baseline, 0.1);
    assert_eq!(cfg.detection.violence.input, 128);
    assert_eq!(cfg.recording.max_session, Duration::from_secs(60));
    assert_eq!(cfg.recording.codec, ClipCodec::Mjpeg);
    assert_eq!(cfg.site.latitude, Some(40.7128));
    assert_eq!(cfg.site.device_id.as_deref(), Some("gate-cam"));
    assert_eq!(cfg.store.kind, StoreKind::Pinata);
    assert_eq!(cfg.store.api_key.as_deref(), Some("env-key"));
    assert_eq!(cfg.store.secret_key.as_deref(), Some("file-secret"));
    assert_eq!(cfg.alert.to.as_deref(), Some("+15551234567"));
    assert_eq!(cfg.pipeline.stage_timeout, Duration::from_secs(12));
    assert_eq!(cfg.pipeline.upload_attempts, 3);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "detection": { "fire_threshold": 1.5 } }"#,
        r#"{ "detection": { "smoothing_window": 0 } }"#,
        r#"{ "recording": { "codec": "raw" } }"#,
        r#"{ "pipeline": { "upload_attempts": 0 } }"#,
        r#"{ "site": { "latitude": 12.0 } }"#,
        r#"{ "store": { "kind": "pinata" } }"#,
        r#"{ "ledger": { "kind": "rpc" } }"#,
        r#"{ "ledger": { "method_selector": "0x1234" } }"#,
        r#"{ "alert": { "kind": "twilio", "account_sid": "AC1" } }"#,
        r#"{ "unknown_section": {} }"#,
    ] {
        let file = write_config(json);
        let result = IncidentdConfig::load_from(Some(file.path()));
        assert!(result.is_err(), "accepted {}", json);
    }
}

#[test]
fn rpc_ledger_takes_contract_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{ "ledger": { "kind": "rpc", "from": "0x00000000000000000000000000000000000000aa" } }"#,
    );
    std::env::set_var(
        "CONTRACT_ADDRESS",
        "0x00000000000000000000000000000000000000bb",
    );
    std::env::set_var("LEDGER_RPC_URL", "http://node:8545");

    let cfg = IncidentdConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.ledger.kind, LedgerKind::Rpc);
    assert_eq!(cfg.ledger.rpc_url, "http://node:8545");
    assert_eq!(
        cfg.ledger.contract.as_deref(),
        Some("0x00000000000000000000000000000000000000bb")
    );

    let bad = write_config(r#"{ "pipeline": {} }"#);
    std::env::set_var("INCIDENT_STAGE_TIMEOUT_SECS", "soon");
    assert!(IncidentdConfig::load_from(Some(bad.path())).is_err());

    clear_env();
}
