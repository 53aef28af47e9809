//! `incidentd` configuration.
//!
//! Loaded in three steps: the optional JSON file named by `INCIDENT_CONFIG`
//! (every field optional), environment overrides, then validation.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::ScheduleEntry;
use crate::evidence::rpc::{parse_selector, DEFAULT_GAS, DEFAULT_GAS_PRICE_WEI, STORE_EVIDENCE_SELECTOR};
use crate::recorder::ClipCodec;
use crate::smoothing::{DEFAULT_SAMPLE_EVERY, DEFAULT_THRESHOLD, DEFAULT_WINDOW};

const DEFAULT_SOURCE_URI: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_COLLISION_THRESHOLD: f32 = 0.65;
const DEFAULT_FIRE_THRESHOLD: f32 = 0.70;
const DEFAULT_RECORDING_DIR: &str = "Detections";
const DEFAULT_MAX_SESSION_SECS: u64 = 300;
const DEFAULT_STORE_DIR: &str = "evidence-store";
const DEFAULT_LEDGER_DB: &str = "evidence-ledger.db";
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_ATTEMPTS: u32 = 1;
const DEFAULT_OBJECT_INPUT: usize = 640;
const DEFAULT_CLASSIFIER_INPUT: usize = 128;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IncidentdConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    recording: Option<RecordingConfigFile>,
    site: Option<SiteConfigFile>,
    store: Option<StoreConfigFile>,
    ledger: Option<LedgerConfigFile>,
    alert: Option<AlertConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    collision_threshold: Option<f32>,
    fire_threshold: Option<f32>,
    violence_threshold: Option<f32>,
    smoothing_window: Option<usize>,
    sample_every: Option<u64>,
    collision: Option<DetectorConfigFile>,
    fire: Option<DetectorConfigFile>,
    violence: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model: Option<PathBuf>,
    input: Option<usize>,
    labels: Option<Vec<String>>,
    script: Option<Vec<ScheduleEntry>>,
    baseline: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    dir: Option<PathBuf>,
    codec: Option<ClipCodec>,
    max_session_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SiteConfigFile {
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_command: Option<Vec<String>>,
    device_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    kind: Option<StoreKind>,
    dir: Option<PathBuf>,
    api_key: Option<String>,
    secret_key: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LedgerConfigFile {
    kind: Option<LedgerKind>,
    db_path: Option<PathBuf>,
    signing_seed: Option<String>,
    rpc_url: Option<String>,
    contract: Option<String>,
    from: Option<String>,
    method_selector: Option<String>,
    gas: Option<u64>,
    gas_price_wei: Option<u128>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    kind: Option<AlertKind>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from: Option<String>,
    to: Option<String>,
    shorten_links: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    stage_timeout_secs: Option<u64>,
    upload_attempts: Option<u32>,
    journal_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Local,
    Pinata,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    #[default]
    Sealed,
    Rpc,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    #[default]
    Log,
    Twilio,
}

#[derive(Debug, Clone)]
pub struct IncidentdConfig {
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub recording: RecordingConfig,
    pub site: SiteSettings,
    pub store: StoreSettings,
    pub ledger: LedgerSettings,
    pub alert: AlertSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub collision_threshold: f32,
    pub fire_threshold: f32,
    pub violence_threshold: f32,
    pub smoothing_window: usize,
    pub sample_every: u64,
    pub collision: DetectorSettings,
    pub fire: DetectorSettings,
    pub violence: DetectorSettings,
}

/// One class's detector: an ONNX model, or else a scripted schedule.
#[derive(Debug, Clone, Default)]
pub struct DetectorSettings {
    pub model: Option<PathBuf>,
    pub input: usize,
    pub labels: Vec<String>,
    pub script: Vec<ScheduleEntry>,
    /// Scripted classifier score outside the schedule.
    pub baseline: f32,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub dir: PathBuf,
    pub codec: ClipCodec,
    pub max_session: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SiteSettings {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_command: Option<Vec<String>>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub dir: PathBuf,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub kind: LedgerKind,
    pub db_path: PathBuf,
    pub signing_seed: Option<String>,
    pub rpc_url: String,
    pub contract: Option<String>,
    pub from: Option<String>,
    pub method_selector: [u8; 4],
    pub gas: u64,
    pub gas_price_wei: u128,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub kind: AlertKind,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub shorten_links: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stage_timeout: Duration,
    pub upload_attempts: u32,
    pub journal_path: Option<PathBuf>,
}

impl IncidentdConfig {
    /// Load using `INCIDENT_CONFIG` for the file path.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INCIDENT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or none), then apply env and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: IncidentdConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
        };

        let detection = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            collision_threshold: detection
                .collision_threshold
                .unwrap_or(DEFAULT_COLLISION_THRESHOLD),
            fire_threshold: detection.fire_threshold.unwrap_or(DEFAULT_FIRE_THRESHOLD),
            violence_threshold: detection.violence_threshold.unwrap_or(DEFAULT_THRESHOLD),
            smoothing_window: detection.smoothing_window.unwrap_or(DEFAULT_WINDOW),
            sample_every: detection.sample_every.unwrap_or(DEFAULT_SAMPLE_EVERY),
            collision: detector_settings(detection.collision, DEFAULT_OBJECT_INPUT),
            fire: detector_settings(detection.fire, DEFAULT_OBJECT_INPUT),
            violence: detector_settings(detection.violence, DEFAULT_CLASSIFIER_INPUT),
        };

        let recording = file.recording.unwrap_or_default();
        let recording = RecordingConfig {
            dir: recording
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_DIR)),
            codec: recording.codec.unwrap_or_default(),
            max_session: Duration::from_secs(
                recording
                    .max_session_secs
                    .unwrap_or(DEFAULT_MAX_SESSION_SECS),
            ),
        };

        let site = file.site.unwrap_or_default();
        let site = SiteSettings {
            latitude: site.latitude,
            longitude: site.longitude,
            location_command: site.location_command.filter(|cmd| !cmd.is_empty()),
            device_id: site.device_id,
        };

        let store = file.store.unwrap_or_default();
        let store = StoreSettings {
            kind: store.kind.unwrap_or_default(),
            dir: store.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            api_key: store.api_key,
            secret_key: store.secret_key,
            endpoint: store.endpoint,
        };

        let ledger = file.ledger.unwrap_or_default();
        let method_selector = match ledger.method_selector.as_deref() {
            Some(raw) => parse_selector(raw)?,
            None => STORE_EVIDENCE_SELECTOR,
        };
        let ledger = LedgerSettings {
            kind: ledger.kind.unwrap_or_default(),
            db_path: ledger
                .db_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_DB)),
            signing_seed: ledger.signing_seed,
            rpc_url: ledger
                .rpc_url
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            contract: ledger.contract,
            from: ledger.from,
            method_selector,
            gas: ledger.gas.unwrap_or(DEFAULT_GAS),
            gas_price_wei: ledger.gas_price_wei.unwrap_or(DEFAULT_GAS_PRICE_WEI),
        };

        let alert = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            kind: alert.kind.unwrap_or_default(),
            account_sid: alert.account_sid,
            auth_token: alert.auth_token,
            from: alert.from,
            to: alert.to,
            shorten_links: alert.shorten_links.unwrap_or(true),
        };

        let pipeline = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            stage_timeout: Duration::from_secs(
                pipeline
                    .stage_timeout_secs
                    .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS),
            ),
            upload_attempts: pipeline.upload_attempts.unwrap_or(DEFAULT_UPLOAD_ATTEMPTS),
            journal_path: pipeline.journal_path,
        };

        Ok(Self {
            source,
            detection,
            recording,
            site,
            store,
            ledger,
            alert,
            pipeline,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(uri) = env_nonempty("INCIDENT_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(key) = env_nonempty("PINATA_API_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(secret) = env_nonempty("PINATA_SECRET_API_KEY") {
            self.store.secret_key = Some(secret);
        }
        if let Some(sid) = env_nonempty("TWILIO_ACCOUNT_SID") {
            self.alert.account_sid = Some(sid);
        }
        if let Some(token) = env_nonempty("TWILIO_AUTH_TOKEN") {
            self.alert.auth_token = Some(token);
        }
        if let Some(from) = env_nonempty("TWILIO_PHONE_NUMBER") {
            self.alert.from = Some(from);
        }
        if let Some(to) = env_nonempty("ALERT_RECIPIENT") {
            self.alert.to = Some(to);
        }
        if let Some(seed) = env_nonempty("LEDGER_SIGNING_SEED") {
            self.ledger.signing_seed = Some(seed);
        }
        if let Some(url) = env_nonempty("LEDGER_RPC_URL") {
            self.ledger.rpc_url = url;
        }
        if let Some(contract) = env_nonempty("CONTRACT_ADDRESS") {
            self.ledger.contract = Some(contract);
        }
        if let Some(timeout) = env_nonempty("INCIDENT_STAGE_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("INCIDENT_STAGE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.pipeline.stage_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("collision_threshold", self.detection.collision_threshold),
            ("fire_threshold", self.detection.fire_threshold),
            ("violence_threshold", self.detection.violence_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("detection.{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.recording.codec == ClipCodec::Raw {
            return Err(anyhow!(
                "recording.codec raw writes unplayable uncompressed frames; use mjpeg or h264"
            ));
        }
        if self.detection.smoothing_window == 0 {
            return Err(anyhow!("detection.smoothing_window must be greater than zero"));
        }
        if self.detection.sample_every == 0 {
            return Err(anyhow!("detection.sample_every must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        if self.pipeline.stage_timeout.is_zero() {
            return Err(anyhow!("pipeline.stage_timeout_secs must be greater than zero"));
        }
        if self.pipeline.upload_attempts == 0 {
            return Err(anyhow!("pipeline.upload_attempts must be at least 1"));
        }
        if self.site.latitude.is_some() != self.site.longitude.is_some() {
            return Err(anyhow!("site.latitude and site.longitude must be set together"));
        }
        if self.store.kind == StoreKind::Pinata
            && (is_blank(&self.store.api_key) || is_blank(&self.store.secret_key))
        {
            return Err(anyhow!(
                "pinata store requires api_key and secret_key (or PINATA_API_KEY / PINATA_SECRET_API_KEY)"
            ));
        }
        if self.ledger.kind == LedgerKind::Rpc
            && (self.ledger.rpc_url.trim().is_empty()
                || is_blank(&self.ledger.contract)
                || is_blank(&self.ledger.from))
        {
            return Err(anyhow!("rpc ledger requires rpc_url, contract and from"));
        }
        if self.alert.kind == AlertKind::Twilio
            && [
                &self.alert.account_sid,
                &self.alert.auth_token,
                &self.alert.from,
                &self.alert.to,
            ]
            .into_iter()
            .any(is_blank)
        {
            return Err(anyhow!(
                "twilio alerts require account_sid, auth_token, from and to"
            ));
        }
        Ok(())
    }
}

fn detector_settings(file: Option<DetectorConfigFile>, default_input: usize) -> DetectorSettings {
    let file = file.unwrap_or_default();
    DetectorSettings {
        model: file.model,
        input: file.input.unwrap_or(default_input),
        labels: file.labels.unwrap_or_default(),
        script: file.script.unwrap_or_default(),
        baseline: file.baseline.unwrap_or(0.0),
    }
}

fn read_config_file(path: &Path) -> Result<IncidentdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
