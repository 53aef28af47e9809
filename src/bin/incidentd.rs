//! incidentd - incident detection and evidence capture daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source
//! 2. Runs collision, fire and violent-act detection on every frame
//! 3. Records a clip per incident while it is active
//! 4. Uploads, notarizes and alerts on every finished clip, off the frame loop
//! 5. On end of stream or Ctrl-C, closes open clips and waits for finalization

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use incident_witness::config::{AlertKind, DetectorSettings, IncidentdConfig, LedgerKind, StoreKind};
use incident_witness::evidence::{
    ContentStore, EvidenceDispatcher, FinalizationPipeline, Ledger, LinkShortener,
    LocalContentStore, LogMessenger, Messenger, PinataStore, RpcLedger, RpcLedgerConfig,
    SealedLedger, TinyUrl, TwilioMessenger,
};
use incident_witness::preview::{
    watch_for_quit, BellAlarm, JpegPreview, LogPreview, NullPreview, PreviewSink,
};
use incident_witness::site::{Geolocation, SystemProbe};
use incident_witness::{
    signing_key_from_seed, DetectionPolicy, DetectorAdapter, FileConfig, FileSource,
    IncidentClass, Orchestrator, PipelineContext, RecordingPlan, ScriptedBackend,
};

#[derive(Parser, Debug)]
#[command(
    name = "incidentd",
    about = "Detect collisions, fires and violent acts; record and notarize evidence clips"
)]
struct Args {
    /// Frame source (local video path or stub://name?frames=N); overrides source.uri
    #[arg(long)]
    source: Option<String>,

    /// JSON config file; overrides INCIDENT_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// Live preview: log, none, or jpeg:<path>. With log or jpeg, q + Enter stops
    #[arg(long, default_value = "log", value_name = "MODE")]
    preview: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("INCIDENT_CONFIG").ok().map(PathBuf::from));
    let mut cfg = IncidentdConfig::load_from(config_path.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let mut source = FileSource::new(FileConfig {
        path: cfg.source.uri.clone(),
        target_fps: cfg.source.target_fps,
        width: cfg.source.width,
        height: cfg.source.height,
    })?;
    let mut preview = build_preview(&args.preview)?;
    let dispatcher = EvidenceDispatcher::new(
        build_pipeline(&cfg)?,
        cfg.pipeline.journal_path.clone(),
    )?;

    let ctx = PipelineContext {
        adapter: build_adapter(&cfg)?,
        site: Box::new(SystemProbe {
            fixed: match (cfg.site.latitude, cfg.site.longitude) {
                (Some(lat), Some(lon)) => Some(
                    Geolocation::new(lat, lon)
                        .ok_or_else(|| anyhow!("site coordinates out of range"))?,
                ),
                _ => None,
            },
            location_command: cfg.site.location_command.clone(),
            device_id: cfg.site.device_id.clone(),
        }),
        alarm: Box::new(BellAlarm::default()),
        policy: DetectionPolicy {
            collision_threshold: cfg.detection.collision_threshold,
            fire_threshold: cfg.detection.fire_threshold,
            violence_threshold: cfg.detection.violence_threshold,
            smoothing_window: cfg.detection.smoothing_window,
            sample_every: cfg.detection.sample_every,
        },
        recording: RecordingPlan {
            dir: cfg.recording.dir.clone(),
            codec: cfg.recording.codec,
            max_session: cfg.recording.max_session,
        },
    };

    log::info!(
        "incidentd {} running. source={} clips={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.uri,
        cfg.recording.dir.display()
    );

    let mut orchestrator = Orchestrator::new(ctx);
    let run = orchestrator.run(
        &mut source,
        preview.as_mut(),
        &dispatcher,
        &stop,
        args.max_frames,
    );

    let evidence = dispatcher.finish()?;
    log::info!(
        "{} evidence record(s): {} complete, {} partial",
        evidence.total,
        evidence.complete,
        evidence.partial()
    );

    let summary = run?;
    for class in IncidentClass::ALL {
        let stats = summary.stats(class);
        log::info!(
            "{}: onsets={} finalized={} aborted={} handoff_failed={} suppressed={}",
            class,
            stats.onsets,
            stats.finalized,
            stats.aborted,
            stats.handoff_failed,
            stats.suppressed
        );
    }
    Ok(())
}

fn build_preview(mode: &str) -> Result<Box<dyn PreviewSink>> {
    match mode {
        "log" => Ok(Box::new(LogPreview::default().quit_on_stdin())),
        "none" => Ok(Box::new(NullPreview)),
        other => match other.strip_prefix("jpeg:") {
            Some(path) => {
                log::info!("type q + Enter to stop");
                let quit = watch_for_quit(std::io::BufReader::new(std::io::stdin()));
                Ok(Box::new(JpegPreview::new(path).quit_on(quit)))
            }
            None => Err(anyhow!("unknown preview mode '{}' (log|none|jpeg:<path>)", other)),
        },
    }
}

fn build_adapter(cfg: &IncidentdConfig) -> Result<DetectorAdapter> {
    let mut adapter = DetectorAdapter::new();
    let detection = &cfg.detection;
    for (class, settings) in [
        (IncidentClass::Collision, &detection.collision),
        (IncidentClass::Fire, &detection.fire),
        (IncidentClass::ViolentAct, &detection.violence),
    ] {
        register_detector(&mut adapter, class, settings)
            .with_context(|| format!("configure {} detector", class))?;
    }
    adapter.warm_up()?;
    Ok(adapter)
}

fn register_detector(
    adapter: &mut DetectorAdapter,
    class: IncidentClass,
    settings: &DetectorSettings,
) -> Result<()> {
    if let Some(model) = &settings.model {
        return register_model(adapter, class, model, settings);
    }
    if settings.script.is_empty() && settings.baseline == 0.0 {
        log::info!("{} detector: none configured", class);
        return Ok(());
    }
    let backend = if class.is_continuous() {
        ScriptedBackend::classifier(settings.script.clone(), settings.baseline)
    } else {
        ScriptedBackend::objects(settings.script.clone())
    };
    adapter.register(class, backend)
}

#[cfg(feature = "backend-tract")]
fn register_model(
    adapter: &mut DetectorAdapter,
    class: IncidentClass,
    model: &std::path::Path,
    settings: &DetectorSettings,
) -> Result<()> {
    use incident_witness::detect::backends::{TractFrameClassifier, TractObjectDetector};
    if class.is_continuous() {
        adapter.register(class, TractFrameClassifier::new(model, settings.input)?)
    } else {
        adapter.register(
            class,
            TractObjectDetector::new(model, settings.input, settings.labels.clone())?,
        )
    }
}

#[cfg(not(feature = "backend-tract"))]
fn register_model(
    _adapter: &mut DetectorAdapter,
    _class: IncidentClass,
    model: &std::path::Path,
    _settings: &DetectorSettings,
) -> Result<()> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        model.display()
    ))
}

fn build_pipeline(cfg: &IncidentdConfig) -> Result<FinalizationPipeline> {
    let timeout = cfg.pipeline.stage_timeout;

    let store: Arc<dyn ContentStore> = match cfg.store.kind {
        StoreKind::Local => Arc::new(LocalContentStore::open(&cfg.store.dir)?),
        StoreKind::Pinata => Arc::new(PinataStore::new(
            cfg.store.endpoint.clone(),
            cfg.store.api_key.clone().unwrap_or_default(),
            cfg.store.secret_key.clone().unwrap_or_default(),
            timeout,
        )?),
    };

    let ledger: Arc<dyn Ledger> = match cfg.ledger.kind {
        LedgerKind::Sealed => {
            let key = match cfg.ledger.signing_seed.as_deref() {
                Some(seed) => signing_key_from_seed(seed)?,
                None => {
                    log::warn!("LEDGER_SIGNING_SEED not set; signing with an ephemeral key");
                    ephemeral_signing_key()
                }
            };
            let ledger = SealedLedger::open(&cfg.ledger.db_path, key)?;
            log::info!(
                "sealed ledger {} identity {}",
                cfg.ledger.db_path.display(),
                ledger.identity()
            );
            Arc::new(ledger)
        }
        LedgerKind::Rpc => Arc::new(RpcLedger::new(RpcLedgerConfig {
            rpc_url: cfg.ledger.rpc_url.clone(),
            contract: cfg.ledger.contract.clone().unwrap_or_default(),
            from: cfg.ledger.from.clone().unwrap_or_default(),
            selector: cfg.ledger.method_selector,
            gas: cfg.ledger.gas,
            gas_price_wei: cfg.ledger.gas_price_wei,
            timeout,
            poll_interval: Duration::from_secs(1),
        })?),
    };

    let messenger: Arc<dyn Messenger> = match cfg.alert.kind {
        AlertKind::Log => Arc::new(LogMessenger),
        AlertKind::Twilio => Arc::new(TwilioMessenger::new(
            cfg.alert.account_sid.clone().unwrap_or_default(),
            cfg.alert.auth_token.clone().unwrap_or_default(),
            cfg.alert.from.clone().unwrap_or_default(),
            timeout,
        )),
    };
    let shortener: Option<Arc<dyn LinkShortener>> = if cfg.alert.shorten_links {
        Some(Arc::new(TinyUrl::new(timeout)))
    } else {
        None
    };

    Ok(FinalizationPipeline {
        store,
        ledger,
        messenger,
        shortener,
        recipient: cfg.alert.to.clone().unwrap_or_else(|| "operator".to_string()),
        upload_attempts: cfg.pipeline.upload_attempts,
    })
}

fn ephemeral_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let key = SigningKey::from_bytes(&seed);
    zeroize::Zeroize::zeroize(&mut seed);
    key
}
