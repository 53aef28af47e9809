use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::evidence::alert::{compose_alert, map_line, LinkShortener, Messenger};
use crate::evidence::{ContentHandle, ContentStore, Ledger, LedgerReceipt};
use crate::incident::SessionMetadata;
use crate::recorder::Clip;
use crate::IncidentClass;

/// Pause between upload attempts.
pub const UPLOAD_RETRY_DELAY: Duration = Duration::from_millis(750);

/// A closed clip plus the session it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FinalizationRequest {
    pub clip: Clip,
    pub session: SessionMetadata,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Notarize,
    Alert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Upload => write!(f, "upload"),
            Stage::Notarize => write!(f, "notarize"),
            Stage::Alert => write!(f, "alert"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AlertStatus {
    NotAttempted,
    Delivered { id: String },
    Failed { reason: String },
}

/// Outcome of one finalization run. Stages only ever fill fields in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvidenceRecord {
    pub clip_reference: PathBuf,
    pub incident_class: IncidentClass,
    pub metadata: SessionMetadata,
    pub frame_count: u64,
    pub storage_handle: Option<ContentHandle>,
    pub ledger_handle: Option<LedgerReceipt>,
    pub alert_status: AlertStatus,
    pub failures: Vec<StageFailure>,
    pub completed_at: DateTime<Local>,
}

impl EvidenceRecord {
    fn new(request: &FinalizationRequest) -> Self {
        Self {
            clip_reference: request.clip.path.clone(),
            incident_class: request.session.class,
            metadata: request.session.clone(),
            frame_count: request.clip.frame_count,
            storage_handle: None,
            ledger_handle: None,
            alert_status: AlertStatus::NotAttempted,
            failures: Vec::new(),
            completed_at: Local::now(),
        }
    }

    /// All three stages succeeded.
    pub fn is_complete(&self) -> bool {
        self.storage_handle.is_some()
            && self.ledger_handle.is_some()
            && matches!(self.alert_status, AlertStatus::Delivered { .. })
    }

    fn fail(&mut self, stage: Stage, err: &anyhow::Error) {
        let reason = format!("{:#}", err);
        log::error!(
            "{} evidence {}: {} failed: {}",
            self.incident_class,
            self.clip_reference.display(),
            stage,
            reason
        );
        self.failures.push(StageFailure { stage, reason });
    }
}

/// upload -> notarize -> alert for one clip.
///
/// Upload failure halts the run. Notarization failure is recorded and the
/// alert is still sent, referencing the content handle alone.
#[derive(Clone)]
pub struct FinalizationPipeline {
    pub store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn Ledger>,
    pub messenger: Arc<dyn Messenger>,
    pub shortener: Option<Arc<dyn LinkShortener>>,
    pub recipient: String,
    /// Upload tries before giving up; 1 means fail once.
    pub upload_attempts: u32,
}

impl FinalizationPipeline {
    pub fn run(&self, request: &FinalizationRequest) -> EvidenceRecord {
        let mut record = EvidenceRecord::new(request);
        let label = request.clip.file_name();

        let handle = match self.upload(request, &label) {
            Ok(handle) => {
                log::info!(
                    "{} uploaded to {} as {}",
                    label,
                    self.store.name(),
                    handle
                );
                handle
            }
            Err(e) => {
                record.fail(Stage::Upload, &e);
                record.completed_at = Local::now();
                return record;
            }
        };
        record.storage_handle = Some(handle.clone());

        match self.ledger.notarize(&handle, &label) {
            Ok(receipt) => {
                log::info!(
                    "{} notarized on {} ledger: {} (seq {})",
                    label,
                    self.ledger.name(),
                    receipt.tx_handle,
                    receipt.sequence
                );
                record.ledger_handle = Some(receipt);
            }
            Err(e) => record.fail(Stage::Notarize, &e),
        }

        let map = map_line(request.session.location.as_ref(), self.shortener.as_deref());
        let body = compose_alert(
            request.session.class,
            &request.session.started_at,
            &map,
            &handle,
            record.ledger_handle.as_ref(),
        );
        record.alert_status = match self.messenger.send(&self.recipient, &body) {
            Ok(id) => {
                log::info!("{} alert delivered via {} ({})", label, self.messenger.name(), id);
                AlertStatus::Delivered { id }
            }
            Err(e) => {
                record.fail(Stage::Alert, &e);
                AlertStatus::Failed {
                    reason: format!("{:#}", e),
                }
            }
        };
        record.completed_at = Local::now();
        record
    }

    fn upload(&self, request: &FinalizationRequest, label: &str) -> anyhow::Result<ContentHandle> {
        let path = &request.clip.path;
        fs::metadata(path).with_context(|| format!("read clip {}", path.display()))?;
        let attempts = self.upload_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.put(label, path) {
                Ok(handle) => return Ok(handle),
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "upload of {} failed (attempt {}/{}): {:#}",
                        label,
                        attempt,
                        attempts,
                        e
                    );
                    thread::sleep(UPLOAD_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::LogMessenger;
    use crate::recorder::{ClipCodec, ClipSpec};
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl ContentStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn put(&self, _name: &str, _clip: &std::path::Path) -> Result<ContentHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("store unavailable"));
            }
            ContentHandle::new("QmStored")
        }
    }

    struct RejectingLedger;

    impl Ledger for RejectingLedger {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn notarize(&self, _content: &ContentHandle, _label: &str) -> Result<LedgerReceipt> {
            Err(anyhow!("nonce too low"))
        }
    }

    fn request(dir: &std::path::Path) -> FinalizationRequest {
        let path = dir.join("FIRE_Unknown_Unknown_20240101_000000.iclip");
        std::fs::write(&path, b"clip bytes").unwrap();
        FinalizationRequest {
            clip: Clip {
                path,
                spec: ClipSpec {
                    width: 4,
                    height: 4,
                    frame_rate: 10,
                    codec: ClipCodec::Raw,
                },
                frame_count: 1,
                byte_len: 10,
            },
            session: SessionMetadata {
                class: IncidentClass::Fire,
                started_at: Local::now(),
                onset_frame: 0,
                location: None,
                device_id: "cam".into(),
            },
        }
    }

    fn pipeline(store: Arc<FlakyStore>, attempts: u32) -> FinalizationPipeline {
        FinalizationPipeline {
            store,
            ledger: Arc::new(RejectingLedger),
            messenger: Arc::new(LogMessenger),
            shortener: None,
            recipient: "+15550000000".into(),
            upload_attempts: attempts,
        }
    }

    #[test]
    fn bounded_upload_retry_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let started = std::time::Instant::now();
        let record = pipeline(store.clone(), 3).run(&request(dir.path()));
        assert!(started.elapsed() >= UPLOAD_RETRY_DELAY * 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(record.storage_handle.unwrap().as_str(), "QmStored");
        assert!(record.ledger_handle.is_none());
        assert_eq!(record.failures.len(), 1);
        assert_eq!(record.failures[0].stage, Stage::Notarize);
        assert!(matches!(record.alert_status, AlertStatus::Delivered { .. }));
    }

    #[test]
    fn default_upload_fails_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let record = pipeline(store.clone(), 1).run(&request(dir.path()));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(record.storage_handle.is_none());
        assert_eq!(record.alert_status, AlertStatus::NotAttempted);
        assert!(!record.is_complete());
    }

    #[test]
    fn missing_clip_file_is_an_upload_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path());
        req.clip.path = dir.path().join("gone.iclip");
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        });
        let record = pipeline(store.clone(), 1).run(&req);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(record.failures[0].stage, Stage::Upload);
    }
}
