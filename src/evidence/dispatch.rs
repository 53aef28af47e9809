use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crate::evidence::{EvidenceRecord, FinalizationPipeline, FinalizationRequest};
use crate::incident::FinalizationQueue;

/// Record counts collected by the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub total: u64,
    pub complete: u64,
}

impl DispatchSummary {
    pub fn partial(&self) -> u64 {
        self.total - self.complete
    }
}

/// Runs every finalization on its own thread and funnels the results into a
/// single sink thread.
///
/// The sink logs one line per record and, with a journal configured, appends
/// the record as JSON. It keeps only counts; the journal is the durable copy.
pub struct EvidenceDispatcher {
    pipeline: FinalizationPipeline,
    results: Sender<EvidenceRecord>,
    runs: Mutex<Vec<JoinHandle<()>>>,
    sink: JoinHandle<DispatchSummary>,
}

impl EvidenceDispatcher {
    pub fn new(pipeline: FinalizationPipeline, journal: Option<PathBuf>) -> Result<Self> {
        let journal = match journal {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("open evidence journal {}", path.display()))?,
            ),
            None => None,
        };
        let (results, rx) = mpsc::channel();
        let sink = thread::Builder::new()
            .name("evidence-sink".into())
            .spawn(move || run_sink(rx, journal))
            .context("spawn evidence sink")?;
        Ok(Self {
            pipeline,
            results,
            runs: Mutex::new(Vec::new()),
            sink,
        })
    }

    /// Finalization runs not yet finished.
    pub fn pending(&self) -> usize {
        self.runs
            .lock()
            .map(|runs| runs.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for every run, close the sink and return its counts.
    pub fn finish(self) -> Result<DispatchSummary> {
        let runs = self
            .runs
            .into_inner()
            .map_err(|_| anyhow!("finalization run list poisoned"))?;
        if !runs.is_empty() {
            log::info!("waiting for {} finalization run(s)", runs.len());
        }
        for handle in runs {
            if handle.join().is_err() {
                log::error!("a finalization run panicked");
            }
        }
        drop(self.results);
        self.sink
            .join()
            .map_err(|_| anyhow!("evidence sink panicked"))
    }
}

impl FinalizationQueue for EvidenceDispatcher {
    fn enqueue(&self, request: FinalizationRequest) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let results = self.results.clone();
        let name = format!("finalize-{}", request.session.class.file_tag().to_lowercase());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let record = pipeline.run(&request);
                if results.send(record).is_err() {
                    log::error!("evidence sink closed before {}", request.clip.path.display());
                }
            })
            .context("spawn finalization run")?;
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| anyhow!("finalization run list poisoned"))?;
        runs.retain(|h| !h.is_finished());
        runs.push(handle);
        Ok(())
    }
}

fn run_sink(rx: Receiver<EvidenceRecord>, mut journal: Option<File>) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    for record in rx {
        log::info!(
            "evidence {} [{}]: stored={} ledger={} alert={:?} failures={}",
            record.clip_reference.display(),
            record.incident_class,
            record
                .storage_handle
                .as_ref()
                .map(|h| h.as_str())
                .unwrap_or("-"),
            record
                .ledger_handle
                .as_ref()
                .map(|r| r.tx_handle.as_str())
                .unwrap_or("-"),
            record.alert_status,
            record.failures.len()
        );
        if let Some(file) = journal.as_mut() {
            let line = serde_json::to_string(&record);
            let written = line
                .map_err(anyhow::Error::from)
                .and_then(|line| writeln!(file, "{}", line).map_err(anyhow::Error::from));
            if let Err(e) = written {
                log::error!("evidence journal write failed: {:#}", e);
            }
        }
        summary.total += 1;
        if record.is_complete() {
            summary.complete += 1;
        }
    }
    summary
}
