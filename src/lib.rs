//! Incident Witness
//!
//! This crate turns a video stream into notarized incident evidence.
//!
//! # Architecture
//!
//! Frames flow through a single synchronous loop:
//!
//! 1. **Detect**: each incident class has its own detector capability. Failures
//!    degrade to "no detections this frame".
//! 2. **Decide**: one `IncidentMachine` per class converts per-frame signals into
//!    onset / active / end transitions. The violent-act score is debounced by a
//!    rolling-mean `TemporalSmoother` first.
//! 3. **Record**: an active machine owns exactly one `ClipRecorder`. Ending a
//!    session flushes and closes the clip.
//! 4. **Finalize**: the closed clip is handed to the `FinalizationPipeline`, which
//!    runs upload -> notarize -> alert on its own thread. The frame loop never waits.
//!
//! # Module Structure
//!
//! - `frame`: frames, annotation overlays
//! - `ingest`: frame sources (synthetic, local files)
//! - `detect`: detector adapter, result types, backends
//! - `smoothing`: rolling-window debouncer
//! - `incident`: arbiter, sessions, state machines
//! - `recorder`: clip recording and the clip container
//! - `site`: geolocation and device identity
//! - `evidence`: finalization pipeline and its external services
//! - `orchestrator`: the frame loop and `PipelineContext`
//! - `preview`: preview sinks and the alarm
//! - `chain`: hash-chain and signature primitives
//! - `config`: `incidentd` configuration

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chain;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod incident;
pub mod ingest;
pub mod orchestrator;
pub mod preview;
pub mod recorder;
pub mod site;
pub mod smoothing;

pub use chain::{hash_entry, sign_entry, signing_key_from_seed, verify_entry_signature};
pub use detect::{BoundingRegion, Detection, DetectorAdapter, DetectorBackend, ScriptedBackend};
pub use evidence::{
    AlertStatus, ContentHandle, ContentStore, DispatchSummary, EvidenceDispatcher, EvidenceRecord,
    FinalizationPipeline, FinalizationRequest, Ledger, LedgerReceipt, Messenger, Stage,
    StageFailure,
};
pub use frame::Frame;
pub use incident::{
    Arbiter, FinalizationQueue, IncidentMachine, IncidentSession, IncidentState, Transition,
};
pub use ingest::{FileConfig, FileSource, FrameSource, VecSource};
pub use orchestrator::{
    DetectionPolicy, Orchestrator, PipelineContext, RecordingPlan, RunSummary, StopReason,
};
pub use recorder::{read_clip, Clip, ClipCodec, ClipRecorder, ClipSpec, RecorderError};
pub use site::{Geolocation, SiteProbe, SiteSnapshot};
pub use smoothing::TemporalSmoother;

// -------------------- Incident Classes --------------------

/// The fixed set of incident classes watched by the pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IncidentClass {
    Collision,
    Fire,
    ViolentAct,
}

impl IncidentClass {
    pub const ALL: [IncidentClass; 3] = [
        IncidentClass::Collision,
        IncidentClass::Fire,
        IncidentClass::ViolentAct,
    ];

    /// Stable index, used for per-class arrays.
    pub fn index(self) -> usize {
        match self {
            IncidentClass::Collision => 0,
            IncidentClass::Fire => 1,
            IncidentClass::ViolentAct => 2,
        }
    }

    /// Uppercase tag used as the clip filename prefix.
    pub fn file_tag(self) -> &'static str {
        match self {
            IncidentClass::Collision => "COLLISION",
            IncidentClass::Fire => "FIRE",
            IncidentClass::ViolentAct => "VIOLENCE",
        }
    }

    /// On-screen banner text while the class is active.
    pub fn banner(self) -> &'static str {
        match self {
            IncidentClass::Collision => "COLLISION DETECTED!",
            IncidentClass::Fire => "FIRE DETECTED!",
            IncidentClass::ViolentAct => "VIOLENCE DETECTED!",
        }
    }

    /// True when the class is scored per frame rather than per object.
    pub fn is_continuous(self) -> bool {
        matches!(self, IncidentClass::ViolentAct)
    }
}

impl fmt::Display for IncidentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentClass::Collision => write!(f, "Collision"),
            IncidentClass::Fire => write!(f, "Fire"),
            IncidentClass::ViolentAct => write!(f, "Violence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_indices_are_dense_and_unique() {
        let mut seen = [false; 3];
        for class in IncidentClass::ALL {
            assert!(!seen[class.index()]);
            seen[class.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn only_violent_act_is_continuous() {
        assert!(!IncidentClass::Collision.is_continuous());
        assert!(!IncidentClass::Fire.is_continuous());
        assert!(IncidentClass::ViolentAct.is_continuous());
    }
}
