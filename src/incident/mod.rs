//! Incident decision logic.
//!
//! - `Arbiter`: the set of active classes and the cross-class onset rule.
//! - `IncidentSession`: onset metadata plus the clip path for one incident.
//! - `IncidentMachine`: Idle -> Active -> Finalizing -> Idle for one class,
//!   owning that class's `ClipRecorder` while active.

use anyhow::Result;
use serde::Serialize;
use std::fmt;

use crate::evidence::FinalizationRequest;
use crate::preview::Alarm;
use crate::site::SiteProbe;

mod arbiter;
mod machine;
mod session;

pub use arbiter::Arbiter;
pub use machine::{IncidentMachine, MachineStats, RecordingSettings};
pub use session::{clip_file_name, IncidentSession, SessionMetadata};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum IncidentState {
    Idle,
    Active,
    /// Clip closed, hand-off in progress. Left as soon as the request is queued.
    Finalizing,
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentState::Idle => write!(f, "idle"),
            IncidentState::Active => write!(f, "active"),
            IncidentState::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// What one `step` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Idle and not triggered.
    None,
    /// Triggered while idle, but the arbiter refused the onset.
    Suppressed,
    Onset,
    Continued,
    /// Clip finalized and queued for the evidence pipeline.
    Ended,
    /// Recording failed; the clip was discarded.
    Aborted,
}

/// Receives finished clips. Implementations must not block the caller on
/// network I/O.
pub trait FinalizationQueue {
    fn enqueue(&self, request: FinalizationRequest) -> Result<()>;
}

/// Collaborators a machine needs while stepping.
pub struct SessionServices<'a> {
    pub arbiter: &'a mut Arbiter,
    pub site: &'a dyn SiteProbe,
    pub alarm: &'a dyn Alarm,
    pub queue: &'a dyn FinalizationQueue,
}
