pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{FnBackend, ScheduleEntry, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::{TractFrameClassifier, TractObjectDetector};
