mod adapter;
mod backend;
pub mod backends;
mod result;

pub use adapter::DetectorAdapter;
pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::{ScheduleEntry, ScriptedBackend};
pub use result::{scalar_score, BoundingRegion, Detection};
