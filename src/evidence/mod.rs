//! Evidence finalization: upload -> notarize -> alert.
//!
//! - `FinalizationPipeline::run` executes the three stages for one clip and
//!   returns an `EvidenceRecord` describing how far it got.
//! - `EvidenceDispatcher` is the frame loop's `FinalizationQueue`: every
//!   request runs on its own thread; results go to a sink that logs them,
//!   journals them and counts them.
//! - External services sit behind `ContentStore`, `Ledger` and `Messenger`.

mod alert;
mod dispatch;
pub mod http;
mod ledger;
mod pipeline;
pub mod rpc;
pub mod sealed;
mod store;

pub use alert::{
    compose_alert, map_line, LinkShortener, LogMessenger, Messenger, TinyUrl, TwilioMessenger,
    LOCATION_UNKNOWN,
};
pub use dispatch::{DispatchSummary, EvidenceDispatcher};
pub use ledger::{Ledger, LedgerReceipt};
pub use pipeline::{
    AlertStatus, EvidenceRecord, FinalizationPipeline, FinalizationRequest, Stage, StageFailure,
    UPLOAD_RETRY_DELAY,
};
pub use rpc::{RpcLedger, RpcLedgerConfig};
pub use sealed::SealedLedger;
pub use store::{ContentHandle, ContentStore, LocalContentStore, PinataStore};
