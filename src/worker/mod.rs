//! Background operations: a FIFO queue per [`Worker`], streaming downloads,
//! batch archive and delete, previews, with retry and cancellation.

mod archive;
mod buckets;
mod context;
mod delete;
mod download;
mod list;
mod queue;
pub mod types;

pub use queue::{EventReceiver, Worker};
pub use types::{
    OperationId, OperationKind, OperationOutput, OperationRequest, OperationResult, OperationStatus,
    Progress, WorkerEvent,
};
