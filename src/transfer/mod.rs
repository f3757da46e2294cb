//! Transfer subsystem
//!
//! - `types`: requests, progress sinks, snapshots
//! - `operation`: one upload or download, including abort cleanup
//! - `queue`: per-direction single-flight FIFO
//! - `coordinator`: owns both direction queues

mod coordinator;
mod operation;
mod queue;
pub mod types;

pub use coordinator::TransferCoordinator;
pub use operation::{run_operation, OperationOutcome, TransferContext};
pub use queue::TransferQueue;
pub use types::{
    percent_of, Direction, ProgressSink, QueueSnapshot, QueuedTransfer, TransferEvent,
    TransferHandle, TransferOutcome, TransferRequest,
};
