//! Transfer request, progress sink and queue snapshot types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::{BridgeError, BridgeResult};
use crate::ipc::types::{FILE_DOWNLOAD, FILE_UPLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// Host channel that performs this direction's transfer.
    pub fn channel(self) -> &'static str {
        match self {
            Direction::Upload => FILE_UPLOAD,
            Direction::Download => FILE_DOWNLOAD,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub direction: Direction,
    pub remote: String,
    pub local: PathBuf,
    /// Declared size in bytes, used to normalize progress.
    pub size: u64,
}

impl TransferRequest {
    pub fn download(remote: impl Into<String>, local: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            direction: Direction::Download,
            remote: remote.into(),
            local: local.into(),
            size,
        }
    }

    pub fn upload(local: impl Into<PathBuf>, size: u64, remote: impl Into<String>) -> Self {
        Self {
            direction: Direction::Upload,
            remote: remote.into(),
            local: local.into(),
            size,
        }
    }
}

#[derive(Debug)]
pub enum TransferEvent {
    /// Percentage, 0-100
    Progress(u32),
    Completed,
    /// Cancelled on request; not a failure.
    Aborted,
    Failed(BridgeError),
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Aborted,
}

/// Producer side of a transfer's progress stream. Terminal methods consume
/// the sink, so a transfer settles at most once.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ProgressSink {
    pub fn channel() -> (ProgressSink, TransferHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressSink { tx }, TransferHandle { rx })
    }

    pub fn progress(&self, percent: u32) {
        let _ = self.tx.send(TransferEvent::Progress(percent));
    }

    pub fn complete(self) {
        let _ = self.tx.send(TransferEvent::Completed);
    }

    pub fn abort(self) {
        let _ = self.tx.send(TransferEvent::Aborted);
    }

    pub fn fail(self, error: BridgeError) {
        let _ = self.tx.send(TransferEvent::Failed(error));
    }
}

/// Caller side of a transfer's progress stream.
#[derive(Debug)]
pub struct TransferHandle {
    rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl TransferHandle {
    pub async fn next(&mut self) -> Option<TransferEvent> {
        self.rx.recv().await
    }

    /// Drain progress updates and resolve with the terminal outcome.
    pub async fn wait(mut self) -> BridgeResult<TransferOutcome> {
        while let Some(event) = self.rx.recv().await {
            match event {
                TransferEvent::Progress(_) => {}
                TransferEvent::Completed => return Ok(TransferOutcome::Completed),
                TransferEvent::Aborted => return Ok(TransferOutcome::Aborted),
                TransferEvent::Failed(err) => return Err(err),
            }
        }
        Err(BridgeError::ChannelClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedTransfer {
    pub remote: String,
    pub local: String,
    pub size: u64,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub direction: Direction,
    pub current: Option<String>,
    pub pending: Vec<QueuedTransfer>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }
}

/// Floor of `bytes * 100 / size`, clamped to 100. Unknown size reports 0.
pub fn percent_of(bytes: u64, size: u64) -> u32 {
    if size == 0 {
        return 0;
    }
    let percent = (bytes as u128 * 100) / size as u128;
    std::cmp::min(percent, 100) as u32
}
