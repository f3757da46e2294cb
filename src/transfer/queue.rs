//! Per-direction transfer queue
//!
//! One actor task owns the pending list and the "current" marker, so every
//! mutation is serialized through its command channel. Operations run on
//! their own tasks and report back with `Finished`.

use log::{debug, info, warn};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

use super::operation::{run_operation, OperationOutcome, TransferContext};
use super::types::{
    Direction, ProgressSink, QueueSnapshot, QueuedTransfer, TransferHandle, TransferRequest,
};
use crate::cancel::{CancelIntent, CancelScope};
use crate::error::{BridgeError, BridgeResult};
use crate::remote_path;

enum QueueCommand {
    Enqueue {
        request: TransferRequest,
        sink: ProgressSink,
    },
    CancelAt {
        index: usize,
        respond: oneshot::Sender<BridgeResult<()>>,
    },
    DrainAll {
        respond: oneshot::Sender<()>,
    },
    Finished {
        remote: String,
        outcome: OperationOutcome,
    },
    Snapshot {
        respond: oneshot::Sender<QueueSnapshot>,
    },
}

struct PendingEntry {
    request: TransferRequest,
    sink: ProgressSink,
    enqueued_at: i64,
}

impl PendingEntry {
    fn describe(&self) -> QueuedTransfer {
        QueuedTransfer {
            remote: self.request.remote.clone(),
            local: self.request.local.to_string_lossy().to_string(),
            size: self.request.size,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Handle to one direction's queue actor.
#[derive(Clone)]
pub struct TransferQueue {
    direction: Direction,
    ctx: TransferContext,
    sender: mpsc::UnboundedSender<QueueCommand>,
}

impl TransferQueue {
    pub fn spawn(direction: Direction, ctx: TransferContext) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = QueueWorker {
            direction,
            ctx: ctx.clone(),
            commands: sender.downgrade(),
            current: None,
            pending: VecDeque::new(),
        };
        tokio::spawn(worker.run(receiver));
        Self {
            direction,
            ctx,
            sender,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Admit `request` unless its remote path is already current or pending.
    /// A rejected request fails its handle with `Duplicate`.
    pub fn enqueue(&self, request: TransferRequest) -> TransferHandle {
        let (sink, handle) = ProgressSink::channel();
        if let Err(mpsc::error::SendError(command)) =
            self.sender.send(QueueCommand::Enqueue { request, sink })
        {
            if let QueueCommand::Enqueue { sink, .. } = command {
                sink.fail(BridgeError::ChannelClosed);
            }
        }
        handle
    }

    /// Cancel whichever operation is running in this direction.
    pub fn cancel_current(&self) {
        let scope = CancelScope::from(self.direction);
        let observers = self.ctx.bus.publish(CancelIntent::current(scope));
        debug!("transfer_queue: {} cancel current -> observers={}", self.direction, observers);
    }

    /// Cancel the running operation only if it is transferring `remote`.
    pub fn cancel_remote(&self, remote: &str) {
        let scope = CancelScope::from(self.direction);
        self.ctx
            .bus
            .publish(CancelIntent::path(scope, remote_path::normalize(remote)));
    }

    /// Remove the pending entry at `index` without touching the bus.
    pub async fn cancel_at(&self, index: usize) -> BridgeResult<()> {
        let (respond, receiver) = oneshot::channel();
        self.sender
            .send(QueueCommand::CancelAt { index, respond })
            .map_err(|_| BridgeError::ChannelClosed)?;
        receiver.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    /// Drop every pending entry and cancel the running operation, if any.
    pub async fn drain_all(&self) -> BridgeResult<()> {
        let (respond, receiver) = oneshot::channel();
        self.sender
            .send(QueueCommand::DrainAll { respond })
            .map_err(|_| BridgeError::ChannelClosed)?;
        receiver.await.map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> BridgeResult<QueueSnapshot> {
        let (respond, receiver) = oneshot::channel();
        self.sender
            .send(QueueCommand::Snapshot { respond })
            .map_err(|_| BridgeError::ChannelClosed)?;
        receiver.await.map_err(|_| BridgeError::ChannelClosed)
    }
}

struct QueueWorker {
    direction: Direction,
    ctx: TransferContext,
    commands: mpsc::WeakUnboundedSender<QueueCommand>,
    current: Option<String>,
    pending: VecDeque<PendingEntry>,
}

impl QueueWorker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<QueueCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                QueueCommand::Enqueue { request, sink } => self.admit(request, sink),
                QueueCommand::CancelAt { index, respond } => {
                    let _ = respond.send(self.remove_pending(index));
                }
                QueueCommand::DrainAll { respond } => {
                    self.drain_all();
                    let _ = respond.send(());
                }
                QueueCommand::Finished { remote, outcome } => self.finished(remote, outcome),
                QueueCommand::Snapshot { respond } => {
                    let _ = respond.send(self.snapshot());
                }
            }
        }
        debug!("transfer_queue: {} worker stopped", self.direction);
    }

    fn is_queued(&self, remote: &str) -> bool {
        self.current.as_deref() == Some(remote)
            || self.pending.iter().any(|entry| entry.request.remote == remote)
    }

    fn admit(&mut self, mut request: TransferRequest, sink: ProgressSink) {
        request.remote = remote_path::normalize(&request.remote);
        if self.is_queued(&request.remote) {
            info!(
                "transfer_queue: {} {} -> rejected duplicate",
                self.direction, request.remote
            );
            sink.fail(BridgeError::Duplicate {
                direction: self.direction.to_string(),
                remote: request.remote,
            });
            return;
        }
        info!(
            "transfer_queue: {} {} -> enqueued position={}",
            self.direction,
            request.remote,
            self.pending.len()
        );
        self.pending.push_back(PendingEntry {
            request,
            sink,
            enqueued_at: chrono::Utc::now().timestamp(),
        });
        if self.current.is_none() {
            self.start_next();
        }
    }

    fn start_next(&mut self) {
        let Some(entry) = self.pending.pop_front() else {
            self.current = None;
            debug!("transfer_queue: {} -> idle", self.direction);
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            entry.sink.fail(BridgeError::ChannelClosed);
            self.current = None;
            return;
        };

        let remote = entry.request.remote.clone();
        self.current = Some(remote.clone());
        info!("transfer_queue: {} {} -> started", self.direction, remote);

        // Subscribed here, not on the task, so a drain right after the start
        // still reaches the operation.
        let subscription = self.ctx.bus.subscribe();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let outcome = run_operation(&ctx, &entry.request, subscription, entry.sink).await;
            let _ = commands.send(QueueCommand::Finished { remote, outcome });
        });
    }

    fn finished(&mut self, remote: String, outcome: OperationOutcome) {
        if self.current.as_deref() != Some(remote.as_str()) {
            warn!(
                "transfer_queue: {} {} -> finished but not current",
                self.direction, remote
            );
            return;
        }
        self.current = None;
        match outcome {
            OperationOutcome::Completed | OperationOutcome::Aborted => self.start_next(),
            OperationOutcome::Failed => {
                let discarded = self.pending.len();
                for entry in self.pending.drain(..) {
                    entry.sink.fail(BridgeError::QueueDrained {
                        remote: remote.clone(),
                    });
                }
                info!(
                    "transfer_queue: {} {} failed -> drained {} pending",
                    self.direction, remote, discarded
                );
            }
        }
    }

    fn remove_pending(&mut self, index: usize) -> BridgeResult<()> {
        match self.pending.remove(index) {
            Some(entry) => {
                info!(
                    "transfer_queue: {} {} -> removed at {}",
                    self.direction, entry.request.remote, index
                );
                entry.sink.abort();
                Ok(())
            }
            None => Err(BridgeError::IndexOutOfRange {
                index,
                len: self.pending.len(),
            }),
        }
    }

    fn drain_all(&mut self) {
        let drained = self.pending.len();
        for entry in self.pending.drain(..) {
            entry.sink.abort();
        }
        if self.current.is_some() {
            self.ctx.bus.publish(CancelIntent::current(CancelScope::Any));
        }
        info!(
            "transfer_queue: {} drain -> removed {} pending, active={}",
            self.direction,
            drained,
            self.current.is_some()
        );
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            direction: self.direction,
            current: self.current.clone(),
            pending: self.pending.iter().map(PendingEntry::describe).collect(),
        }
    }
}
