//! Owner of the upload and download queues

use log::info;
use std::path::PathBuf;
use tokio::task::JoinHandle;

use super::operation::TransferContext;
use super::queue::TransferQueue;
use super::types::{Direction, QueueSnapshot, TransferHandle, TransferRequest};
use crate::api::ApiService;
use crate::cancel::{CancelIntent, CancelScope, CancellationBus};
use crate::error::BridgeResult;

/// Both direction queues plus the bus they cancel through. Each instance is
/// fully independent, so tests can build as many as they like.
#[derive(Clone)]
pub struct TransferCoordinator {
    bus: CancellationBus,
    uploads: TransferQueue,
    downloads: TransferQueue,
}

impl TransferCoordinator {
    pub fn new(api: ApiService) -> Self {
        Self::with_bus(api, CancellationBus::new())
    }

    pub fn with_bus(api: ApiService, bus: CancellationBus) -> Self {
        let ctx = TransferContext {
            api,
            bus: bus.clone(),
        };
        Self {
            bus,
            uploads: TransferQueue::spawn(Direction::Upload, ctx.clone()),
            downloads: TransferQueue::spawn(Direction::Download, ctx),
        }
    }

    pub fn bus(&self) -> &CancellationBus {
        &self.bus
    }

    pub fn queue(&self, direction: Direction) -> &TransferQueue {
        match direction {
            Direction::Upload => &self.uploads,
            Direction::Download => &self.downloads,
        }
    }

    pub fn enqueue(&self, request: TransferRequest) -> TransferHandle {
        self.queue(request.direction).enqueue(request)
    }

    pub fn download(
        &self,
        remote: impl Into<String>,
        local: impl Into<PathBuf>,
        size: u64,
    ) -> TransferHandle {
        self.enqueue(TransferRequest::download(remote, local, size))
    }

    pub fn upload(
        &self,
        local: impl Into<PathBuf>,
        size: u64,
        remote: impl Into<String>,
    ) -> TransferHandle {
        self.enqueue(TransferRequest::upload(local, size, remote))
    }

    pub fn cancel_current(&self, direction: Direction) {
        self.queue(direction).cancel_current();
    }

    pub fn cancel_remote(&self, direction: Direction, remote: &str) {
        self.queue(direction).cancel_remote(remote);
    }

    /// Cancel every active operation in both directions.
    pub fn cancel_everything(&self) {
        self.bus.publish(CancelIntent::current(CancelScope::Any));
    }

    pub async fn cancel_at(&self, direction: Direction, index: usize) -> BridgeResult<()> {
        self.queue(direction).cancel_at(index).await
    }

    pub async fn drain_all(&self) -> BridgeResult<()> {
        self.uploads.drain_all().await?;
        self.downloads.drain_all().await
    }

    pub async fn snapshot(&self, direction: Direction) -> BridgeResult<QueueSnapshot> {
        self.queue(direction).snapshot().await
    }

    pub async fn is_idle(&self, direction: Direction) -> BridgeResult<bool> {
        Ok(self.snapshot(direction).await?.is_idle())
    }

    /// Drain both queues whenever the session goes from authenticated to
    /// signed out.
    pub fn drain_on_logout(&self, api: &ApiService) -> JoinHandle<()> {
        let mut auth = api.auth_changes();
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut was_authenticated = *auth.borrow_and_update();
            while auth.changed().await.is_ok() {
                let authenticated = *auth.borrow_and_update();
                if was_authenticated && !authenticated {
                    info!("transfer_coordinator: session ended -> draining queues");
                    if coordinator.drain_all().await.is_err() {
                        break;
                    }
                }
                was_authenticated = authenticated;
            }
        })
    }
}
