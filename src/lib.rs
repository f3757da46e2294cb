//! fsbridge - client core for a desktop file-server app
//!
//! The UI side never touches the network or disk. It talks to a privileged
//! host through correlated calls (`ipc`), keeps per-direction transfer
//! queues (`transfer`) and cancels through a broadcast bus (`cancel`). The
//! host (`host`) performs the HTTP and filesystem work.

pub mod api;
pub mod cancel;
pub mod config;
pub mod error;
pub mod host;
pub mod ipc;
pub mod logging;
pub mod remote_path;
pub mod transfer;

use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub use api::ApiService;
pub use cancel::{CancelIntent, CancelScope, CancellationBus};
pub use config::AppConfig;
pub use error::{BridgeError, BridgeResult, HostError};
pub use host::{DesktopShell, HeadlessShell, Host};
pub use ipc::{ClientTransport, CorrelatedChannel};
pub use transfer::{Direction, TransferCoordinator, TransferHandle, TransferOutcome};

/// UI-side handle: server API plus the transfer queues, wired to one host.
pub struct Bridge {
    api: ApiService,
    transfers: TransferCoordinator,
    background: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Start the health probe, the optional periodic re-probe, and the
    /// logout drain on top of `transport`.
    pub fn connect(transport: ClientTransport, config: &AppConfig) -> BridgeResult<Self> {
        let api = ApiService::new(CorrelatedChannel::from_transport(transport));
        api.start_health_probe()?;

        let transfers = TransferCoordinator::new(api.clone());
        let mut background = vec![transfers.drain_on_logout(&api)];
        if let Some(every) = config.health_interval() {
            background.push(api.spawn_health_interval(every));
        }
        info!("bridge_connect: base={}", config.base_url());
        Ok(Self {
            api,
            transfers,
            background,
        })
    }

    pub fn api(&self) -> &ApiService {
        &self.api
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.transfers
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

/// Serve the host on this process's stdin/stdout until stdin closes.
pub async fn run_host(config: AppConfig, shell: Arc<dyn DesktopShell>) -> BridgeResult<()> {
    let transport = ipc::transport::host_over(tokio::io::stdin(), tokio::io::stdout());
    Host::new(config, shell)?.serve(transport).await;
    Ok(())
}
