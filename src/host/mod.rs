//! Privileged host process
//!
//! Receives `HostCall` frames, performs the network and filesystem work, and
//! answers with `ChannelEvent`s tagged with the caller's identity. Every call
//! runs on its own task; only `file-cancel` is handled inline so it observes
//! every transfer registered before it.

mod dialogs;
mod download;
mod registry;
mod responder;
mod server_api;
mod upload;

pub use dialogs::{DesktopShell, HeadlessShell};

use log::{debug, info, warn};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancel::{CancelIntent, CancelScope};
use crate::config::AppConfig;
use crate::error::{BridgeResult, HostError, CODE_UNKNOWN_CHANNEL};
use crate::ipc::types::{
    FILE_CANCEL, FILE_DOWNLOAD, FILE_UPLOAD, NOTIFY, OPEN_FILES, SAVE_FILE, SAVE_FILES, SERVER_API,
};
use crate::ipc::{ChannelEvent, HostCall, HostTransport};
use crate::transfer::Direction;
use download::DownloadArgs;
use registry::TransferRegistry;
use responder::Responder;
use upload::UploadArgs;

#[derive(Clone)]
pub struct Host {
    config: Arc<AppConfig>,
    client: Client,
    shell: Arc<dyn DesktopShell>,
    transfers: TransferRegistry,
}

impl Host {
    pub fn new(config: AppConfig, shell: Arc<dyn DesktopShell>) -> BridgeResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("fsbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            client,
            shell,
            transfers: TransferRegistry::default(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Serve calls until the UI side hangs up.
    pub async fn serve(self, transport: HostTransport) {
        let HostTransport {
            mut inbound,
            outbound,
        } = transport;
        info!("host_serve: ready base={}", self.config.base_url());
        while let Some(call) = inbound.recv().await {
            self.dispatch(call, &outbound);
        }
        info!("host_serve: client disconnected");
    }

    fn dispatch(&self, call: HostCall, outbound: &mpsc::UnboundedSender<ChannelEvent>) {
        debug!("host_call: {}:{}", call.channel, call.id);
        let responder = Responder::new(&call, outbound.clone());
        let channel = call.channel.clone();
        match channel.as_str() {
            FILE_CANCEL => self.cancel(&call),
            NOTIFY => {
                let title = call.str_arg(0).unwrap_or_default().to_string();
                let message = call.str_arg(1).unwrap_or_default().to_string();
                let shell = Arc::clone(&self.shell);
                tokio::spawn(async move { dialogs::notify(&shell, title, message).await });
            }
            SERVER_API => {
                let host = self.clone();
                tokio::spawn(async move {
                    let result = server_api::server_api(&host.client, &host.config, &call).await;
                    responder.finish(result);
                });
            }
            FILE_UPLOAD => self.start_upload(&call, responder),
            FILE_DOWNLOAD => self.start_download(&call, responder),
            OPEN_FILES | SAVE_FILE | SAVE_FILES => {
                let shell = Arc::clone(&self.shell);
                tokio::spawn(async move {
                    let result = match call.channel.as_str() {
                        OPEN_FILES => dialogs::open_files(&shell).await,
                        SAVE_FILE => dialogs::save_file(&shell).await,
                        _ => dialogs::save_files(&shell).await,
                    };
                    responder.finish(result);
                });
            }
            other => {
                warn!("host_call: unknown channel {}", other);
                responder.error(&HostError::new(
                    format!("Unknown channel {}", other),
                    CODE_UNKNOWN_CHANNEL,
                ));
            }
        }
    }

    fn cancel(&self, call: &HostCall) {
        let scope = match call.arg(0).cloned().map(serde_json::from_value::<CancelScope>) {
            Some(Ok(scope)) => scope,
            _ => {
                warn!("host_cancel: invalid scope {:?}", call.arg(0));
                return;
            }
        };
        let intent = CancelIntent {
            scope,
            remote: call.str_arg(1).map(str::to_string),
        };
        let cancelled = self.transfers.cancel(&intent);
        debug!("host_cancel: scope={} matched={}", scope, cancelled);
    }

    fn start_upload(&self, call: &HostCall, responder: Responder) {
        let args = match UploadArgs::parse(call) {
            Ok(args) => args,
            Err(err) => return responder.error(&err),
        };
        // Registered before spawning so a cancel right behind this call finds it.
        let guard = self.transfers.register(Direction::Upload, &args.remote);
        let host = self.clone();
        tokio::spawn(async move {
            responder.start();
            let result =
                upload::upload_file(&host.client, &host.config, &responder, &args, guard.token())
                    .await;
            drop(guard);
            responder.finish(result);
        });
    }

    fn start_download(&self, call: &HostCall, responder: Responder) {
        let args = match DownloadArgs::parse(call) {
            Ok(args) => args,
            Err(err) => return responder.error(&err),
        };
        let guard = self.transfers.register(Direction::Download, &args.remote);
        let host = self.clone();
        tokio::spawn(async move {
            responder.start();
            let result =
                download::download_file(&host.client, &host.config, &responder, &args, guard.token())
                    .await;
            drop(guard);
            responder.finish(result);
        });
    }
}
