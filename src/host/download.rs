//! `file-download` - streams a remote file to disk

use futures_util::StreamExt;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::responder::Responder;
use super::server_api::fs_url;
use crate::config::AppConfig;
use crate::error::{HostError, CODE_BAD_REQUEST};
use crate::ipc::HostCall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadArgs {
    pub remote: String,
    pub local: PathBuf,
    pub token: String,
}

impl DownloadArgs {
    /// `(remotePath, localPath, token)`
    pub fn parse(call: &HostCall) -> Result<Self, HostError> {
        let missing = |what: &str| HostError::new(format!("file-download requires {}", what), CODE_BAD_REQUEST);
        Ok(Self {
            remote: call.str_arg(0).ok_or_else(|| missing("a remote path"))?.to_string(),
            local: PathBuf::from(call.str_arg(1).ok_or_else(|| missing("a local path"))?),
            token: call.str_arg(2).ok_or_else(|| missing("a token"))?.to_string(),
        })
    }
}

/// Remove a partially written file. Failures are logged only.
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("download_cleanup: removed {}", path.display()),
        Err(e) => warn!("download_cleanup: failed to remove {}: {}", path.display(), e),
    }
}

pub(crate) async fn download_file(
    client: &Client,
    config: &AppConfig,
    responder: &Responder,
    args: &DownloadArgs,
    cancel: &CancellationToken,
) -> Result<Value, HostError> {
    let url = fs_url(config, &args.remote, &args.token)?;
    info!("download_start: {} -> {}", args.remote, args.local.display());

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("download_cancelled: {} before response", args.remote);
            return Err(HostError::aborted());
        }
        response = client.get(url).send() => response?,
    };

    let status = response.status().as_u16();
    if status != 200 {
        return Err(HostError::with_status(status));
    }

    if let Some(parent) = args.local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(&args.local).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("download_cancelled: {} at {} bytes", args.remote, received);
                drop(file);
                discard_partial(&args.local).await;
                return Err(HostError::aborted());
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                file.write_all(&chunk).await?;
                received += chunk.len() as u64;
                responder.progress(received);
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    file.flush().await?;
    info!("download_complete: {} bytes={}", args.remote, received);
    Ok(json!({ "status": 200 }))
}
