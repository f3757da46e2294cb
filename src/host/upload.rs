//! `file-upload` - streams a local file to the storage server

use futures_util::StreamExt;
use log::info;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::responder::Responder;
use super::server_api::{fs_url, parse_body};
use crate::config::AppConfig;
use crate::error::{HostError, CODE_BAD_REQUEST};
use crate::ipc::HostCall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadArgs {
    pub local: PathBuf,
    pub size: u64,
    pub token: String,
    pub remote: String,
}

impl UploadArgs {
    /// `(localPath, size, token, remotePath)`
    pub fn parse(call: &HostCall) -> Result<Self, HostError> {
        let missing = |what: &str| HostError::new(format!("file-upload requires {}", what), CODE_BAD_REQUEST);
        Ok(Self {
            local: PathBuf::from(call.str_arg(0).ok_or_else(|| missing("a local path"))?),
            size: call
                .arg(1)
                .and_then(Value::as_u64)
                .ok_or_else(|| missing("a size"))?,
            token: call.str_arg(2).ok_or_else(|| missing("a token"))?.to_string(),
            remote: call.str_arg(3).ok_or_else(|| missing("a remote path"))?.to_string(),
        })
    }
}

pub(crate) async fn upload_file(
    client: &Client,
    config: &AppConfig,
    responder: &Responder,
    args: &UploadArgs,
    cancel: &CancellationToken,
) -> Result<Value, HostError> {
    let file = File::open(&args.local).await?;
    let url = fs_url(config, &args.remote, &args.token)?;
    info!(
        "upload_start: {} -> {} size={}",
        args.local.display(),
        args.remote,
        args.size
    );

    let progress = responder.clone();
    let mut sent: u64 = 0;
    let stream = ReaderStream::with_capacity(file, config.read_chunk_size.max(1)).inspect(
        move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                progress.progress(sent);
            }
        },
    );

    let request = client
        .post(url)
        .header(CONTENT_LENGTH, args.size)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(Body::wrap_stream(stream));

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("upload_cancelled: {}", args.remote);
            return Err(HostError::aborted());
        }
        response = request.send() => response?,
    };

    let status = response.status().as_u16();
    if status != 200 {
        return Err(HostError::with_status(status));
    }
    let body = response.bytes().await?;
    info!("upload_complete: {}", args.remote);
    Ok(json!({ "status": status, "body": parse_body(&body) }))
}
