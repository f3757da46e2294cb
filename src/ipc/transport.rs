//! Transports carrying frames across the process boundary
//!
//! - `local_pair`: in-process channels, used by tests and embedded hosts
//! - `client_over` / `host_over`: JSON lines over any async byte stream
//! - `spawn_host_process`: the host binary as a child over stdin/stdout

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::types::{ChannelEvent, HostCall};
use crate::error::{BridgeError, BridgeResult};

/// UI end: sends calls, receives events.
pub struct ClientTransport {
    pub outbound: mpsc::UnboundedSender<HostCall>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Host end: receives calls, sends events.
pub struct HostTransport {
    pub inbound: mpsc::UnboundedReceiver<HostCall>,
    pub outbound: mpsc::UnboundedSender<ChannelEvent>,
}

pub fn local_pair() -> (ClientTransport, HostTransport) {
    let (call_tx, call_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ClientTransport {
            outbound: call_tx,
            inbound: event_rx,
        },
        HostTransport {
            inbound: call_rx,
            outbound: event_tx,
        },
    )
}

pub fn client_over<R, W>(reader: R, writer: W) -> ClientTransport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, inbound) = json_lines::<ChannelEvent, HostCall, _, _>(reader, writer);
    ClientTransport { outbound, inbound }
}

pub fn host_over<R, W>(reader: R, writer: W) -> HostTransport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, inbound) = json_lines::<HostCall, ChannelEvent, _, _>(reader, writer);
    HostTransport { inbound, outbound }
}

/// Spawn the host binary and talk to it over its stdio.
pub fn spawn_host_process(program: &Path, args: &[String]) -> BridgeResult<(ClientTransport, Child)> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take().ok_or(BridgeError::ChannelClosed)?;
    let stdout = child.stdout.take().ok_or(BridgeError::ChannelClosed)?;
    Ok((client_over(stdout, stdin), child))
}

fn json_lines<In, Out, R, W>(
    reader: R,
    writer: W,
) -> (mpsc::UnboundedSender<Out>, mpsc::UnboundedReceiver<In>)
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::unbounded_channel::<In>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Out>();

    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("transport_read: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<In>(&line) {
                Ok(frame) => {
                    if in_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("transport_read: dropping malformed frame: {}", e),
            }
        }
        debug!("transport_read: stream ended");
    });

    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        while let Some(frame) = out_rx.recv().await {
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!("transport_write: failed to encode frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                warn!("transport_write: {}", e);
                break;
            }
        }
        let _ = SinkExt::<String>::close(&mut sink).await;
        debug!("transport_write: stream ended");
    });

    (out_tx, in_rx)
}
