//! Transfer operation - drives one upload or download to completion, abort
//! or failure, and reconciles partial state after an abort.

use log::{debug, info, warn};
use serde_json::{json, Value};

use super::types::{percent_of, Direction, ProgressSink, TransferRequest};
use crate::api::ApiService;
use crate::cancel::{CancelScope, CancelSubscription, CancellationBus};
use crate::error::{BridgeError, CODE_SERVER};
use crate::ipc::types::FILE_CANCEL;
use crate::ipc::{CallOptions, CallState};

/// Shared handles every operation runs against.
#[derive(Clone)]
pub struct TransferContext {
    pub api: ApiService,
    pub bus: CancellationBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    Aborted,
    Failed,
}

enum Settlement {
    Completed,
    Aborted,
    Failed(BridgeError),
}

/// Run `request` and settle `sink` exactly once.
///
/// `subscription` must be taken before the operation is handed to its task,
/// so intents published while the task is still being scheduled are seen.
pub async fn run_operation(
    ctx: &TransferContext,
    request: &TransferRequest,
    mut subscription: CancelSubscription,
    sink: ProgressSink,
) -> OperationOutcome {
    let token = match session_token(&ctx.api) {
        Ok(token) => token,
        Err(err) => {
            subscription.unsubscribe();
            return settle_failed(request, sink, err);
        }
    };

    let settlement = execute(ctx, request, &token, subscription, &sink).await;
    match settlement {
        Settlement::Completed => {
            info!("transfer_status: {} {} -> completed", request.direction, request.remote);
            sink.complete();
            OperationOutcome::Completed
        }
        Settlement::Aborted => {
            compensate(ctx, request, &token).await;
            info!("transfer_status: {} {} -> aborted", request.direction, request.remote);
            sink.abort();
            OperationOutcome::Aborted
        }
        Settlement::Failed(err) => settle_failed(request, sink, err),
    }
}

fn session_token(api: &ApiService) -> Result<String, BridgeError> {
    if api.is_disabled() {
        return Err(BridgeError::ServiceDisabled);
    }
    api.token().ok_or(BridgeError::NotAuthenticated)
}

fn settle_failed(request: &TransferRequest, sink: ProgressSink, err: BridgeError) -> OperationOutcome {
    warn!(
        "transfer_status: {} {} -> failed error={}",
        request.direction, request.remote, err
    );
    sink.fail(err);
    OperationOutcome::Failed
}

fn call_args(request: &TransferRequest, token: &str) -> Vec<Value> {
    let local = request.local.to_string_lossy().to_string();
    match request.direction {
        Direction::Upload => vec![
            json!(local),
            json!(request.size),
            json!(token),
            json!(request.remote),
        ],
        Direction::Download => vec![json!(request.remote), json!(local), json!(token)],
    }
}

async fn execute(
    ctx: &TransferContext,
    request: &TransferRequest,
    token: &str,
    mut subscription: CancelSubscription,
    sink: &ProgressSink,
) -> Settlement {
    let channel = ctx.api.channel();
    let mut call = match channel.call(
        request.direction.channel(),
        call_args(request, token),
        CallOptions::default(),
    ) {
        Ok(call) => call,
        Err(e) => {
            subscription.unsubscribe();
            return Settlement::Failed(e);
        }
    };
    debug!("transfer_call: {} {} id={}", request.direction, request.remote, call.id());

    let mut aborted = false;
    let mut last_percent: Option<u32> = None;

    let settlement = loop {
        tokio::select! {
            biased;
            event = call.next_event() => {
                let Some(event) = event else {
                    break if aborted {
                        Settlement::Aborted
                    } else {
                        Settlement::Failed(BridgeError::ChannelClosed)
                    };
                };
                match event.state {
                    CallState::Start => {
                        info!("transfer_status: {} {} -> started", request.direction, request.remote);
                    }
                    CallState::Progress => {
                        if aborted {
                            continue;
                        }
                        let bytes = event.data.first().and_then(Value::as_u64).unwrap_or(0);
                        let percent = percent_of(bytes, request.size);
                        if last_percent != Some(percent) {
                            last_percent = Some(percent);
                            sink.progress(percent);
                        }
                    }
                    CallState::Done => {
                        if aborted && request.direction == Direction::Upload {
                            break Settlement::Aborted;
                        }
                        let status = event
                            .data
                            .first()
                            .and_then(|v| v.get("status"))
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        if aborted {
                            // The host finished writing before it saw the cancel.
                            if status == 200 {
                                info!("transfer_cancel: {} {} -> already complete", request.direction, request.remote);
                            } else {
                                break Settlement::Aborted;
                            }
                        } else if status != 200 {
                            break Settlement::Failed(BridgeError::Server {
                                message: format!("Server responded with status {}!", status),
                                code: CODE_SERVER.to_string(),
                            });
                        }
                        if last_percent != Some(100) {
                            sink.progress(100);
                        }
                        break Settlement::Completed;
                    }
                    CallState::Error => {
                        let err = event.host_error();
                        if aborted || err.is_aborted() {
                            break Settlement::Aborted;
                        }
                        break Settlement::Failed(BridgeError::Host(err));
                    }
                }
            }
            Some(intent) = subscription.recv(), if subscription.is_active() => {
                if !intent.matches(request.direction, &request.remote) {
                    continue;
                }
                info!(
                    "transfer_cancel: {} {} scope={}",
                    request.direction, request.remote, intent.scope
                );
                aborted = true;
                subscription.unsubscribe();
                let scope = CancelScope::from(request.direction);
                if let Err(e) = channel.send(FILE_CANCEL, vec![json!(scope), json!(request.remote)]) {
                    warn!("transfer_cancel: host unreachable: {}", e);
                    break Settlement::Aborted;
                }
            }
        }
    };

    subscription.unsubscribe();
    settlement
}

/// Best-effort cleanup of partial state after an abort. Failures are logged.
///
/// Uses the token the transfer ran with; a logout clears the session
/// before the drain reaches here.
async fn compensate(ctx: &TransferContext, request: &TransferRequest, token: &str) {
    match request.direction {
        // The host drops its partially written file when it handles the cancel.
        Direction::Download => {
            debug!("transfer_cleanup: download {} handled by host", request.remote);
        }
        Direction::Upload => {
            if let Err(e) = ctx.api.remove_with_token(&request.remote, token).await {
                warn!("transfer_cleanup: failed to delete partial upload {}: {}", request.remote, e);
            }
        }
    }
}
