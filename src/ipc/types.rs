//! Frames exchanged between the UI side and the host process

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;

pub const SERVER_API: &str = "server-api";
pub const FILE_UPLOAD: &str = "file-upload";
pub const FILE_DOWNLOAD: &str = "file-download";
pub const FILE_CANCEL: &str = "file-cancel";
pub const OPEN_FILES: &str = "open-files";
pub const SAVE_FILE: &str = "save-file";
pub const SAVE_FILES: &str = "save-files";
pub const NOTIFY: &str = "notify";

/// Opaque token correlating one call with its response events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn forced(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical sub-channel a call's responses are delivered on.
pub fn listener_key(channel: &str, id: &RequestId) -> String {
    format!("{}:{}", channel, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Start,
    Progress,
    Done,
    Error,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Done | CallState::Error)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Start => write!(f, "start"),
            CallState::Progress => write!(f, "progress"),
            CallState::Done => write!(f, "done"),
            CallState::Error => write!(f, "error"),
        }
    }
}

/// UI -> host: `(id, ...args)` on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCall {
    pub channel: String,
    pub id: RequestId,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl HostCall {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|v| !v.is_null())
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(Value::as_str)
    }
}

/// Host -> UI: one tagged response in a call's event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: String,
    pub id: RequestId,
    #[serde(default)]
    pub data: Vec<Value>,
    pub state: CallState,
    #[serde(default)]
    pub close: bool,
}

impl ChannelEvent {
    pub fn listener_key(&self) -> String {
        listener_key(&self.channel, &self.id)
    }

    pub fn start(channel: &str, id: &RequestId) -> Self {
        Self::open(channel, id, CallState::Start, Vec::new())
    }

    pub fn progress(channel: &str, id: &RequestId, bytes: u64) -> Self {
        Self::open(channel, id, CallState::Progress, vec![Value::from(bytes)])
    }

    pub fn done(channel: &str, id: &RequestId, value: Value) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.clone(),
            data: vec![value],
            state: CallState::Done,
            close: true,
        }
    }

    pub fn error(channel: &str, id: &RequestId, error: &HostError) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.clone(),
            data: vec![serde_json::to_value(error).unwrap_or(Value::Null)],
            state: CallState::Error,
            close: true,
        }
    }

    fn open(channel: &str, id: &RequestId, state: CallState, data: Vec<Value>) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.clone(),
            data,
            state,
            close: false,
        }
    }

    /// Decode the first argument of an `error` event.
    pub fn host_error(&self) -> HostError {
        self.data
            .first()
            .cloned()
            .and_then(|v| serde_json::from_value::<HostError>(v).ok())
            .unwrap_or_else(|| HostError {
                message: format!("{} failed", self.channel),
                code: None,
                status: None,
            })
    }
}
