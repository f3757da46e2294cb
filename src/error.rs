//! Error types shared by the UI-side core and the host process

use serde::{Deserialize, Serialize};

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error payload carried by `error` channel events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

pub const CODE_NETWORK: &str = "NETWORK_ERROR";
pub const CODE_IO: &str = "IO_ERROR";
pub const CODE_SERVER: &str = "SERVER_ERROR";
pub const CODE_PATH_TYPE: &str = "PATH_TYPE_ERROR";
pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";
pub const CODE_ABORTED: &str = "ABORTED";
pub const CODE_UNKNOWN_CHANNEL: &str = "UNKNOWN_CHANNEL";
pub const CODE_UNKNOWN: &str = "UNKNOWN_ERROR";

impl HostError {
    pub fn new(message: impl Into<String>, code: &str) -> Self {
        Self {
            message: message.into(),
            code: Some(code.to_string()),
            status: None,
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            message: format!("Server responded with status {}!", status),
            code: Some(CODE_SERVER.to_string()),
            status: Some(status),
        }
    }

    pub fn aborted() -> Self {
        Self::new("Transfer aborted", CODE_ABORTED)
    }

    pub fn is_aborted(&self) -> bool {
        self.code.as_deref() == Some(CODE_ABORTED)
    }
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::new(err.to_string(), CODE_IO)
    }
}

impl From<reqwest::Error> for HostError {
    fn from(err: reqwest::Error) -> Self {
        HostError::new(err.to_string(), CODE_NETWORK)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("host channel closed")]
    ChannelClosed,

    #[error("host error: {0}")]
    Host(HostError),

    #[error("server error {code}: {message}")]
    Server { message: String, code: String },

    #[error("{remote} is already queued for {direction}")]
    Duplicate { direction: String, remote: String },

    #[error("queue index {index} is out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Service is disabled due to server health check!")]
    ServiceDisabled,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("This operation requires user to be an admin!")]
    AdminRequired,

    #[error("queue drained after {remote} failed")]
    QueueDrained { remote: String },

    #[error("malformed event on {channel}: {reason}")]
    Malformed { channel: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<HostError> for BridgeError {
    fn from(err: HostError) -> Self {
        BridgeError::Host(err)
    }
}

impl BridgeError {
    /// Short machine-readable code, mirrors `HostError::code` for host errors.
    pub fn code(&self) -> &str {
        match self {
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Host(err) => err.code.as_deref().unwrap_or(CODE_UNKNOWN),
            BridgeError::Server { code, .. } => code,
            BridgeError::Duplicate { .. } => "DUPLICATE",
            BridgeError::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            BridgeError::ServiceDisabled => "SERVICE_DISABLED",
            BridgeError::NotAuthenticated => "NOT_AUTHENTICATED",
            BridgeError::AdminRequired => "ADMIN_REQUIRED",
            BridgeError::QueueDrained { .. } => "QUEUE_DRAINED",
            BridgeError::Malformed { .. } => "MALFORMED_EVENT",
            BridgeError::Io(_) => CODE_IO,
            BridgeError::Http(_) => CODE_NETWORK,
            BridgeError::Json(_) => "JSON_ERROR",
        }
    }
}
