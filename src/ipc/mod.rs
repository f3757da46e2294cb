//! Cross-boundary messaging between the UI side and the host process
//!
//! - `types`: request identities, call/event frames, channel names
//! - `channel`: correlated request/response exchanges
//! - `transport`: in-process and JSON-lines transports

mod channel;
pub mod transport;
pub mod types;

pub use channel::{Call, CallHandlers, CallOptions, CorrelatedChannel};
pub use transport::{local_pair, ClientTransport, HostTransport};
pub use types::{CallState, ChannelEvent, HostCall, RequestId};
