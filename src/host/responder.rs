use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::HostError;
use crate::ipc::{ChannelEvent, HostCall, RequestId};

/// Emits the response events of one host call.
#[derive(Clone)]
pub(crate) struct Responder {
    channel: String,
    id: RequestId,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
}

impl Responder {
    pub fn new(call: &HostCall, outbound: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            channel: call.channel.clone(),
            id: call.id.clone(),
            outbound,
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if self.outbound.send(event).is_err() {
            debug!("host_respond: {}:{} -> client gone", self.channel, self.id);
        }
    }

    pub fn start(&self) {
        self.emit(ChannelEvent::start(&self.channel, &self.id));
    }

    pub fn progress(&self, bytes: u64) {
        self.emit(ChannelEvent::progress(&self.channel, &self.id, bytes));
    }

    pub fn done(&self, value: Value) {
        self.emit(ChannelEvent::done(&self.channel, &self.id, value));
    }

    pub fn error(&self, error: &HostError) {
        self.emit(ChannelEvent::error(&self.channel, &self.id, error));
    }

    pub fn finish(&self, result: Result<Value, HostError>) {
        match result {
            Ok(value) => self.done(value),
            Err(err) => {
                debug!("host_respond: {}:{} -> error {}", self.channel, self.id, err);
                self.error(&err)
            }
        }
    }
}
