//! Correlated channel - many concurrent request/response exchanges over a
//! handful of named host channels, demultiplexed by request identity.

use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

use super::transport::ClientTransport;
use super::types::{listener_key, CallState, ChannelEvent, HostCall, RequestId};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Keep the listener after a closing event. The caller tears it down.
    pub keep_open: bool,
    /// Reuse a fixed identity instead of generating one.
    pub forced_id: Option<RequestId>,
}

impl CallOptions {
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    pub fn forced_id(mut self, id: impl Into<String>) -> Self {
        self.forced_id = Some(RequestId::forced(id));
        self
    }
}

type Handler = Box<dyn FnMut(Vec<Value>) + Send>;

/// Callbacks keyed by state; each receives the event's arguments positionally.
#[derive(Default)]
pub struct CallHandlers {
    handlers: HashMap<CallState, Handler>,
}

impl CallHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, state: CallState, handler: impl FnMut(Vec<Value>) + Send + 'static) -> Self {
        self.handlers.insert(state, Box::new(handler));
        self
    }

    fn invoke(&mut self, event: ChannelEvent) {
        if let Some(handler) = self.handlers.get_mut(&event.state) {
            handler(event.data);
        }
    }
}

struct Listener {
    serial: u64,
    keep_open: bool,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

struct Inner {
    outbound: mpsc::UnboundedSender<HostCall>,
    listeners: Mutex<HashMap<String, Listener>>,
    next_serial: AtomicU64,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_current(&self, key: &str, serial: u64) {
        let mut listeners = self.listeners();
        if listeners.get(key).is_some_and(|l| l.serial == serial) {
            listeners.remove(key);
        }
    }
}

#[derive(Clone)]
pub struct CorrelatedChannel {
    inner: Arc<Inner>,
}

impl CorrelatedChannel {
    /// Build a channel and spawn its inbound dispatcher on the current runtime.
    pub fn new(
        outbound: mpsc::UnboundedSender<HostCall>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        let inner = Arc::new(Inner {
            outbound,
            listeners: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        });
        tokio::spawn(run_dispatcher(Arc::downgrade(&inner), inbound));
        Self { inner }
    }

    pub fn from_transport(transport: ClientTransport) -> Self {
        Self::new(transport.outbound, transport.inbound)
    }

    /// Register a listener on `{channel}:{id}` and send `(id, ...args)`.
    pub fn call(&self, channel: &str, args: Vec<Value>, options: CallOptions) -> BridgeResult<Call> {
        let (tx, rx) = mpsc::unbounded_channel();
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let id = {
            let mut listeners = self.inner.listeners();
            let id = match options.forced_id {
                Some(id) => id,
                None => loop {
                    let candidate = RequestId::generate();
                    if !listeners.contains_key(&listener_key(channel, &candidate)) {
                        break candidate;
                    }
                },
            };
            let key = listener_key(channel, &id);
            if listeners
                .insert(
                    key,
                    Listener {
                        serial,
                        keep_open: options.keep_open,
                        tx,
                    },
                )
                .is_some()
            {
                debug!("ipc_listener: {}:{} re-armed", channel, id);
            }
            id
        };

        let call = Call {
            channel: channel.to_string(),
            id: id.clone(),
            serial,
            keep_open: options.keep_open,
            terminated: false,
            events: rx,
            owner: Arc::downgrade(&self.inner),
        };
        self.send_with_id(channel, id, args)?;
        Ok(call)
    }

    /// `call` with callbacks, driven on a background task.
    pub fn call_with_handlers(
        &self,
        channel: &str,
        args: Vec<Value>,
        handlers: CallHandlers,
        options: CallOptions,
    ) -> BridgeResult<RequestId> {
        let call = self.call(channel, args, options)?;
        let id = call.id().clone();
        tokio::spawn(async move {
            if let Err(e) = call.dispatch(handlers).await {
                debug!("ipc_call: handler dispatch ended: {}", e);
            }
        });
        Ok(id)
    }

    /// Fire-and-forget send with a fresh identity and no listener.
    pub fn send(&self, channel: &str, args: Vec<Value>) -> BridgeResult<RequestId> {
        let id = RequestId::generate();
        self.send_with_id(channel, id.clone(), args)?;
        Ok(id)
    }

    /// Send on an existing identity; an already registered listener receives the replies.
    pub fn send_with_id(&self, channel: &str, id: RequestId, args: Vec<Value>) -> BridgeResult<()> {
        self.inner
            .outbound
            .send(HostCall {
                channel: channel.to_string(),
                id,
                args,
            })
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Explicit teardown for keep-open listeners.
    pub fn close(&self, channel: &str, id: &RequestId) {
        self.inner.listeners().remove(&listener_key(channel, id));
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

async fn run_dispatcher(owner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = owner.upgrade() else {
            break;
        };
        let key = event.listener_key();
        let mut listeners = inner.listeners();
        let Some(listener) = listeners.get(&key) else {
            debug!("ipc_dispatch: no listener for {} ({})", key, event.state);
            continue;
        };
        let teardown = event.close && !listener.keep_open;
        if listener.tx.send(event).is_err() || teardown {
            listeners.remove(&key);
        }
    }

    // Host side is gone: dropping the senders ends every pending call.
    if let Some(inner) = owner.upgrade() {
        let mut listeners = inner.listeners();
        if !listeners.is_empty() {
            warn!("ipc_dispatch: inbound closed with {} open calls", listeners.len());
        }
        listeners.clear();
    }
}

/// One in-flight exchange. Dropping it releases its listener slot.
pub struct Call {
    channel: String,
    id: RequestId,
    serial: u64,
    keep_open: bool,
    terminated: bool,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    owner: Weak<Inner>,
}

impl Call {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event in delivery order; `None` after the terminal event or when
    /// the host side has gone away.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.terminated {
            return None;
        }
        let event = self.events.recv().await?;
        if event.state.is_terminal() && !self.keep_open {
            self.terminated = true;
        }
        Some(event)
    }

    /// Skip non-terminal events and resolve on `done` / `error`.
    pub async fn finish(mut self) -> BridgeResult<Vec<Value>> {
        while let Some(event) = self.next_event().await {
            match event.state {
                CallState::Done => return Ok(event.data),
                CallState::Error => return Err(BridgeError::Host(event.host_error())),
                CallState::Start | CallState::Progress => {}
            }
        }
        Err(BridgeError::ChannelClosed)
    }

    /// Route every event to its handler until the exchange ends.
    pub async fn dispatch(mut self, mut handlers: CallHandlers) -> BridgeResult<()> {
        while let Some(event) = self.next_event().await {
            handlers.invoke(event);
            if self.terminated {
                return Ok(());
            }
        }
        Err(BridgeError::ChannelClosed)
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.remove_if_current(&listener_key(&self.channel, &self.id), self.serial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::ipc::transport::local_pair;
    use crate::ipc::types::{FILE_UPLOAD, SERVER_API};
    use serde_json::json;
    use std::collections::HashSet;

    #[tokio::test]
    async fn concurrent_calls_get_distinct_ids_and_one_listener_each() {
        let (client, mut host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);

        let calls: Vec<Call> = (0..64)
            .map(|_| channel.call(SERVER_API, vec![json!("/health")], CallOptions::default()).unwrap())
            .collect();
        let ids: HashSet<RequestId> = calls.iter().map(|c| c.id().clone()).collect();
        assert_eq!(ids.len(), 64);
        assert_eq!(channel.listener_count(), 64);

        let first = host.inbound.recv().await.unwrap();
        assert_eq!(first.channel, SERVER_API);
        assert_eq!(first.args, vec![json!("/health")]);
        assert_eq!(&first.id, calls[0].id());

        drop(calls);
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn events_are_routed_by_identity_in_order() {
        let (client, mut host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);

        let mut a = channel.call(FILE_UPLOAD, vec![], CallOptions::default()).unwrap();
        let mut b = channel.call(FILE_UPLOAD, vec![], CallOptions::default()).unwrap();
        let a_id = host.inbound.recv().await.unwrap().id;
        let b_id = host.inbound.recv().await.unwrap().id;

        host.outbound.send(ChannelEvent::start(FILE_UPLOAD, &b_id)).unwrap();
        host.outbound.send(ChannelEvent::start(FILE_UPLOAD, &a_id)).unwrap();
        host.outbound.send(ChannelEvent::progress(FILE_UPLOAD, &a_id, 10)).unwrap();
        host.outbound.send(ChannelEvent::done(FILE_UPLOAD, &a_id, json!({"status": 200}))).unwrap();
        host.outbound.send(ChannelEvent::progress(FILE_UPLOAD, &a_id, 99)).unwrap();

        let mut states = Vec::new();
        while let Some(event) = a.next_event().await {
            states.push(event.state);
        }
        assert_eq!(states, vec![CallState::Start, CallState::Progress, CallState::Done]);
        assert_eq!(b.next_event().await.unwrap().state, CallState::Start);
        assert_eq!(channel.listener_count(), 1);
    }

    #[tokio::test]
    async fn finish_surfaces_host_errors() {
        let (client, mut host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);

        let call = channel.call(SERVER_API, vec![], CallOptions::default()).unwrap();
        let id = host.inbound.recv().await.unwrap().id;
        host.outbound
            .send(ChannelEvent::error(SERVER_API, &id, &HostError::new("refused", "NETWORK_ERROR")))
            .unwrap();

        match call.finish().await {
            Err(BridgeError::Host(err)) => assert_eq!(err.message, "refused"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn keep_open_listener_survives_close_and_is_rearmed() {
        let (client, mut host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);

        let options = CallOptions::default().keep_open().forced_id("health-check");
        let mut probe = channel.call(SERVER_API, vec![json!("/health")], options.clone()).unwrap();
        let id = host.inbound.recv().await.unwrap().id;
        assert_eq!(id.as_str(), "health-check");

        for running in [true, false] {
            host.outbound
                .send(ChannelEvent::done(SERVER_API, &id, json!({"body": {"running": running}})))
                .unwrap();
            let event = probe.next_event().await.unwrap();
            assert_eq!(event.data[0]["body"]["running"], json!(running));
        }

        let replacement = channel.call(SERVER_API, vec![json!("/health")], options).unwrap();
        assert_eq!(channel.listener_count(), 1);
        // The old receiver is cut off once its slot is re-armed.
        assert!(probe.next_event().await.is_none());
        drop(probe);
        assert_eq!(channel.listener_count(), 1);

        channel.close(SERVER_API, replacement.id());
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn handlers_receive_arguments_positionally() {
        let (client, mut host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let progress_tx = seen_tx.clone();
        let handlers = CallHandlers::new()
            .on(CallState::Progress, move |args| {
                let _ = progress_tx.send(("progress", args));
            })
            .on(CallState::Done, move |args| {
                let _ = seen_tx.send(("done", args));
            });
        channel
            .call_with_handlers(FILE_UPLOAD, vec![json!("a")], handlers, CallOptions::default())
            .unwrap();
        let id = host.inbound.recv().await.unwrap().id;
        host.outbound.send(ChannelEvent::progress(FILE_UPLOAD, &id, 5)).unwrap();
        host.outbound.send(ChannelEvent::done(FILE_UPLOAD, &id, json!(1))).unwrap();

        assert_eq!(seen_rx.recv().await.unwrap(), ("progress", vec![json!(5)]));
        assert_eq!(seen_rx.recv().await.unwrap(), ("done", vec![json!(1)]));
    }

    #[tokio::test]
    async fn closing_the_host_side_ends_pending_calls() {
        let (client, host) = local_pair();
        let channel = CorrelatedChannel::from_transport(client);
        let call = channel.call(SERVER_API, vec![], CallOptions::default()).unwrap();
        drop(host);
        assert!(matches!(call.finish().await, Err(BridgeError::ChannelClosed)));
    }
}
