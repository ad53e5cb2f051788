use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Deserialize;
use tck_wire::{
    decode_frame, encode_frame, validate_topic, CallOptions, Code, FrameDecoder, Message,
    MessageKind, Status, READ_CHUNK,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::listener::{Listener, ListenerRegistry};
use crate::pending::{PendingCall, PendingCalls};
use crate::{RpcError, TransportError};

/// Reply-to address used for requests when none is configured.
pub const DEFAULT_SOURCE: &str = "tck:/rpc/response";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Reply-to URI stamped on outgoing requests.
    pub source: String,
    pub default_ttl_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { source: DEFAULT_SOURCE.to_string(), default_ttl_ms: CallOptions::DEFAULT_TTL_MS }
    }
}

type SharedListeners = Arc<Mutex<ListenerRegistry>>;

fn lock_listeners(listeners: &Mutex<ListenerRegistry>) -> MutexGuard<'_, ListenerRegistry> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    listeners: SharedListeners,
    pending: Arc<PendingCalls>,
    cancel: CancellationToken,
    config: TransportConfig,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Client side of a dispatcher connection.
///
/// Cloning is cheap and every clone drives the same connection. The receive
/// task stops when the last clone is dropped or [`Transport::close`] is called.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Non-owning handle, for listeners that reply through their own transport.
#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<Inner>,
}

impl WeakTransport {
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

impl Transport {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        validate_topic(&config.source)
            .map_err(|err| TransportError::InvalidArgument(err.to_string()))?;
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let listeners = SharedListeners::default();
        let pending = Arc::new(PendingCalls::default());
        let cancel = CancellationToken::new();

        tokio::spawn(receive_loop(
            reader,
            peer_addr,
            listeners.clone(),
            pending.clone(),
            cancel.clone(),
        ));

        log::info!("transport: connected <{}> to dispatcher <{}>", local_addr, peer_addr);

        Ok(Self {
            inner: Arc::new(Inner {
                writer: tokio::sync::Mutex::new(Some(writer)),
                listeners,
                pending,
                cancel,
                config,
                local_addr,
                peer_addr,
            }),
        })
    }

    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport { inner: Arc::downgrade(&self.inner) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn source(&self) -> &str {
        &self.inner.config.source
    }

    pub fn default_call_options(&self) -> CallOptions {
        CallOptions::new(self.inner.config.default_ttl_ms)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Writes `message` to the dispatcher.
    pub async fn send(&self, message: &Message) -> Status {
        if let Err(status) = check_routing(message) {
            return status;
        }
        match self.write(message).await {
            Ok(()) => Status::ok(),
            Err(err) => {
                log::warn!("transport: send {} failed: {}", message.id, err);
                err.status()
            }
        }
    }

    pub fn register_listener(&self, topic: &str, listener: Arc<dyn Listener>) -> Status {
        if let Err(err) = validate_topic(topic) {
            return Status::fail(Code::InvalidArgument, err.to_string());
        }
        if !lock_listeners(&self.inner.listeners).register(topic, listener) {
            log::debug!("transport: listener already registered on {}", topic);
        }
        Status::ok()
    }

    pub fn unregister_listener(&self, topic: &str, listener: &Arc<dyn Listener>) -> Status {
        if lock_listeners(&self.inner.listeners).unregister(topic, listener) {
            Status::ok()
        } else {
            Status::fail(Code::NotFound, format!("no such listener on {topic}"))
        }
    }

    /// Sends a REQUEST to `method` and returns the call it will resolve.
    ///
    /// The call completes with the matching RESPONSE, or with
    /// [`RpcError::Timeout`] once `options.ttl_ms` elapses.
    pub async fn invoke_method(
        &self,
        method: &str,
        payload: impl Into<Vec<u8>>,
        options: CallOptions,
    ) -> Result<PendingCall, TransportError> {
        if options.ttl_ms == 0 {
            return Err(TransportError::InvalidArgument("ttl must be positive".to_string()));
        }
        validate_topic(method).map_err(|err| TransportError::InvalidArgument(err.to_string()))?;

        let request = Message::request(self.source(), method, payload, &options);
        let correlation_id = request.id.clone();
        let rx = self.inner.pending.insert(&correlation_id);
        if let Err(err) = self.write(&request).await {
            self.inner.pending.remove(&correlation_id);
            return Err(err);
        }

        let timer = tokio::spawn(expire_call(
            self.inner.pending.clone(),
            correlation_id.clone(),
            options.ttl_ms,
            self.inner.cancel.clone(),
        ));
        self.inner.pending.attach_timer(&correlation_id, timer.abort_handle());

        Ok(PendingCall::new(correlation_id, rx))
    }

    /// Outstanding calls that have neither been answered nor expired.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stops the receive task, fails outstanding calls and closes the socket.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let failed = self.inner.pending.fail_all();
        if failed > 0 {
            log::info!("transport: failed {} pending calls on close", failed);
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write(&self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransportError::Closed)?;
        if self.inner.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        stream.write_all(&frame).await?;
        Ok(())
    }
}

fn check_routing(message: &Message) -> Result<(), Status> {
    let invalid = |reason: String| Err(Status::fail(Code::InvalidArgument, reason));
    match message.kind {
        MessageKind::Publish => {
            if let Err(err) = validate_topic(&message.source) {
                return invalid(err.to_string());
            }
        }
        MessageKind::Request | MessageKind::Response => {
            match message.sink.as_deref() {
                Some(sink) => {
                    if let Err(err) = validate_topic(sink) {
                        return invalid(err.to_string());
                    }
                }
                None => return invalid(format!("{:?} {} has no sink", message.kind, message.id)),
            }
            if message.correlation_id.as_deref().map_or(true, str::is_empty) {
                return invalid(format!("{:?} {} has no correlation id", message.kind, message.id));
            }
        }
    }
    Ok(())
}

async fn expire_call(
    pending: Arc<PendingCalls>,
    correlation_id: String,
    ttl_ms: u32,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_millis(u64::from(ttl_ms))) => {
            let timeout = RpcError::Timeout { correlation_id: correlation_id.clone(), ttl_ms };
            if pending.complete(&correlation_id, Err(timeout)) {
                log::debug!("transport: call {} timed out after {} ms", correlation_id, ttl_ms);
            }
        }
    }
}

async fn receive_loop(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    listeners: SharedListeners,
    pending: Arc<PendingCalls>,
    cancel: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    log::info!("transport: dispatcher <{}> closed the connection", peer);
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    log::warn!("transport: read from <{}> failed: {}", peer, err);
                    break;
                }
            }
        };

        decoder.extend(&buffer[..n]);
        if !drain_frames(&mut decoder, &listeners, &pending).await {
            break;
        }
    }

    cancel.cancel();
    let failed = pending.fail_all();
    if failed > 0 {
        log::info!("transport: failed {} pending calls after disconnect", failed);
    }
}

/// Delivers every complete frame; returns `false` if the stream is unusable.
async fn drain_frames(
    decoder: &mut FrameDecoder,
    listeners: &Mutex<ListenerRegistry>,
    pending: &PendingCalls,
) -> bool {
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(err) => {
                log::warn!("transport: dropping connection: {}", err);
                return false;
            }
        };
        match decode_frame(&frame) {
            Ok(message) => dispatch(message, listeners, pending).await,
            Err(err) => log::warn!("transport: skipping undecodable frame: {}", err),
        }
    }
}

async fn dispatch(message: Message, listeners: &Mutex<ListenerRegistry>, pending: &PendingCalls) {
    match message.kind {
        MessageKind::Publish | MessageKind::Request => {
            let Some(key) = message.routing_key() else {
                log::debug!("transport: {:?} {} has no routing key", message.kind, message.id);
                return;
            };
            let targets = lock_listeners(listeners).listeners(key);
            for listener in targets {
                listener.on_receive(message.clone()).await;
            }
        }
        MessageKind::Response => {
            let Some(correlation_id) = message.correlation_id.clone() else {
                log::debug!("transport: response {} without correlation id", message.id);
                return;
            };
            if !pending.complete(&correlation_id, Ok(message)) {
                log::debug!("transport: no pending call for {}", correlation_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_check_requires_kind_specific_fields() {
        let publish = Message::publish("topic:door", Vec::new());
        assert!(check_routing(&publish).is_ok());

        let bad_topic = Message::publish("door", Vec::new());
        assert_eq!(check_routing(&bad_topic).expect_err("topic").code, Code::InvalidArgument);

        let options = CallOptions::default();
        let mut request = Message::request(DEFAULT_SOURCE, "rpc:/door/open", Vec::new(), &options);
        assert!(check_routing(&request).is_ok());
        request.correlation_id = None;
        assert_eq!(check_routing(&request).expect_err("correlation").code, Code::InvalidArgument);

        let request = Message::request(DEFAULT_SOURCE, "rpc:/door/open", Vec::new(), &options);
        let mut response = Message::response_to(&request, Vec::new());
        assert!(check_routing(&response).is_ok());
        response.sink = None;
        assert_eq!(check_routing(&response).expect_err("sink").code, Code::InvalidArgument);
    }

    #[test]
    fn default_config_uses_default_source_and_ttl() {
        let config = TransportConfig::default();
        assert_eq!(config.source, DEFAULT_SOURCE);
        assert_eq!(config.default_ttl_ms, CallOptions::DEFAULT_TTL_MS);
    }
}
