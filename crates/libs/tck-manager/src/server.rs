use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tck_wire::{
    normalize_sdk_name, AgentFrame, Command, Envelope, JsonSplitter, Message, Status, READ_CHUNK,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::queue::Wait;
use crate::registry::{SdkRegistry, SdkSession};
use crate::{ManagerError, ProtocolError};

pub const DEFAULT_MANAGER_ADDR: &str = "127.0.0.1:12345";

const OUTBOUND_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub listen: SocketAddr,
    /// How long `request` and `get_onreceive` wait before giving up.
    pub request_timeout_ms: u64,
    /// Per-SDK bound on queued `onReceive` notifications.
    pub notification_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 12345)),
            request_timeout_ms: 10_000,
            notification_capacity: 1024,
        }
    }
}

impl ManagerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

struct Shared {
    registry: SdkRegistry,
    config: ManagerConfig,
}

pub struct TestManager {
    listener: TcpListener,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl TestManager {
    pub async fn bind(config: ManagerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        log::info!("test_manager: listen on <{}>", listener.local_addr()?);
        Ok(Self {
            listener,
            shared: Arc::new(Shared { registry: SdkRegistry::default(), config }),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop on a background task and returns the driver handle.
    pub fn spawn(self) -> io::Result<TestManagerHandle> {
        let handle = TestManagerHandle {
            local_addr: self.local_addr()?,
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(self.run());
        Ok(handle)
    }

    pub async fn run(self) {
        let Self { listener, shared, cancel } = self;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("test_manager: new agent connection <{}>", peer);
                        let closed = cancel.child_token();
                        tokio::spawn(serve_connection(stream, peer, shared.clone(), closed));
                    }
                    Err(err) => log::warn!("test_manager: accept failed: {}", err),
                }
            }
        }
        for session in shared.registry.drain() {
            session.closed.cancel();
        }
        log::info!("test_manager: stopped");
    }
}

/// Driver-facing API. Cheap to clone; every clone talks to the same manager.
#[derive(Clone)]
pub struct TestManagerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl TestManagerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_sdk_connection(&self, sdk: &str) -> bool {
        self.shared.registry.contains(&normalize_sdk_name(sdk))
    }

    pub fn connected_sdks(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    /// Waits until `sdk` has completed its handshake.
    pub async fn wait_for_sdk(&self, sdk: &str, within: Duration) -> bool {
        let name = normalize_sdk_name(sdk);
        let registry = &self.shared.registry;
        tokio::time::timeout(within, async {
            loop {
                let changed = registry.changed().notified();
                tokio::pin!(changed);
                changed.as_mut().enable();
                if registry.contains(&name) {
                    return;
                }
                changed.await;
            }
        })
        .await
        .is_ok()
    }

    /// Sends `command` to the agent for `sdk` and waits for its `uStatus`.
    ///
    /// Commands to the same SDK are serialized; a status that arrives while no
    /// command is waiting is discarded before the next command is sent.
    pub async fn request(
        &self,
        sdk: &str,
        command: Command,
        message: &Message,
    ) -> Result<Status, ManagerError> {
        let session = self.session(sdk)?;
        let envelope = Envelope::command(command, message)?.to_json_bytes()?;
        let timeout = self.shared.config.request_timeout();

        let _in_flight = session.command_lock.lock().await;
        session.status.clear();
        session
            .outbound
            .send(envelope)
            .await
            .map_err(|_| ManagerError::Disconnected(session.name.clone()))?;
        log::debug!("test_manager: sent {} to {}", command, session.name);

        match tokio::time::timeout(timeout, session.status.wait(&session.closed)).await {
            Ok(Wait::Ready(status)) => Ok(status),
            Ok(Wait::Closed) => Err(ManagerError::Disconnected(session.name.clone())),
            Err(_) => Err(ManagerError::Timeout { sdk: session.name.clone(), waited: timeout }),
        }
    }

    /// Pops the oldest `onReceive` notification for `sdk`, waiting for one if
    /// the queue is empty.
    pub async fn get_onreceive(&self, sdk: &str) -> Result<Message, ManagerError> {
        self.get_onreceive_within(sdk, self.shared.config.request_timeout()).await
    }

    /// Notifications already queued are returned even after the agent has
    /// disconnected; only an empty queue reports `Disconnected`.
    pub async fn get_onreceive_within(
        &self,
        sdk: &str,
        within: Duration,
    ) -> Result<Message, ManagerError> {
        let name = normalize_sdk_name(sdk);
        let Some(queue) = self.shared.registry.queue(&name) else {
            return Err(ManagerError::UnknownSdk(name));
        };
        let closed = match self.shared.registry.get(&name) {
            Some(session) => session.closed.clone(),
            None => {
                let gone = CancellationToken::new();
                gone.cancel();
                gone
            }
        };
        match tokio::time::timeout(within, queue.pop(&closed)).await {
            Ok(Wait::Ready(message)) => Ok(message),
            Ok(Wait::Closed) => Err(ManagerError::Disconnected(name)),
            Err(_) => Err(ManagerError::Timeout { sdk: name, waited: within }),
        }
    }

    pub fn pending_notifications(&self, sdk: &str) -> usize {
        self.shared.registry.queue(&normalize_sdk_name(sdk)).map_or(0, |queue| queue.len())
    }

    /// Unbinds `sdk` and then closes its socket. Returns whether it was connected.
    pub fn close_connection(&self, sdk: &str) -> bool {
        let name = normalize_sdk_name(sdk);
        let Some(session) = self.shared.registry.get(&name) else {
            return false;
        };
        self.shared.registry.remove(&name, session.addr);
        session.closed.cancel();
        log::info!("test_manager: closed connection for {}", name);
        true
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn session(&self, sdk: &str) -> Result<Arc<SdkSession>, ManagerError> {
        let name = normalize_sdk_name(sdk);
        match self.shared.registry.get(&name) {
            Some(session) if !session.closed.is_cancelled() => Ok(session),
            _ => Err(ManagerError::UnknownSdk(name)),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    closed: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, rx, peer, closed.clone()));

    let mut connection = Connection { peer, shared, closed, outbound, session: None };
    if let Err(err) = connection.read_loop(reader).await {
        log::warn!("test_manager: closing <{}>: {}", peer, err);
    }
    connection.teardown();
    let _ = writer_task.await;
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    peer: SocketAddr,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            bytes = rx.recv() => {
                let Some(bytes) = bytes else { break };
                if let Err(err) = stream.write_all(&bytes).await {
                    log::warn!("test_manager: write to <{}> failed: {}", peer, err);
                    closed.cancel();
                    break;
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

struct Connection {
    peer: SocketAddr,
    shared: Arc<Shared>,
    closed: CancellationToken,
    outbound: mpsc::Sender<Vec<u8>>,
    session: Option<Arc<SdkSession>>,
}

impl Connection {
    async fn read_loop(&mut self, mut reader: OwnedReadHalf) -> Result<(), ProtocolError> {
        let mut splitter = JsonSplitter::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let n = tokio::select! {
                _ = self.closed.cancelled() => return Ok(()),
                result = reader.read(&mut buffer) => match result {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(err) => {
                        log::info!("test_manager: read from <{}> failed: {}", self.peer, err);
                        return Ok(());
                    }
                }
            };
            splitter.extend(&buffer[..n]);
            while let Some(object) = splitter.next_object()? {
                self.handle_object(&object)?;
            }
        }
    }

    fn handle_object(&mut self, object: &str) -> Result<(), ProtocolError> {
        let frame = AgentFrame::parse(object);
        let Some(session) = self.session.clone() else {
            return match frame {
                Ok(AgentFrame::Handshake { sdk_name }) => self.bind(sdk_name),
                Ok(_) | Err(_) => Err(ProtocolError::NotHandshake),
            };
        };
        match frame? {
            AgentFrame::Handshake { .. } => {
                Err(ProtocolError::DuplicateHandshake(session.name.clone()))
            }
            AgentFrame::Status(status) => {
                log::debug!("test_manager: {} reported {}", session.name, status);
                session.status.put(status);
                Ok(())
            }
            AgentFrame::OnReceive(message) => {
                if let Some(evicted) = session.notifications.push(message) {
                    log::warn!(
                        "test_manager: notification queue for {} full, evicted {}",
                        session.name,
                        evicted.id
                    );
                }
                Ok(())
            }
        }
    }

    fn bind(&mut self, sdk_name: String) -> Result<(), ProtocolError> {
        let notifications =
            self.shared.registry.notifications(&sdk_name, self.shared.config.notification_capacity);
        let session = Arc::new(SdkSession::new(
            sdk_name.clone(),
            self.peer,
            self.outbound.clone(),
            notifications,
            self.closed.clone(),
        ));
        self.shared
            .registry
            .bind(session.clone())
            .map_err(|_| ProtocolError::NameTaken(sdk_name.clone()))?;
        log::info!("test_manager: <{}> initialized as {}", self.peer, sdk_name);
        self.session = Some(session);
        Ok(())
    }

    /// Unbinds before the socket is closed.
    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            if self.shared.registry.remove(&session.name, self.peer).is_some() {
                log::info!("test_manager: {} disconnected", session.name);
            }
        }
        self.closed.cancel();
    }
}
