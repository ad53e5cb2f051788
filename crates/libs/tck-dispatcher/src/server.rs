use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tck_wire::{FrameDecoder, WireError, READ_CHUNK};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::{ConnectionRegistry, Frame, PeerSender};

pub const DEFAULT_DISPATCHER_ADDR: &str = "127.0.0.1:44444";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub listen: SocketAddr,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { listen: SocketAddr::from(([127, 0, 0, 1], 44444)) }
    }
}

pub struct Dispatcher {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub async fn bind(config: &DispatcherConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        log::info!("dispatcher: listen on <{}>", listener.local_addr()?);
        Ok(Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Runs the accept loop on a background task.
    pub fn spawn(self) -> io::Result<DispatcherHandle> {
        let local_addr = self.local_addr()?;
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        Ok(DispatcherHandle { local_addr, registry, cancel, task })
    }

    /// Accepts connections until cancelled.
    pub async fn run(self) {
        let Self { listener, registry, cancel } = self;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("dispatcher: new client <{}> connected", peer);
                        let stop = cancel.child_token();
                        spawn_connection(stream, peer, registry.clone(), stop).await;
                    }
                    Err(err) => {
                        log::warn!("dispatcher: accept failed: {}", err);
                    }
                }
            }
        }
        registry.clear().await;
        log::info!("dispatcher: stopped");
    }
}

pub struct DispatcherHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops accepting, drops every connection and waits for the accept loop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            log::warn!("dispatcher: accept loop ended abnormally: {}", err);
        }
    }
}

async fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    stop: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (sender, rx) = PeerSender::channel(stop.clone());
    registry.insert(peer, sender).await;

    tokio::spawn(write_loop(write_half, rx, peer, stop.clone()));
    tokio::spawn(async move {
        if let Err(err) = read_loop(read_half, peer, &registry, &stop).await {
            log::warn!("dispatcher: client <{}> sent a bad frame: {}", peer, err);
        }
        stop.cancel();
        if registry.remove(&peer).await {
            log::info!("dispatcher: client <{}> disconnected", peer);
        }
    });
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    peer: SocketAddr,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = stream.write_all(&frame).await {
                    log::warn!("dispatcher: write to <{}> failed: {}", peer, err);
                    stop.cancel();
                    break;
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

async fn read_loop(
    mut stream: OwnedReadHalf,
    peer: SocketAddr,
    registry: &ConnectionRegistry,
    stop: &CancellationToken,
) -> Result<(), WireError> {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            result = stream.read(&mut buffer) => match result {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    decoder.extend(&buffer[..n]);
                    relay_frames(&mut decoder, peer, registry).await?;
                }
                Err(err) => {
                    log::info!("dispatcher: read from <{}> failed: {}", peer, err);
                    return Ok(());
                }
            }
        }
    }
}

async fn relay_frames(
    decoder: &mut FrameDecoder,
    peer: SocketAddr,
    registry: &ConnectionRegistry,
) -> Result<(), WireError> {
    while let Some(frame) = decoder.next_frame()? {
        let trace = registry.broadcast(Frame::from(frame), peer).await;
        log::debug!(
            "dispatcher: relayed frame from <{}> matched={} sent={} failed={}",
            peer,
            trace.matched_peers,
            trace.sent_peers,
            trace.failed_peers
        );
    }
    Ok(())
}
