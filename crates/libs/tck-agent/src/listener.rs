use std::sync::Arc;

use async_trait::async_trait;
use tck_transport::{Listener, WeakTransport};
use tck_wire::{Envelope, Message, MessageKind};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Write side of the agent's test manager socket, shared between the command
/// loop and listener callbacks.
#[derive(Clone)]
pub(crate) struct ManagerLink {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl ManagerLink {
    pub(crate) fn new(writer: OwnedWriteHalf) -> Self {
        Self { writer: Arc::new(Mutex::new(writer)) }
    }

    pub(crate) async fn send(&self, envelope: &Envelope) -> std::io::Result<()> {
        let bytes = envelope.to_json_bytes().map_err(std::io::Error::other)?;
        self.send_raw(&bytes).await
    }

    pub(crate) async fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.lock().await.write_all(bytes).await
    }

    pub(crate) async fn send_on_receive(&self, message: &Message) {
        let envelope = match Envelope::on_receive(message) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("test_agent: cannot encode {}: {}", message.id, err);
                return;
            }
        };
        if let Err(err) = self.send(&envelope).await {
            log::warn!("test_agent: forwarding {} failed: {}", message.id, err);
        }
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Reports every delivery to the test manager as `onReceive`, and answers
/// REQUESTs with a RESPONSE echoing the request payload.
pub struct ForwardingListener {
    link: ManagerLink,
    transport: WeakTransport,
    reply_to_requests: bool,
}

impl ForwardingListener {
    pub(crate) fn new(
        link: ManagerLink,
        transport: WeakTransport,
        reply_to_requests: bool,
    ) -> Self {
        Self { link, transport, reply_to_requests }
    }
}

#[async_trait]
impl Listener for ForwardingListener {
    async fn on_receive(&self, message: Message) {
        log::debug!("test_agent: received {:?} {} on {}", message.kind, message.id, message.source);
        self.link.send_on_receive(&message).await;

        if message.kind != MessageKind::Request || !self.reply_to_requests {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let response = Message::response_to(&message, message.payload.clone());
        let status = transport.send(&response).await;
        if !status.is_ok() {
            log::warn!("test_agent: reply to {} failed: {}", message.id, status);
        }
    }
}
