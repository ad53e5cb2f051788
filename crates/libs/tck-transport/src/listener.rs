use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tck_wire::Message;
use tokio::sync::mpsc;

/// Callback for messages delivered on a registered topic.
///
/// Listeners run one at a time on the transport's receive task, so a listener
/// must not wait on an RPC call issued through the same transport.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_receive(&self, message: Message);
}

/// Forwards every delivery into an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelListener {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl Listener for ChannelListener {
    async fn on_receive(&self, message: Message) {
        if self.tx.send(message).is_err() {
            log::debug!("transport: channel listener receiver dropped");
        }
    }
}

fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Topic to listener table. Order within a topic is registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    topics: HashMap<String, Vec<Arc<dyn Listener>>>,
}

impl ListenerRegistry {
    /// Returns `false` if the listener was already registered on `topic`.
    pub(crate) fn register(&mut self, topic: &str, listener: Arc<dyn Listener>) -> bool {
        let listeners = self.topics.entry(topic.to_string()).or_default();
        if listeners.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` if nothing was removed.
    pub(crate) fn unregister(&mut self, topic: &str, listener: &Arc<dyn Listener>) -> bool {
        let Some(listeners) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|existing| !same_listener(existing, listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    pub(crate) fn listeners(&self, topic: &str) -> Vec<Arc<dyn Listener>> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    pub(crate) fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
