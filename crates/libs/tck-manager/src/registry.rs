use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::queue::{NotificationQueue, StatusSlot};

/// One connected test agent.
pub(crate) struct SdkSession {
    pub(crate) name: String,
    pub(crate) addr: SocketAddr,
    pub(crate) outbound: mpsc::Sender<Vec<u8>>,
    pub(crate) status: StatusSlot,
    /// Shared with the registry's per-name table, so it outlives the session.
    pub(crate) notifications: Arc<NotificationQueue>,
    /// Serializes commands so only one status is ever outstanding.
    pub(crate) command_lock: tokio::sync::Mutex<()>,
    pub(crate) closed: CancellationToken,
}

impl SdkSession {
    pub(crate) fn new(
        name: String,
        addr: SocketAddr,
        outbound: mpsc::Sender<Vec<u8>>,
        notifications: Arc<NotificationQueue>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            name,
            addr,
            outbound,
            status: StatusSlot::default(),
            notifications,
            command_lock: tokio::sync::Mutex::new(()),
            closed,
        }
    }
}

#[derive(Default)]
struct Tables {
    by_name: HashMap<String, Arc<SdkSession>>,
    by_addr: HashMap<SocketAddr, String>,
    /// Keyed by name rather than by connection: notifications an agent
    /// forwarded before disconnecting stay readable.
    queues: HashMap<String, Arc<NotificationQueue>>,
}

/// SDK name to live session, one connection per name.
#[derive(Default)]
pub(crate) struct SdkRegistry {
    tables: Mutex<Tables>,
    changed: Notify,
}

impl SdkRegistry {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `session` to its name; fails if the name is held by a live session.
    pub(crate) fn bind(&self, session: Arc<SdkSession>) -> Result<(), Arc<SdkSession>> {
        {
            let mut tables = self.lock();
            let stale = match tables.by_name.get(&session.name) {
                Some(held) if !held.closed.is_cancelled() => return Err(session),
                Some(held) => Some(held.addr),
                None => None,
            };
            if let Some(addr) = stale {
                tables.by_addr.remove(&addr);
            }
            tables.by_addr.insert(session.addr, session.name.clone());
            tables.by_name.insert(session.name.clone(), session);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Returns the notification queue for `name`, creating it on first use.
    pub(crate) fn notifications(&self, name: &str, capacity: usize) -> Arc<NotificationQueue> {
        self.lock()
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NotificationQueue::new(capacity)))
            .clone()
    }

    /// The queue of an SDK that has handshaken at least once.
    pub(crate) fn queue(&self, name: &str) -> Option<Arc<NotificationQueue>> {
        self.lock().queues.get(name).cloned()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<SdkSession>> {
        self.lock().by_name.get(name).cloned()
    }

    pub(crate) fn name_of(&self, addr: &SocketAddr) -> Option<String> {
        self.lock().by_addr.get(addr).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.lock().by_name.get(name).is_some_and(|session| !session.closed.is_cancelled())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes the session bound to `name` only if it is still the one at
    /// `addr`, so a stale connection never unbinds its replacement.
    pub(crate) fn remove(&self, name: &str, addr: SocketAddr) -> Option<Arc<SdkSession>> {
        let removed = {
            let mut tables = self.lock();
            if tables.by_name.get(name).is_some_and(|session| session.addr == addr) {
                tables.by_addr.remove(&addr);
                tables.by_name.remove(name)
            } else {
                None
            }
        };
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }

    pub(crate) fn drain(&self) -> Vec<Arc<SdkSession>> {
        let drained: Vec<Arc<SdkSession>> = {
            let mut tables = self.lock();
            tables.by_addr.clear();
            tables.by_name.drain().map(|(_, session)| session).collect()
        };
        self.changed.notify_waiters();
        drained
    }

    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_in(registry: &SdkRegistry, name: &str, port: u16) -> Arc<SdkSession> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(SdkSession::new(
            name.to_string(),
            SocketAddr::from(([127, 0, 0, 1], port)),
            tx,
            registry.notifications(name, 4),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn live_name_cannot_be_rebound() {
        let registry = SdkRegistry::default();
        assert!(registry.bind(session_in(&registry, "rust", 1)).is_ok());
        assert!(registry.bind(session_in(&registry, "rust", 2)).is_err());
        let first = SocketAddr::from(([127, 0, 0, 1], 1));
        assert_eq!(registry.name_of(&first).as_deref(), Some("rust"));
        assert_eq!(registry.names(), vec!["rust".to_string()]);
    }

    #[test]
    fn closed_session_name_can_be_reclaimed() {
        let registry = SdkRegistry::default();
        let first = session_in(&registry, "java", 1);
        registry.bind(first.clone()).ok();
        first.closed.cancel();
        assert!(!registry.contains("java"));
        assert!(registry.bind(session_in(&registry, "java", 2)).is_ok());
        assert!(registry.contains("java"));
    }

    #[test]
    fn remove_ignores_stale_address() {
        let registry = SdkRegistry::default();
        registry.bind(session_in(&registry, "python", 2)).ok();
        assert!(registry.remove("python", SocketAddr::from(([127, 0, 0, 1], 1))).is_none());
        assert!(registry.remove("python", SocketAddr::from(([127, 0, 0, 1], 2))).is_some());
        assert!(registry.get("python").is_none());
    }

    #[test]
    fn notification_queue_outlives_the_session() {
        let registry = SdkRegistry::default();
        let session = session_in(&registry, "rust", 3);
        registry.bind(session.clone()).ok();
        session.notifications.push(tck_wire::Message::publish("topic:door", b"1".to_vec()));

        assert!(registry.remove("rust", session.addr).is_some());
        assert!(registry.get("rust").is_none());
        let queue = registry.queue("rust").expect("queue kept after remove");
        assert_eq!(queue.len(), 1);
        assert!(Arc::ptr_eq(&queue, &registry.notifications("rust", 4)));
        assert!(registry.queue("go").is_none());
    }
}
