use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tck_wire::{Message, Status};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Outcome of waiting on a per-SDK slot or queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Wait<T> {
    Ready(T),
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the status for the single command in flight.
#[derive(Default)]
pub(crate) struct StatusSlot {
    value: Mutex<Option<Status>>,
    ready: Notify,
}

impl StatusSlot {
    /// Stores `status`, replacing any unclaimed one.
    pub(crate) fn put(&self, status: Status) {
        if let Some(previous) = lock(&self.value).replace(status) {
            log::debug!("test_manager: overwriting unclaimed status {}", previous);
        }
        self.ready.notify_one();
    }

    pub(crate) fn clear(&self) {
        lock(&self.value).take();
    }

    pub(crate) async fn wait(&self, closed: &CancellationToken) -> Wait<Status> {
        loop {
            if let Some(status) = lock(&self.value).take() {
                return Wait::Ready(status);
            }
            tokio::select! {
                _ = self.ready.notified() => {}
                _ = closed.cancelled() => {
                    return lock(&self.value).take().map_or(Wait::Closed, Wait::Ready);
                }
            }
        }
    }
}

/// Bounded FIFO of `onReceive` notifications. When full, the oldest entry
/// is evicted to make room.
pub(crate) struct NotificationQueue {
    entries: Mutex<VecDeque<Message>>,
    ready: Notify,
    capacity: usize,
}

impl NotificationQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends `message`; returns the evicted entry if the queue was full.
    pub(crate) fn push(&self, message: Message) -> Option<Message> {
        let evicted = {
            let mut entries = lock(&self.entries);
            let evicted =
                if entries.len() >= self.capacity { entries.pop_front() } else { None };
            entries.push_back(message);
            evicted
        };
        self.ready.notify_one();
        evicted
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub(crate) async fn pop(&self, closed: &CancellationToken) -> Wait<Message> {
        loop {
            if let Some(message) = lock(&self.entries).pop_front() {
                return Wait::Ready(message);
            }
            tokio::select! {
                _ = self.ready.notified() => {}
                _ = closed.cancelled() => {
                    return lock(&self.entries).pop_front().map_or(Wait::Closed, Wait::Ready);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tck_wire::Code;

    use super::*;

    #[tokio::test]
    async fn status_put_before_wait_is_not_lost() {
        let slot = StatusSlot::default();
        slot.put(Status::ok());
        assert_eq!(slot.wait(&CancellationToken::new()).await, Wait::Ready(Status::ok()));
    }

    #[tokio::test]
    async fn status_wait_wakes_on_put() {
        let slot = Arc::new(StatusSlot::default());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.put(Status::fail(Code::NotFound, "missing"));
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .expect("join");
        assert_eq!(result, Wait::Ready(Status::fail(Code::NotFound, "missing")));
    }

    #[tokio::test]
    async fn cleared_status_is_not_returned() {
        let slot = StatusSlot::default();
        slot.put(Status::ok());
        slot.clear();
        let closed = CancellationToken::new();
        closed.cancel();
        assert_eq!(slot.wait(&closed).await, Wait::Closed);
    }

    #[tokio::test]
    async fn queue_is_fifo_and_evicts_oldest() {
        let queue = NotificationQueue::new(2);
        let first = Message::publish("topic:a", b"1".to_vec());
        let second = Message::publish("topic:a", b"2".to_vec());
        let third = Message::publish("topic:a", b"3".to_vec());

        assert!(queue.push(first.clone()).is_none());
        assert!(queue.push(second.clone()).is_none());
        assert_eq!(queue.push(third.clone()), Some(first));
        assert_eq!(queue.len(), 2);

        let open = CancellationToken::new();
        assert_eq!(queue.pop(&open).await, Wait::Ready(second));
        assert_eq!(queue.pop(&open).await, Wait::Ready(third));
    }

    #[tokio::test]
    async fn closed_queue_drains_before_reporting_closed() {
        let queue = NotificationQueue::new(4);
        let message = Message::publish("topic:a", b"1".to_vec());
        queue.push(message.clone());

        let closed = CancellationToken::new();
        closed.cancel();
        assert_eq!(queue.pop(&closed).await, Wait::Ready(message));
        assert_eq!(queue.pop(&closed).await, Wait::Closed);
    }
}
