use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tck_wire::Message;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::RpcError;

pub(crate) type Reply = Result<Message, RpcError>;

struct Entry {
    tx: oneshot::Sender<Reply>,
    /// The call's TTL task, aborted once the call is settled some other way.
    timer: Option<AbortHandle>,
}

impl Entry {
    fn settle(self, reply: Reply) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have dropped its PendingCall; the entry is gone either way.
        let _ = self.tx.send(reply);
    }
}

/// Correlation id to single-assignment reply slot.
///
/// Whichever of the response path and the timeout path removes an entry first
/// completes it; the other finds nothing and is a no-op.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<String, Entry>>,
}

impl PendingCalls {
    pub(crate) fn insert(&self, correlation_id: &str) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(correlation_id.to_string(), Entry { tx, timer: None });
        rx
    }

    /// Ties `timer` to the call; aborts it at once if the call is already settled.
    pub(crate) fn attach_timer(&self, correlation_id: &str, timer: AbortHandle) {
        match self.lock().get_mut(correlation_id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Returns `false` if the call was already completed or never existed.
    pub(crate) fn complete(&self, correlation_id: &str, reply: Reply) -> bool {
        let Some(entry) = self.lock().remove(correlation_id) else {
            return false;
        };
        entry.settle(reply);
        true
    }

    pub(crate) fn remove(&self, correlation_id: &str) -> bool {
        let Some(entry) = self.lock().remove(correlation_id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        true
    }

    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<(String, Entry)> = self.lock().drain().collect();
        let count = drained.len();
        for (correlation_id, entry) in drained {
            entry.settle(Err(RpcError::Closed { correlation_id }));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The eventual response to an [`invoke_method`](crate::Transport::invoke_method) call.
#[derive(Debug)]
pub struct PendingCall {
    correlation_id: String,
    rx: oneshot::Receiver<Reply>,
}

impl PendingCall {
    pub(crate) fn new(correlation_id: String, rx: oneshot::Receiver<Reply>) -> Self {
        Self { correlation_id, rx }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Future for PendingCall {
    type Output = Result<Message, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(RpcError::Closed { correlation_id: self.correlation_id.clone() }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
