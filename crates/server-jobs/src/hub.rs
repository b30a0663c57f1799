// crates/server-jobs/src/hub.rs
//! Fan-out of job events to live subscribers (WebSocket and SSE clients).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::types::JobEvent;

/// Events buffered per subscriber. A burst of output from every running job
/// must fit before a healthy but momentarily slow client falls behind.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

struct HubInner {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<JobEvent>>>,
}

impl HubInner {
    fn remove(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        match self.subscribers.write() {
            Ok(mut subs) => {
                for id in ids {
                    subs.remove(id);
                }
                metrics::gauge!("reelrun_hub_subscribers").set(subs.len() as f64);
            }
            Err(e) => tracing::error!("RwLock poisoned writing subscribers: {e}"),
        }
    }
}

/// Set of live subscriber channels.
///
/// Cheap to clone. Publishing never awaits: each subscriber owns a bounded
/// channel of `capacity` events.
///
/// Lag policy: a subscriber whose channel is closed is removed. One whose
/// channel is still full when an event arrives has fallen `capacity` events
/// behind and is removed too; its receiver drains what was buffered and then
/// ends, so the client sees a clean disconnect rather than a gap in the
/// stream. Size `capacity` for the largest burst a client must absorb.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Hub whose subscriber channels buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscriber. Its first event is `connected { active_jobs }`.
    pub fn subscribe(&self, active_jobs: usize) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        // Fresh channel with capacity >= 1: cannot be full or closed.
        let _ = tx.try_send(JobEvent::Connected { active_jobs });

        match self.inner.subscribers.write() {
            Ok(mut subs) => {
                subs.insert(id, tx);
                metrics::gauge!("reelrun_hub_subscribers").set(subs.len() as f64);
            }
            Err(e) => tracing::error!("RwLock poisoned writing subscribers: {e}"),
        }
        tracing::debug!(subscriber = id, "Subscriber connected");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.remove(&[id]);
    }

    /// Deliver `event` to every subscriber. Returns how many received it.
    pub fn publish(&self, event: &JobEvent) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;
        match self.inner.subscribers.read() {
            Ok(subs) => {
                for (id, tx) in subs.iter() {
                    match tx.try_send(event.clone()) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(subscriber = id, "Subscriber lagging, disconnecting");
                            failed.push(*id);
                        }
                        Err(TrySendError::Closed(_)) => failed.push(*id),
                    }
                }
            }
            Err(e) => {
                tracing::error!("RwLock poisoned reading subscribers: {e}");
                return 0;
            }
        }
        self.inner.remove(&failed);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.read() {
            Ok(subs) => subs.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading subscribers: {e}");
                0
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscriber. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<JobEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<JobEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&[self.id]);
            tracing::debug!(subscriber = self.id, "Subscriber disconnected");
        }
    }
}
