//! broadcaster.rs — best-effort fan-out to observer sockets
//!
//! Each subscriber is a bounded channel drained by its own socket task. `publish`
//! serializes once, snapshots the set, and sends with a per-send timeout; a subscriber
//! whose channel is closed or stays full past the timeout is removed in the same call.
//! The lock is never held across a send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rssi_types::Payload;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// Outcome of one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Arc<str>>,
}

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
    last: RwLock<Option<Arc<str>>>,
    send_timeout: Duration,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(send_timeout: Duration, buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                last: RwLock::new(None),
                send_timeout,
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a new observer. The latest payload, if any, is queued immediately.
    ///
    /// Lock order is `subscribers` then `last`, same as `publish_text`: a concurrent
    /// publish either lands in `last` before we read it, or sees us in its snapshot.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = Uuid::new_v4();
        {
            let mut subs = self.inner.subscribers.write().await;
            if let Some(last) = self.inner.last.read().await.clone() {
                let _ = tx.try_send(last);
            }
            subs.insert(id, tx);
        }
        debug!("Broadcaster: subscriber {id} joined");
        Subscription { id, rx }
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Last published payload, already serialized.
    pub async fn last(&self) -> Option<Arc<str>> {
        self.inner.last.read().await.clone()
    }

    pub async fn publish(&self, payload: &Payload) -> PublishReport {
        match serde_json::to_string(payload) {
            Ok(text) => self.publish_text(Arc::from(text)).await,
            Err(e) => {
                warn!("Broadcaster: could not serialize payload: {e}");
                PublishReport::default()
            }
        }
    }

    pub async fn publish_text(&self, text: Arc<str>) -> PublishReport {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Arc<str>>)> = {
            let subs = self.inner.subscribers.read().await;
            *self.inner.last.write().await = Some(text.clone());
            subs.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, tx) in snapshot {
            match tokio::time::timeout(self.inner.send_timeout, tx.send(text.clone())).await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(_)) => failed.push((id, "closed")),
                Err(_) => failed.push((id, "send timed out")),
            }
        }

        if !failed.is_empty() {
            let mut subs = self.inner.subscribers.write().await;
            for (id, why) in failed {
                if subs.remove(&id).is_some() {
                    report.dropped += 1;
                    warn!("Broadcaster: dropped subscriber {id} ({why})");
                }
            }
        }
        report
    }
}
