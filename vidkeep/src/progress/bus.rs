use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use super::ProgressEvent;
use crate::domain::JobId;

/// Default queue size of a per-job subscription.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

const GLOBAL_CAPACITY: usize = 1024;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

struct BusInner {
    subscribers: DashMap<JobId, Vec<Subscriber>>,
    global_tx: broadcast::Sender<ProgressEvent>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

impl BusInner {
    fn unsubscribe(&self, job_id: &JobId, id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(job_id) {
            subs.retain(|s| s.id != id);
        }
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());
    }
}

/// Non-blocking fan-out of job events.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a bus whose per-job subscriptions buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (global_tx, _) = broadcast::channel(GLOBAL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                global_tx,
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Deliver an event to the job's subscribers and the global feed.
    ///
    /// Returns the number of per-job subscribers that accepted the event.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let job_id = event.job_id().clone();
        let mut delivered = 0;

        if let Some(mut subs) = self.inner.subscribers.get_mut(&job_id) {
            subs.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(job_id = %job_id, subscriber = sub.id, "Subscriber full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        self.inner
            .subscribers
            .remove_if(&job_id, |_, subs| subs.is_empty());

        // No receivers is fine.
        let _ = self.inner.global_tx.send(event);
        delivered
    }

    /// Subscribe to the events of a single job.
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(job_id.clone())
            .or_default()
            .push(Subscriber { id, tx });

        Subscription {
            job_id,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to every event on the bus.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.global_tx.subscribe()
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.inner
            .subscribers
            .get(job_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Events dropped because a per-job subscriber was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Per-job event stream; unsubscribes when dropped.
pub struct Subscription {
    job_id: JobId,
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = ProgressEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(&self.job_id, self.id);
        }
    }
}
