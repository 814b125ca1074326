use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_WS_BUFFER, DEFAULT_WS_PING_INTERVAL_SECS};
use crate::progress::{ProgressBus, ProgressEvent};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound queue capacity per connection.
    pub buffer: usize,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_WS_BUFFER,
            ping_interval: Duration::from_secs(DEFAULT_WS_PING_INTERVAL_SECS),
        }
    }
}

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

struct Connection {
    tx: mpsc::Sender<ProgressEvent>,
    dropped: AtomicU64,
    connected_at: DateTime<Utc>,
}

struct GatewayInner {
    connections: DashMap<ConnectionId, Connection>,
    config: GatewayConfig,
}

impl GatewayInner {
    fn unregister(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            debug!(
                connection_id = %id,
                dropped = conn.dropped.load(Ordering::Relaxed),
                connected_secs = (Utc::now() - conn.connected_at).num_seconds(),
                "Realtime client disconnected"
            );
        }
    }
}

/// Registry of realtime connections.
#[derive(Clone)]
pub struct RealtimeGateway {
    inner: Arc<GatewayInner>,
}

impl Default for RealtimeGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl RealtimeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let config = GatewayConfig {
            buffer: config.buffer.max(1),
            ..config
        };
        Self {
            inner: Arc::new(GatewayInner {
                connections: DashMap::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Register a new client. Dropping the handle unregisters it.
    pub fn register(&self) -> ConnectionHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.config.buffer);
        self.inner.connections.insert(
            id,
            Connection {
                tx,
                dropped: AtomicU64::new(0),
                connected_at: Utc::now(),
            },
        );
        debug!(connection_id = %id, "Realtime client connected");
        ConnectionHandle {
            id,
            rx,
            gateway: Arc::downgrade(&self.inner),
        }
    }

    pub fn unregister(&self, id: &ConnectionId) {
        self.inner.unregister(id);
    }

    /// Offer an event to every connection without waiting on any of them.
    pub fn broadcast(&self, event: &ProgressEvent) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        let mut closed = Vec::new();

        for entry in self.inner.connections.iter() {
            match entry.tx.try_send(event.clone()) {
                Ok(()) => stats.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    stats.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        stats.closed = closed.len();
        for id in closed {
            self.inner.unregister(&id);
        }
        stats
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Events dropped so far for a connection.
    pub fn dropped_for(&self, id: &ConnectionId) -> Option<u64> {
        self.inner
            .connections
            .get(id)
            .map(|conn| conn.dropped.load(Ordering::Relaxed))
    }

    /// Forward every bus event to connected clients until `cancel` fires.
    pub fn spawn_relay(&self, bus: &ProgressBus, cancel: CancellationToken) -> JoinHandle<()> {
        let gateway = self.clone();
        let mut rx = bus.subscribe_all();

        tokio::spawn(async move {
            info!("Realtime relay started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => {
                            gateway.broadcast(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Realtime relay lagged, skipped {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("Realtime relay stopped");
        })
    }
}

/// A registered client's event feed.
pub struct ConnectionHandle {
    id: ConnectionId,
    rx: mpsc::Receiver<ProgressEvent>,
    gateway: Weak<GatewayInner>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.gateway.upgrade() {
            inner.unregister(&self.id);
        }
    }
}
