//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::database::DbPool;
use crate::database::repositories::{JobRepository, SqlxJobRepository};
use crate::delivery::ContentDelivery;
use crate::downloader::{FetchProvider, WorkerConfig};
use crate::progress::ProgressBus;
use crate::realtime::{GatewayConfig, RealtimeGateway};
use crate::scheduler::{
    JobRegistry, JobScheduler, RecoveryReport, SchedulerConfig, WorkerPoolConfig,
};
use crate::store::AssetStore;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: DbPool,
    pub store: Arc<AssetStore>,
    pub bus: ProgressBus,
    pub registry: Arc<JobRegistry>,
    pub scheduler: Arc<JobScheduler>,
    pub delivery: Arc<ContentDelivery>,
    pub gateway: RealtimeGateway,
    /// Cancellation token for background tasks.
    cancellation_token: CancellationToken,
    relay: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Wire every service from the configuration, a migrated pool and a fetch provider.
    pub fn new(config: &ServiceConfig, pool: DbPool, provider: Arc<dyn FetchProvider>) -> Self {
        let store = Arc::new(AssetStore::from_config(config));
        let bus = ProgressBus::new();
        let repository: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let registry = Arc::new(JobRegistry::new(repository.clone(), bus.clone()));

        let scheduler_config = SchedulerConfig {
            pool: WorkerPoolConfig {
                max_workers: config.worker_count,
                ..Default::default()
            },
            worker: WorkerConfig {
                progress_throttle: config.progress_throttle,
                cancel_grace: config.cancel_grace,
            },
        };
        let scheduler = Arc::new(JobScheduler::new(
            scheduler_config,
            registry.clone(),
            repository,
            store.clone(),
            provider,
        ));

        let delivery = Arc::new(
            ContentDelivery::new(registry.clone(), store.clone())
                .with_chunk_size(config.stream_chunk_size),
        );

        let gateway = RealtimeGateway::new(GatewayConfig {
            buffer: config.ws_buffer,
            ping_interval: config.ws_ping_interval,
        });

        Self {
            pool,
            store,
            bus,
            registry,
            scheduler,
            delivery,
            gateway,
            cancellation_token: CancellationToken::new(),
            relay: parking_lot::Mutex::new(None),
        }
    }

    /// Prepare storage, recover persisted jobs and start background work.
    pub async fn initialize(&self) -> Result<RecoveryReport> {
        info!("Initializing services");

        self.store.ensure_layout().await?;
        let report = self.scheduler.recover().await?;

        let relay = self
            .gateway
            .spawn_relay(&self.bus, self.cancellation_token.child_token());
        *self.relay.lock() = Some(relay);

        self.scheduler.start();

        info!("Services initialized");
        Ok(report)
    }

    /// State handed to the HTTP layer.
    pub fn app_state(&self) -> AppState {
        AppState::new()
            .with_scheduler(self.scheduler.clone())
            .with_delivery(self.delivery.clone())
            .with_store(self.store.clone())
            .with_gateway(self.gateway.clone())
            .with_db_pool(self.pool.clone())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop the worker pool and relay, then close the pool.
    ///
    /// In-flight jobs are aborted and stay RUNNING in the database; the next
    /// start-up recovers them.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let relay = self.relay.lock().take();
        let stopped = tokio::time::timeout(timeout, async {
            self.scheduler.shutdown().await;
            if let Some(relay) = relay {
                let _ = relay.await;
            }
        })
        .await;

        if stopped.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
