//! Ingestion supervisor: startup wiring and lifecycle of the workers
//!
//! `start` resolves the API key, loads the catalog, seeds the store, splits
//! the MMSIs into batches and starts one worker per batch, staggering the
//! starts so the upstream does not see a burst of handshakes. Credential and
//! catalog failures are fatal and reported once; nothing is retried.

use aistrack_catalog::{Catalog, CatalogFilter, StaticCatalog};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::TrackerError;
use crate::metrics;
use crate::partition::{partition, MAX_MMSI_PER_CONNECTION};
use crate::store::StateStore;
use crate::traits::{KeyResolver, StreamSource};
use crate::worker::{ConnectionWorker, WorkerConfig, WorkerHandle, WorkerState, DEFAULT_RECONNECT_DELAY};

/// Default delay between consecutive worker starts
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_batch_size: NonZeroUsize,
    pub stagger: Duration,
    pub reconnect_delay: Duration,
    pub filter: CatalogFilter,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: NonZeroUsize::new(MAX_MMSI_PER_CONNECTION).unwrap_or(NonZeroUsize::MIN),
            stagger: DEFAULT_STAGGER,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            filter: CatalogFilter::default(),
        }
    }
}

/// Aggregate status, cheap to read at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackingStatus {
    pub total_tracked: usize,
    pub positioned_count: usize,
    pub active: bool,
    /// Workers started, one per batch
    pub connections: usize,
}

/// Outcome of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    pub vessels: usize,
    pub batches: usize,
    /// Workers actually started; fewer than `batches` if stopped mid-start
    pub workers: usize,
}

pub struct IngestionSupervisor {
    store: Arc<StateStore>,
    broadcaster: Broadcaster,
    source: Arc<dyn StreamSource>,
    config: SupervisorConfig,
    active: AtomicBool,
    started: AtomicBool,
    connections: AtomicUsize,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl IngestionSupervisor {
    pub fn new(
        store: Arc<StateStore>,
        broadcaster: Broadcaster,
        source: Arc<dyn StreamSource>,
        config: SupervisorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            broadcaster,
            source,
            config,
            active: AtomicBool::new(false),
            started: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Load credentials and catalog, then start every worker.
    ///
    /// Returns once all workers are running. An empty catalog is not an
    /// error: no workers start and tracking stays inactive.
    pub async fn start(
        &self,
        resolver: &dyn KeyResolver,
        key_source: &str,
        catalog: &dyn Catalog,
    ) -> Result<StartReport, TrackerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::AlreadyStarted);
        }

        let api_key = resolver.resolve(key_source).map_err(|e| {
            error!(error = %e, "Failed to load API key, tracking not started");
            TrackerError::from(e)
        })?;

        let records = catalog.load(&self.config.filter).await.map_err(|e| {
            error!(error = %e, "Failed to load vessel catalog, tracking not started");
            TrackerError::from(e)
        })?;

        let catalog = StaticCatalog::from_records(records);
        for (mmsi, attributes) in catalog.iter() {
            self.store.seed_static(mmsi, attributes.clone());
        }
        metrics::set_vessels(self.store.count(), self.store.positioned_count());

        let batches = partition(catalog.identifiers(), self.config.max_batch_size);
        metrics::set_batches_total(batches.len());
        info!(
            vessels = catalog.len(),
            batches = batches.len(),
            max_batch_size = self.config.max_batch_size.get(),
            "Catalog loaded"
        );

        let mut report = StartReport {
            vessels: catalog.len(),
            batches: batches.len(),
            workers: 0,
        };

        if catalog.is_empty() {
            warn!("No vessels to track, tracking inactive");
            return Ok(report);
        }

        let mut shutdown = self.shutdown.subscribe();
        for batch in batches {
            if batch.index > 0 {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => {
                        info!(started = report.workers, "Stopped during startup");
                        return Ok(report);
                    }
                    _ = tokio::time::sleep(self.config.stagger) => {}
                }
            }

            let worker = ConnectionWorker::new(
                batch,
                Arc::clone(&self.source),
                Arc::clone(&self.store),
                self.broadcaster.clone(),
                WorkerConfig {
                    api_key: api_key.clone(),
                    reconnect_delay: self.config.reconnect_delay,
                },
            );

            let mut workers = self.workers.lock().await;
            if *self.shutdown.borrow() {
                return Ok(report);
            }
            workers.push(worker.spawn(self.shutdown.subscribe()));
            report.workers += 1;
            self.connections.store(report.workers, Ordering::SeqCst);
        }

        let workers = self.workers.lock().await;
        if *self.shutdown.borrow() {
            return Ok(report);
        }
        self.active.store(true, Ordering::SeqCst);
        drop(workers);

        info!(workers = report.workers, "Tracking active");
        Ok(report)
    }

    /// Stop every worker and wait for them to close their connections.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let handles = {
            let mut workers = self.workers.lock().await;
            self.active.store(false, Ordering::SeqCst);
            std::mem::take(&mut *workers)
        };
        let count = handles.len();
        for handle in handles {
            handle.join().await;
        }
        self.connections.store(0, Ordering::SeqCst);
        info!(workers = count, "Tracking stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TrackingStatus {
        TrackingStatus {
            total_tracked: self.store.count(),
            positioned_count: self.store.positioned_count(),
            active: self.is_active(),
            connections: self.connections.load(Ordering::SeqCst),
        }
    }

    /// Current state of each worker, by batch index
    pub async fn worker_states(&self) -> Vec<(usize, WorkerState)> {
        self.workers
            .lock()
            .await
            .iter()
            .map(|handle| (handle.batch_index(), handle.state()))
            .collect()
    }
}
