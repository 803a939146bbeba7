//! Fan-out of merged vessel updates to live observers
//!
//! `publish` pushes onto an unbounded hand-off queue and returns at once. A
//! single dispatch task drains that queue and copies each update into every
//! observer's bounded queue with `try_send`, so a slow observer only loses its
//! own updates and never stalls a connection worker. Because one task
//! dispatches in publish order, each observer sees updates for a given vessel
//! in the order they were merged.

use aistrack_catalog::Mmsi;
use dashmap::DashMap;
use prometheus::IntGauge;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{StateStore, VesselState};

/// Default per-observer queue depth
pub const DEFAULT_OBSERVER_BUFFER: usize = 1024;

/// One merged update, as delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselUpdate {
    pub mmsi: Mmsi,
    pub state: VesselState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Registered observer queues. Every change is mirrored into the observer
/// gauge, whichever path removed the registration.
struct Observers {
    senders: DashMap<ObserverId, mpsc::Sender<VesselUpdate>>,
    gauge: IntGauge,
}

impl Observers {
    fn new(gauge: IntGauge) -> Self {
        Self {
            senders: DashMap::new(),
            gauge,
        }
    }

    fn insert(&self, id: ObserverId, tx: mpsc::Sender<VesselUpdate>) {
        self.senders.insert(id, tx);
        self.sync_gauge();
    }

    fn remove(&self, id: &ObserverId) -> bool {
        let removed = self.senders.remove(id).is_some();
        if removed {
            self.sync_gauge();
        }
        removed
    }

    fn clear(&self) -> usize {
        let count = self.senders.len();
        self.senders.clear();
        self.sync_gauge();
        count
    }

    fn len(&self) -> usize {
        self.senders.len()
    }

    fn sync_gauge(&self) {
        self.gauge.set(self.senders.len() as i64);
    }
}

/// Cloneable handle to the fan-out. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Broadcaster {
    queue: mpsc::UnboundedSender<VesselUpdate>,
    observers: Arc<Observers>,
    store: Arc<StateStore>,
    next_id: Arc<AtomicU64>,
    observer_buffer: usize,
}

impl Broadcaster {
    /// Create the broadcaster and spawn its dispatch task.
    ///
    /// The task exits once every `Broadcaster` clone has been dropped.
    pub fn start(store: Arc<StateStore>, observer_buffer: usize) -> Self {
        Self::start_with_gauge(store, observer_buffer, metrics::observers_gauge())
    }

    fn start_with_gauge(store: Arc<StateStore>, observer_buffer: usize, gauge: IntGauge) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let observers = Arc::new(Observers::new(gauge));

        tokio::spawn(dispatch(rx, Arc::clone(&observers)));

        Self {
            queue,
            observers,
            store,
            next_id: Arc::new(AtomicU64::new(1)),
            observer_buffer: observer_buffer.max(1),
        }
    }

    /// Hand an update off for delivery. Never blocks and never fails.
    pub fn publish(&self, mmsi: Mmsi, state: VesselState) {
        if self.queue.send(VesselUpdate { mmsi, state }).is_err() {
            debug!(%mmsi, "Dispatcher stopped, dropping update");
        }
    }

    /// Register an observer. The handle carries a snapshot of the store
    /// taken after registration, so no merge can fall between the two.
    pub fn subscribe(&self) -> ObserverHandle {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.observer_buffer);

        self.observers.insert(id, tx);

        let snapshot = self.store.snapshot();
        info!(observer = id.0, vessels = snapshot.len(), "Observer subscribed");

        ObserverHandle {
            id,
            snapshot: Some(snapshot),
            rx,
            observers: Arc::clone(&self.observers),
        }
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.observers.remove(&id);
        if removed {
            info!(observer = id.0, "Observer unsubscribed");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Drop every observer. Their queues close once drained, which ends
    /// any live feed built on them.
    pub fn close_all(&self) {
        let count = self.observers.clear();
        info!(observers = count, "Closed all observers");
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<VesselUpdate>, observers: Arc<Observers>) {
    while let Some(update) = rx.recv().await {
        observers.senders.retain(|id, tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::inc_observer_dropped();
                warn!(observer = id.0, mmsi = %update.mmsi, "Observer queue full, dropping update");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer = id.0, "Observer gone, removing");
                false
            }
        });
        observers.sync_gauge();
    }
    debug!("Broadcaster dispatch task stopped");
}

/// A registered observer: its initial snapshot followed by live updates.
///
/// Dropping the handle unsubscribes it.
pub struct ObserverHandle {
    id: ObserverId,
    snapshot: Option<BTreeMap<Mmsi, VesselState>>,
    rx: mpsc::Receiver<VesselUpdate>,
    observers: Arc<Observers>,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Take the snapshot captured at subscription. Empty on later calls.
    pub fn take_snapshot(&mut self) -> BTreeMap<Mmsi, VesselState> {
        self.snapshot.take().unwrap_or_default()
    }

    /// Next live update; `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<VesselUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<VesselUpdate> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if self.observers.remove(&self.id) {
            debug!(observer = self.id.0, "Observer handle dropped");
        }
    }
}
