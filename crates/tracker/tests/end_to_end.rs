//! Catalog to observer, through the supervisor, workers, store and broadcaster,
//! against an in-memory upstream that honours the MMSI filter.

use aistrack_catalog::{Catalog, CatalogError, CatalogFilter, Mmsi, VesselRecord};
use aistrack_tracker_lib::{
    ApiKey, Broadcaster, IngestionSupervisor, KeyResolver, ResolverError, StateStore,
    StreamConnection, StreamError, StreamSource, SupervisorConfig, WorkerState,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Shared upstream feed; every connection sees every frame and keeps the
/// ones matching its subscription.
struct FakeUpstream {
    feed: broadcast::Sender<String>,
    subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeUpstream {
    fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            feed,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn emit(&self, frame: String) {
        self.feed.send(frame).unwrap();
    }
}

struct FakeConnection {
    feed: broadcast::Receiver<String>,
    filter: HashSet<u64>,
    subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl StreamSource for FakeUpstream {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        Ok(Box::new(FakeConnection {
            feed: self.feed.subscribe(),
            filter: HashSet::new(),
            subscriptions: Arc::clone(&self.subscriptions),
        }))
    }
}

#[async_trait]
impl StreamConnection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        let request: serde_json::Value = serde_json::from_str(&text)?;
        let mmsis: Vec<String> = request["FiltersShipMMSI"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        self.filter = mmsis.iter().filter_map(|id| id.parse().ok()).collect();
        self.subscriptions.lock().unwrap().push(mmsis);
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            let frame = match self.feed.recv().await {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            };
            let value: serde_json::Value = serde_json::from_str(&frame)?;
            let mmsi = value["MetaData"]["MMSI"].as_u64();
            if mmsi.map_or(true, |m| self.filter.contains(&m)) {
                return Ok(Some(frame));
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

struct FixedKey;

impl KeyResolver for FixedKey {
    fn resolve(&self, _source: &str) -> Result<ApiKey, ResolverError> {
        Ok(ApiKey::new("integration-key"))
    }
}

struct ThreeVessels;

#[async_trait]
impl Catalog for ThreeVessels {
    async fn load(&self, filter: &CatalogFilter) -> Result<Vec<VesselRecord>, CatalogError> {
        let records = [(100, 300.0), (200, 250.0), (300, 200.0)]
            .into_iter()
            .map(|(mmsi, length)| VesselRecord {
                mmsi: Mmsi(mmsi),
                name: Some(format!("VESSEL {}", mmsi)),
                ship_type: Some(70),
                length: Some(length),
                beam: Some(40.0),
                imo: None,
                call_sign: None,
                flag_state: Some("PA".to_string()),
            })
            .collect();
        Ok(filter.apply(records))
    }
}

fn position(mmsi: u32, lat: f64, lon: Option<f64>) -> String {
    let mut metadata = serde_json::json!({
        "MMSI": mmsi,
        "latitude": lat,
        "time_utc": "2025-03-01 12:00:00 +0000 UTC"
    });
    if let Some(lon) = lon {
        metadata["longitude"] = serde_json::json!(lon);
    }
    serde_json::json!({
        "MessageType": "PositionReport",
        "MetaData": metadata,
        "Message": {"PositionReport": {"Sog": 14.2, "Cog": 91.0}}
    })
    .to_string()
}

async fn start_tracking() -> (Arc<IngestionSupervisor>, Arc<FakeUpstream>) {
    let upstream = Arc::new(FakeUpstream::new());
    let store = Arc::new(StateStore::new());
    let broadcaster = Broadcaster::start(Arc::clone(&store), 64);
    let config = SupervisorConfig {
        max_batch_size: NonZeroUsize::new(2).unwrap(),
        stagger: Duration::from_millis(50),
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(IngestionSupervisor::new(
        store,
        broadcaster,
        upstream.clone(),
        config,
    ));

    let report = supervisor
        .start(&FixedKey, "env:AISSTREAM_API_KEY", &ThreeVessels)
        .await
        .unwrap();
    assert_eq!(report.batches, 2);

    // Both workers subscribed before the upstream emits anything
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let states = supervisor.worker_states().await;
            if states.iter().all(|(_, state)| *state == WorkerState::Receiving) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    (supervisor, upstream)
}

#[tokio::test]
async fn test_position_flows_from_upstream_to_observer() {
    let (supervisor, upstream) = start_tracking().await;

    let subscriptions = upstream.subscriptions.lock().unwrap().clone();
    assert_eq!(
        subscriptions,
        vec![
            vec!["100".to_string(), "200".to_string()],
            vec!["300".to_string()],
        ]
    );

    let mut observer = supervisor.broadcaster().subscribe();
    let initial = observer.take_snapshot();
    assert_eq!(initial.len(), 3);
    assert!(initial.values().all(|state| !state.is_positioned()));

    upstream.emit(position(200, 51.9, Some(4.05)));

    let update = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.mmsi, Mmsi(200));
    assert_eq!(update.state.attributes.name, "VESSEL 200");
    let sample = update.state.position.clone().unwrap();
    assert_eq!((sample.lat, sample.lon, sample.sog), (51.9, 4.05, 14.2));

    let snapshot = supervisor.store().snapshot();
    assert!(snapshot[&Mmsi(200)].is_positioned());
    assert!(!snapshot[&Mmsi(100)].is_positioned());
    assert!(!snapshot[&Mmsi(300)].is_positioned());

    let status = supervisor.status();
    assert_eq!(status.total_tracked, 3);
    assert_eq!(status.positioned_count, 1);
    assert!(status.active);

    // Only the batch owning 200 saw the frame: exactly one update.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observer.try_recv().is_none());

    supervisor.stop().await;
    assert!(!supervisor.status().active);
}

#[tokio::test]
async fn test_position_without_longitude_is_discarded() {
    let (supervisor, upstream) = start_tracking().await;
    let mut observer = supervisor.broadcaster().subscribe();
    observer.take_snapshot();

    // Same batch, so the complete frame is handled after the incomplete one.
    upstream.emit(position(100, 10.0, None));
    upstream.emit(position(200, 1.0, Some(1.0)));

    let update = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.mmsi, Mmsi(200));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observer.try_recv().is_none());
    assert!(!supervisor.store().get(Mmsi(100)).unwrap().is_positioned());
    assert_eq!(supervisor.status().positioned_count, 1);

    supervisor.stop().await;
}
