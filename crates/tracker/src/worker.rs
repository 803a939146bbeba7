//! Connection worker: owns one batch and one upstream connection at a time
//!
//! Each worker runs on its own task as an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Receiving
//!                     ^                          |
//!                     |                          v
//!                     +-------- Backoff <--------+
//! ```
//!
//! A failed connect also goes to Backoff. Backoff waits a fixed delay and
//! retries until the shutdown signal fires; the worker then closes any open
//! connection and settles in Disconnected.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ais::{AisEnvelope, Inbound, SubscriptionRequest};
use crate::broadcaster::Broadcaster;
use crate::error::StreamError;
use crate::metrics::{self, BatchMetrics};
use crate::partition::Batch;
use crate::resolver::ApiKey;
use crate::store::StateStore;
use crate::traits::{StreamConnection, StreamSource};

/// Default delay between a connection loss and the next attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Max time allowed for a polite close during shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const TRANSITION_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    Backoff,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Subscribed => "subscribed",
            WorkerState::Receiving => "receiving",
            WorkerState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub api_key: ApiKey,
    pub reconnect_delay: Duration,
}

impl WorkerConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// How a receiving session ended
enum SessionEnd {
    Stopped,
    Closed,
    Failed(StreamError),
}

pub struct ConnectionWorker {
    batch: Batch,
    source: Arc<dyn StreamSource>,
    store: Arc<StateStore>,
    broadcaster: Broadcaster,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
    transitions: broadcast::Sender<WorkerState>,
    metrics: BatchMetrics,
}

impl ConnectionWorker {
    pub fn new(
        batch: Batch,
        source: Arc<dyn StreamSource>,
        store: Arc<StateStore>,
        broadcaster: Broadcaster,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let metrics = BatchMetrics::new(batch.index);
        metrics.set_mmsis(batch.len());

        Self {
            batch,
            source,
            store,
            broadcaster,
            config,
            state,
            transitions,
            metrics,
        }
    }

    /// Every state change from now on, in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<WorkerState> {
        self.transitions.subscribe()
    }

    /// Start the worker on its own task. It runs until `shutdown` becomes
    /// true or its sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> WorkerHandle {
        let handle_state = self.state.subscribe();
        let batch_index = self.batch.index;

        let task = tokio::spawn(self.run(shutdown));

        WorkerHandle {
            batch_index,
            state: handle_state,
            task,
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
        // No receivers is fine
        let _ = self.transitions.send(state);
        debug!(batch = self.batch.index, state = %state, "Worker state");
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(batch = self.batch.index, mmsis = self.batch.len(), "Connection worker started");

        loop {
            if stop_requested(&shutdown) {
                break;
            }

            self.set_state(WorkerState::Connecting);
            let connected = tokio::select! {
                _ = wait_for_stop(&mut shutdown) => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(mut conn) => {
                    self.set_state(WorkerState::Subscribed);
                    self.metrics.set_connected();
                    info!(batch = self.batch.index, "Upstream connected");

                    let end = self.session(conn.as_mut(), &mut shutdown).await;
                    self.metrics.set_disconnected();

                    match end {
                        SessionEnd::Stopped => {
                            close_quietly(conn.as_mut(), self.batch.index).await;
                            break;
                        }
                        SessionEnd::Closed => {
                            info!(batch = self.batch.index, "Upstream closed the connection");
                        }
                        SessionEnd::Failed(e) => {
                            warn!(batch = self.batch.index, error = %e, "Connection lost");
                            close_quietly(conn.as_mut(), self.batch.index).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(batch = self.batch.index, error = %e, "Connect failed");
                }
            }

            self.set_state(WorkerState::Backoff);
            self.metrics.inc_reconnect();
            info!(
                batch = self.batch.index,
                delay_secs = self.config.reconnect_delay.as_secs_f64(),
                "Reconnecting after delay"
            );

            tokio::select! {
                _ = wait_for_stop(&mut shutdown) => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(WorkerState::Disconnected);
        info!(batch = self.batch.index, "Connection worker stopped");
    }

    /// Subscribe, then read until the connection ends or shutdown fires.
    async fn session(
        &self,
        conn: &mut dyn StreamConnection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let request =
            SubscriptionRequest::for_mmsis(self.config.api_key.expose(), self.batch.mmsi_strings());
        let text = match serde_json::to_string(&request) {
            Ok(text) => text,
            Err(e) => return SessionEnd::Failed(e.into()),
        };

        let sent = tokio::select! {
            _ = wait_for_stop(shutdown) => return SessionEnd::Stopped,
            sent = conn.send_text(text) => sent,
        };
        if let Err(e) = sent {
            return SessionEnd::Failed(e);
        }
        info!(batch = self.batch.index, mmsis = self.batch.len(), "Subscription sent");
        self.set_state(WorkerState::Receiving);

        loop {
            let next = tokio::select! {
                _ = wait_for_stop(shutdown) => return SessionEnd::Stopped,
                next = conn.next_text() => next,
            };

            match next {
                Ok(Some(text)) => self.handle_message(&text),
                Ok(None) => return SessionEnd::Closed,
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let envelope = match AisEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.inc_discarded("parse");
                debug!(batch = self.batch.index, error = %e, "Discarding malformed message");
                return;
            }
        };

        self.metrics.inc_message(envelope.type_label());

        match envelope.classify(|| Utc::now().to_rfc3339()) {
            Inbound::Position { mmsi, sample } => {
                if !self.batch.contains(mmsi) {
                    self.metrics.inc_discarded("foreign_mmsi");
                    debug!(batch = self.batch.index, %mmsi, "Discarding position outside batch");
                    return;
                }

                debug!(batch = self.batch.index, %mmsi, lat = sample.lat, lon = sample.lon, "Position");
                let state = self.store.merge_position(mmsi, sample);
                self.metrics.inc_merged();
                metrics::set_vessels(self.store.count(), self.store.positioned_count());
                self.broadcaster.publish(mmsi, state);
            }
            Inbound::UpstreamError(detail) => {
                self.metrics.inc_discarded("upstream_error");
                warn!(batch = self.batch.index, error = %detail, "aisstream reported an error");
            }
            Inbound::Incomplete => {
                self.metrics.inc_discarded("incomplete");
            }
            Inbound::Ignored(message_type) => {
                trace!(batch = self.batch.index, message_type = ?message_type, "Ignoring message");
            }
        }
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolves once shutdown is signalled or its sender is gone.
async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn close_quietly(conn: &mut dyn StreamConnection, batch: usize) {
    match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(batch, error = %e, "Close failed"),
        Err(_) => debug!(batch, "Close timed out"),
    }
}

/// Handle to a running worker
pub struct WorkerHandle {
    batch_index: usize,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn batch_index(&self) -> usize {
        self.batch_index
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Wait for the worker task to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(batch = self.batch_index, error = %e, "Worker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aistrack_catalog::Mmsi;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays `frames`, then either closes or stays open forever.
    struct MockConnection {
        frames: VecDeque<String>,
        hold_open: bool,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamConnection for MockConnection {
        async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn next_text(&mut self) -> Result<Option<String>, StreamError> {
            if let Some(frame) = self.frames.pop_front() {
                return Ok(Some(frame));
            }
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            Ok(None)
        }

        async fn close(&mut self) -> Result<(), StreamError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockSource {
        frames: Vec<String>,
        hold_open: bool,
        fail_first: usize,
        attempts: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockSource {
        fn new(frames: Vec<String>, hold_open: bool) -> Self {
            Self {
                frames,
                hold_open,
                fail_first: 0,
                attempts: Arc::new(AtomicUsize::new(0)),
                sent: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl StreamSource for MockSource {
        async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(StreamError::Connection("refused".to_string()));
            }
            Ok(Box::new(MockConnection {
                frames: self.frames.iter().cloned().collect(),
                hold_open: self.hold_open,
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn position(mmsi: u32, lat: f64, lon: Option<f64>) -> String {
        let mut metadata = serde_json::json!({"MMSI": mmsi, "latitude": lat, "time_utc": "t0"});
        if let Some(lon) = lon {
            metadata["longitude"] = serde_json::json!(lon);
        }
        serde_json::json!({
            "MessageType": "PositionReport",
            "MetaData": metadata,
            "Message": {"PositionReport": {"Sog": 10.0, "Cog": 180.0}}
        })
        .to_string()
    }

    fn batch(ids: &[u32]) -> Batch {
        Batch {
            index: 0,
            mmsis: ids.iter().copied().map(Mmsi).collect(),
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            api_key: ApiKey::new("test-key"),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    async fn next_transition(rx: &mut broadcast::Receiver<WorkerState>) -> WorkerState {
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("transition timed out")
            .expect("transition channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_cycle_on_immediate_close() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let source = Arc::new(MockSource::new(Vec::new(), false));
        let worker = ConnectionWorker::new(
            batch(&[100]),
            source.clone(),
            store,
            broadcaster,
            config(),
        );
        let mut transitions = worker.subscribe_transitions();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(next_transition(&mut transitions).await);
        }
        assert_eq!(
            seen,
            vec![
                WorkerState::Connecting,
                WorkerState::Subscribed,
                WorkerState::Receiving,
                WorkerState::Backoff,
                WorkerState::Connecting,
            ]
        );

        stop_tx.send(true).unwrap();
        handle.join().await;

        // After stop the only remaining transitions lead to Disconnected.
        let mut rest = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            rest.push(state);
        }
        assert_eq!(rest.last(), Some(&WorkerState::Disconnected));

        let attempts = source.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), attempts);
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_request_sent() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let source = Arc::new(MockSource::new(Vec::new(), true));
        let worker = ConnectionWorker::new(
            batch(&[100, 200]),
            source.clone(),
            store,
            broadcaster,
            config(),
        );
        let mut transitions = worker.subscribe_transitions();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        while next_transition(&mut transitions).await != WorkerState::Receiving {}

        let sent = source.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let request: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(request["APIKey"], "test-key");
        assert_eq!(request["FiltersShipMMSI"], serde_json::json!(["100", "200"]));
        assert_eq!(
            request["BoundingBoxes"],
            serde_json::json!([[[90.0, -180.0], [-90.0, 180.0]]])
        );

        stop_tx.send(true).unwrap();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_receiving_closes_connection() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let source = Arc::new(MockSource::new(Vec::new(), true));
        let worker = ConnectionWorker::new(
            batch(&[100]),
            source.clone(),
            store,
            broadcaster,
            config(),
        );
        let mut transitions = worker.subscribe_transitions();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        while next_transition(&mut transitions).await != WorkerState::Receiving {}
        assert_eq!(handle.state(), WorkerState::Receiving);

        stop_tx.send(true).unwrap();
        assert_eq!(next_transition(&mut transitions).await, WorkerState::Disconnected);
        assert_eq!(handle.state(), WorkerState::Disconnected);
        handle.join().await;

        assert!(source.closed.load(Ordering::SeqCst));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_with_backoff() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let mut source = MockSource::new(Vec::new(), true);
        source.fail_first = 3;
        let source = Arc::new(source);
        let worker = ConnectionWorker::new(
            batch(&[100]),
            source.clone(),
            store,
            broadcaster,
            config(),
        );
        let mut transitions = worker.subscribe_transitions();
        let (stop_tx, stop_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        let handle = worker.spawn(stop_rx);

        while next_transition(&mut transitions).await != WorkerState::Receiving {}

        assert_eq!(source.attempts.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(15));

        stop_tx.send(true).unwrap();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_stops_worker() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let mut source = MockSource::new(Vec::new(), true);
        source.fail_first = usize::MAX;
        let worker = ConnectionWorker::new(batch(&[100]), Arc::new(source), store, broadcaster, config());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        drop(stop_tx);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_longitude_is_discarded() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let mut observer = broadcaster.subscribe();
        let frames = vec![position(200, 10.0, None), position(100, 1.0, Some(2.0))];
        let source = Arc::new(MockSource::new(frames, true));
        let worker = ConnectionWorker::new(
            batch(&[100, 200]),
            source,
            Arc::clone(&store),
            broadcaster,
            config(),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        let update = tokio::time::timeout(Duration::from_secs(10), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.mmsi, Mmsi(100));
        assert!(observer.try_recv().is_none());
        assert!(store.get(Mmsi(200)).is_none());
        assert_eq!(store.positioned_count(), 1);

        stop_tx.send(true).unwrap();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_and_malformed_messages_ignored() {
        let store = Arc::new(StateStore::new());
        let broadcaster = Broadcaster::start(Arc::clone(&store), 16);
        let mut observer = broadcaster.subscribe();
        let frames = vec![
            "not json".to_string(),
            r#"{"error":"Api Key Is Not Valid"}"#.to_string(),
            r#"{"MessageType":"ShipStaticData","MetaData":{"MMSI":100}}"#.to_string(),
            position(999, 5.0, Some(5.0)),
            position(100, 0.0, Some(0.0)),
        ];
        let source = Arc::new(MockSource::new(frames, true));
        let worker = ConnectionWorker::new(
            batch(&[100]),
            source,
            Arc::clone(&store),
            broadcaster,
            config(),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = worker.spawn(stop_rx);

        let update = tokio::time::timeout(Duration::from_secs(10), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.mmsi, Mmsi(100));
        let position = update.state.position.unwrap();
        assert_eq!((position.lat, position.lon), (0.0, 0.0));
        assert_eq!(position.sog, 10.0);
        assert_eq!(position.timestamp, "t0");
        assert!(store.get(Mmsi(999)).is_none());
        assert_eq!(store.count(), 1);

        stop_tx.send(true).unwrap();
        handle.join().await;
    }
}
