//! HTTP query surface: vessel snapshot, status, live SSE feed, health
//!
//! Every route reads from the supervisor's store or broadcaster; nothing
//! here writes vessel state.

use aistrack_catalog::Mmsi;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::metrics::encode_metrics;
use crate::store::VesselState;
use crate::supervisor::IngestionSupervisor;

/// Shared state for all routes
#[derive(Clone)]
pub struct ServerState {
    pub supervisor: Arc<IngestionSupervisor>,
}

impl ServerState {
    pub fn new(supervisor: Arc<IngestionSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tracking_active: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_vessels: usize,
    pub vessels_with_position: usize,
    pub tracking_active: bool,
    pub connections: usize,
}

/// One vessel as returned by the API
#[derive(Debug, Serialize)]
pub struct VesselEntry {
    pub mmsi: Mmsi,
    #[serde(flatten)]
    pub state: VesselState,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn entries(snapshot: BTreeMap<Mmsi, VesselState>) -> Vec<VesselEntry> {
    snapshot
        .into_iter()
        .map(|(mmsi, state)| VesselEntry { mmsi, state })
        .collect()
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tracking_active: state.supervisor.is_active(),
    })
}

/// Ready endpoint - returns 200 only when tracking is active
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let active = state.supervisor.is_active();
    let status_code = if active {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if active { "ready" } else { "not_ready" },
            tracking_active: active,
        }),
    )
}

async fn metrics() -> Response {
    match encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn vessels(State(state): State<ServerState>) -> Json<Vec<VesselEntry>> {
    Json(entries(state.supervisor.store().snapshot()))
}

async fn vessel(State(state): State<ServerState>, Path(mmsi): Path<u32>) -> Response {
    let mmsi = Mmsi(mmsi);
    match state.supervisor.store().get(mmsi) {
        Some(vessel) => Json(VesselEntry { mmsi, state: vessel }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("vessel {} not tracked", mmsi),
            }),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<ServerState>) -> Json<StatsResponse> {
    let status = state.supervisor.status();
    Json(StatsResponse {
        total_vessels: status.total_tracked,
        vessels_with_position: status.positioned_count,
        tracking_active: status.active,
        connections: status.connections,
    })
}

fn json_event<T: Serialize>(name: &str, value: &T) -> Event {
    match Event::default().event(name).json_data(value) {
        Ok(event) => event,
        Err(e) => {
            warn!(event = name, error = %e, "Failed to encode SSE event");
            Event::default().event("error").data(e.to_string())
        }
    }
}

/// Live feed: one `initial_data` event with the snapshot, then a
/// `vessel_update` event per merged position. Disconnecting unsubscribes.
async fn live_stream(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut observer = state.supervisor.broadcaster().subscribe();
    let initial = json_event("initial_data", &entries(observer.take_snapshot()));

    let updates = stream::unfold(observer, |mut observer| async move {
        let update = observer.recv().await;
        update.map(|update| (Ok::<_, Infallible>(json_event("vessel_update", &update)), observer))
    });

    Sse::new(stream::once(async move { Ok::<_, Infallible>(initial) }).chain(updates))
        .keep_alive(KeepAlive::default())
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/vessels", get(vessels))
        .route("/api/vessels/:mmsi", get(vessel))
        .route("/api/stats", get(stats))
        .route("/api/stream", get(live_stream))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn run_server<F>(addr: SocketAddr, state: ServerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
