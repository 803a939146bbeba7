//! Prometheus metrics for the tracker
//!
//! Per-batch metrics follow each connection worker; tracker-wide gauges cover
//! the store and the broadcaster.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

const LABEL_BATCH: &str = "batch";
const LABEL_MESSAGE_TYPE: &str = "message_type";
const LABEL_REASON: &str = "reason";

/// Messages received per batch and message type
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aistrack_messages_total",
        "Total upstream messages received",
        &[LABEL_BATCH, LABEL_MESSAGE_TYPE]
    )
    .expect("Failed to register messages_total metric")
});

/// Messages discarded per batch and reason
static DISCARDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aistrack_messages_discarded_total",
        "Upstream messages discarded without a state change",
        &[LABEL_BATCH, LABEL_REASON]
    )
    .expect("Failed to register messages_discarded_total metric")
});

/// Positions merged into the store per batch
static POSITIONS_MERGED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aistrack_positions_merged_total",
        "Position reports merged into the state store",
        &[LABEL_BATCH]
    )
    .expect("Failed to register positions_merged_total metric")
});

/// Connection status per batch (1 = connected, 0 = disconnected)
static WEBSOCKET_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "aistrack_websocket_connected",
        "WebSocket connection status per batch (1=connected, 0=disconnected)",
        &[LABEL_BATCH]
    )
    .expect("Failed to register websocket_connected metric")
});

/// Reconnect attempts per batch
static RECONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aistrack_reconnects_total",
        "Connection losses followed by a reconnect attempt",
        &[LABEL_BATCH]
    )
    .expect("Failed to register reconnects_total metric")
});

/// MMSIs subscribed per batch
static BATCH_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "aistrack_batch_mmsis",
        "Number of MMSIs subscribed per batch",
        &[LABEL_BATCH]
    )
    .expect("Failed to register batch_mmsis metric")
});

static BATCHES_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("aistrack_batches_total", "Number of connection batches")
        .expect("Failed to register batches_total metric")
});

static VESSELS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("aistrack_vessels_tracked", "Vessels in the state store")
        .expect("Failed to register vessels_tracked metric")
});

static VESSELS_POSITIONED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "aistrack_vessels_positioned",
        "Vessels with at least one known position"
    )
    .expect("Failed to register vessels_positioned metric")
});

static OBSERVERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("aistrack_observers", "Registered live observers")
        .expect("Failed to register observers metric")
});

static OBSERVER_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aistrack_observer_dropped_updates_total",
        "Updates dropped because an observer queue was full"
    )
    .expect("Failed to register observer_dropped_updates_total metric")
});

/// Handle for recording metrics for one connection batch
#[derive(Clone)]
pub struct BatchMetrics {
    batch: String,
}

impl BatchMetrics {
    pub fn new(batch_index: usize) -> Self {
        Self {
            batch: batch_index.to_string(),
        }
    }

    pub fn set_mmsis(&self, count: usize) {
        BATCH_SIZE
            .with_label_values(&[&self.batch])
            .set(count as i64);
    }

    pub fn set_connected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.batch]).set(1);
    }

    pub fn set_disconnected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.batch]).set(0);
    }

    pub fn inc_reconnect(&self) {
        RECONNECTS_TOTAL.with_label_values(&[&self.batch]).inc();
    }

    /// Record a received message by its upstream type
    pub fn inc_message(&self, message_type: &str) {
        MESSAGES_TOTAL
            .with_label_values(&[&self.batch, message_type])
            .inc();
    }

    /// Record a discarded message, e.g. `parse`, `incomplete`, `foreign_mmsi`
    pub fn inc_discarded(&self, reason: &str) {
        DISCARDED_TOTAL
            .with_label_values(&[&self.batch, reason])
            .inc();
    }

    pub fn inc_merged(&self) {
        POSITIONS_MERGED.with_label_values(&[&self.batch]).inc();
    }

    pub fn get_merged(&self) -> u64 {
        POSITIONS_MERGED.with_label_values(&[&self.batch]).get()
    }
}

pub fn set_batches_total(count: usize) {
    BATCHES_TOTAL.set(count as i64);
}

pub fn set_vessels(tracked: usize, positioned: usize) {
    VESSELS_TRACKED.set(tracked as i64);
    VESSELS_POSITIONED.set(positioned as i64);
}

/// Gauge of registered live observers, kept current by the broadcaster
pub fn observers_gauge() -> IntGauge {
    OBSERVERS.clone()
}

pub fn inc_observer_dropped() {
    OBSERVER_DROPPED.inc();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
