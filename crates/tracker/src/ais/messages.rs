//! aisstream.io message types
//!
//! Inbound messages are envelopes with a `MessageType` discriminator, a
//! `MetaData` block (MMSI, position, receive time) and a `Message` body keyed
//! by type. Only `PositionReport` is acted upon. Unknown fields are ignored.

use aistrack_catalog::Mmsi;
use serde::{Deserialize, Serialize};

use crate::store::PositionSample;

/// Message type carrying a vessel position
pub const POSITION_REPORT: &str = "PositionReport";

/// Message types aisstream documents; anything else is labelled `other`
const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "AddressedBinaryMessage",
    "AddressedSafetyMessage",
    "AidsToNavigationReport",
    "AssignedModeCommand",
    "BaseStationReport",
    "BinaryAcknowledge",
    "BinaryBroadcastMessage",
    "ChannelManagement",
    "CoordinatedUTCInquiry",
    "DataLinkManagementMessage",
    "DataLinkManagementMessageData",
    "ExtendedClassBPositionReport",
    "GnssBroadcastBinaryMessage",
    "GroupAssignmentCommand",
    "Interrogation",
    "LongRangeAisBroadcastMessage",
    "MultiSlotBinaryMessage",
    POSITION_REPORT,
    "SafetyBroadcastMessage",
    "ShipStaticData",
    "SingleSlotBinaryMessage",
    "StandardClassBPositionReport",
    "StandardSearchAndRescueAircraftReport",
    "StaticDataReport",
    "UnknownMessage",
];

/// Bounding box covering every valid coordinate: `[[lat, lon], [lat, lon]]`
pub const GLOBAL_BOUNDING_BOX: [[f64; 2]; 2] = [[90.0, -180.0], [-90.0, 180.0]];

/// Subscription request sent once per connection, right after it opens
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest<'a> {
    #[serde(rename = "APIKey")]
    pub api_key: &'a str,
    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<[[f64; 2]; 2]>,
    #[serde(rename = "FiltersShipMMSI")]
    pub filters_ship_mmsi: Vec<String>,
}

impl<'a> SubscriptionRequest<'a> {
    /// Global subscription restricted to the given MMSIs
    pub fn for_mmsis(api_key: &'a str, mmsis: Vec<String>) -> Self {
        Self {
            api_key,
            bounding_boxes: vec![GLOBAL_BOUNDING_BOX],
            filters_ship_mmsi: mmsis,
        }
    }
}

/// Incoming envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AisEnvelope {
    #[serde(rename = "MessageType", default)]
    pub message_type: Option<String>,
    #[serde(rename = "MetaData", default)]
    pub metadata: Option<MetaData>,
    #[serde(rename = "Message", default)]
    pub message: Option<MessageBody>,
    #[serde(alias = "Error", default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaData {
    #[serde(rename = "MMSI", default)]
    pub mmsi: Option<u32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub time_utc: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "PositionReport", default)]
    pub position_report: Option<PositionReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionReport {
    #[serde(rename = "Sog", default)]
    pub sog: Option<f64>,
    #[serde(rename = "Cog", default)]
    pub cog: Option<f64>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
}

/// What a worker should do with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Complete position report, ready to merge
    Position { mmsi: Mmsi, sample: PositionSample },
    /// Upstream reported an error
    UpstreamError(String),
    /// Position report without an MMSI or a coordinate
    Incomplete,
    /// Any other message type
    Ignored(Option<String>),
}

impl AisEnvelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Bounded metric label for the message type
    pub fn type_label(&self) -> &'static str {
        match self.message_type.as_deref() {
            None => "none",
            Some(message_type) => KNOWN_MESSAGE_TYPES
                .iter()
                .find(|known| **known == message_type)
                .copied()
                .unwrap_or("other"),
        }
    }

    /// Classify the envelope. `received_at` becomes the sample timestamp
    /// when the upstream omits `time_utc`.
    pub fn classify(self, received_at: impl FnOnce() -> String) -> Inbound {
        if let Some(error) = self.error {
            let detail = match error {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Inbound::UpstreamError(detail);
        }

        if self.message_type.as_deref() != Some(POSITION_REPORT) {
            return Inbound::Ignored(self.message_type);
        }

        let metadata = self.metadata.unwrap_or_default();
        let report = self
            .message
            .and_then(|m| m.position_report)
            .unwrap_or_default();

        let mmsi = metadata.mmsi;
        let lat = metadata.latitude.or(report.latitude);
        let lon = metadata.longitude.or(report.longitude);

        let (Some(mmsi), Some(lat), Some(lon)) = (mmsi, lat, lon) else {
            return Inbound::Incomplete;
        };

        Inbound::Position {
            mmsi: Mmsi(mmsi),
            sample: PositionSample {
                lat,
                lon,
                sog: report.sog.unwrap_or(0.0),
                cog: report.cog.unwrap_or(0.0),
                timestamp: metadata.time_utc.unwrap_or_else(received_at),
            },
        }
    }
}
