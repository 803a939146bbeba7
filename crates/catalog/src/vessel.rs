use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder for names and flag states the catalog does not know.
pub const UNKNOWN: &str = "Unknown";

/// Maritime Mobile Service Identity, the key every vessel is tracked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mmsi(pub u32);

impl Mmsi {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive facts about a vessel, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAttributes {
    pub name: String,
    pub ship_type: Option<i32>,
    /// Overall length in metres
    pub length: Option<f64>,
    pub beam: Option<f64>,
    pub imo: Option<String>,
    pub call_sign: Option<String>,
    pub flag_state: String,
}

impl StaticAttributes {
    /// Attributes for a vessel the catalog has no entry for.
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            ship_type: None,
            length: None,
            beam: None,
            imo: None,
            call_sign: None,
            flag_state: UNKNOWN.to_string(),
        }
    }
}

impl Default for StaticAttributes {
    fn default() -> Self {
        Self::unknown()
    }
}

/// One row of the reference catalog, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselRecord {
    pub mmsi: Mmsi,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ship_type: Option<i32>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub beam: Option<f64>,
    #[serde(default)]
    pub imo: Option<String>,
    #[serde(default)]
    pub call_sign: Option<String>,
    #[serde(default)]
    pub flag_state: Option<String>,
}

impl VesselRecord {
    /// Convert to attributes, filling blank names and flags with [`UNKNOWN`].
    pub fn attributes(&self) -> StaticAttributes {
        StaticAttributes {
            name: non_blank(self.name.as_deref()),
            ship_type: self.ship_type,
            length: self.length,
            beam: self.beam,
            imo: self.imo.clone(),
            call_sign: self.call_sign.clone(),
            flag_state: non_blank(self.flag_state.as_deref()),
        }
    }
}

fn non_blank(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}
