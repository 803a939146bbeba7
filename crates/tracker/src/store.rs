//! Latest-known vessel state
//!
//! A sharded map (DashMap) keyed by MMSI. Writes to different vessels lock
//! different shards; writes to the same vessel serialize on its entry and the
//! later one wins. Nothing here awaits, so no lock is ever held across I/O.

use aistrack_catalog::{Mmsi, StaticAttributes};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Latest observed position of one vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground, knots
    pub sog: f64,
    /// Course over ground, degrees
    pub cog: f64,
    pub timestamp: String,
}

/// Static attributes joined with the latest position, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselState {
    #[serde(flatten)]
    pub attributes: StaticAttributes,
    #[serde(flatten)]
    pub position: Option<PositionSample>,
}

impl VesselState {
    pub fn with_attributes(attributes: StaticAttributes) -> Self {
        Self {
            attributes,
            position: None,
        }
    }

    pub fn is_positioned(&self) -> bool {
        self.position.is_some()
    }
}

/// Shared table of vessel states, written by every connection worker.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: DashMap<Mmsi, VesselState>,
    positioned: AtomicUsize,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set static attributes, creating the entry if needed. Never touches
    /// an existing position.
    pub fn seed_static(&self, mmsi: Mmsi, attributes: StaticAttributes) {
        match self.entries.entry(mmsi) {
            Entry::Occupied(mut entry) => entry.get_mut().attributes = attributes,
            Entry::Vacant(entry) => {
                entry.insert(VesselState::with_attributes(attributes));
            }
        }
    }

    /// Replace the vessel's position and return the joined state.
    ///
    /// Vessels without seeded attributes get [`StaticAttributes::unknown`].
    pub fn merge_position(&self, mmsi: Mmsi, sample: PositionSample) -> VesselState {
        let mut entry = self
            .entries
            .entry(mmsi)
            .or_insert_with(|| VesselState::with_attributes(StaticAttributes::unknown()));

        if entry.position.replace(sample).is_none() {
            self.positioned.fetch_add(1, Ordering::Relaxed);
        }

        entry.value().clone()
    }

    pub fn get(&self, mmsi: Mmsi) -> Option<VesselState> {
        self.entries.get(&mmsi).map(|state| state.value().clone())
    }

    /// Copy of every entry. Later merges do not affect the returned map.
    pub fn snapshot(&self) -> BTreeMap<Mmsi, VesselState> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Number of tracked vessels
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of vessels with at least one position
    pub fn positioned_count(&self) -> usize {
        self.positioned.load(Ordering::Relaxed)
    }
}
