use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::CatalogError;
use crate::vessel::{Mmsi, StaticAttributes, VesselRecord};

/// Minimum overall length (metres) a vessel needs to be tracked
pub const DEFAULT_MIN_LENGTH: f64 = 100.0;

/// Ship types excluded by default (71/72: cargo, hazardous categories A/B)
pub const DEFAULT_EXCLUDED_SHIP_TYPES: [i32; 2] = [71, 72];

/// Which catalog rows are worth tracking
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFilter {
    pub min_length: f64,
    pub excluded_ship_types: Vec<i32>,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            excluded_ship_types: DEFAULT_EXCLUDED_SHIP_TYPES.to_vec(),
        }
    }
}

impl CatalogFilter {
    /// Rows without a length never match; rows without a ship type do.
    pub fn matches(&self, record: &VesselRecord) -> bool {
        let long_enough = record.length.is_some_and(|l| l >= self.min_length);
        let allowed_type = record
            .ship_type
            .map_or(true, |t| !self.excluded_ship_types.contains(&t));
        long_enough && allowed_type
    }

    /// Keep matching rows, longest vessels first.
    pub fn apply(&self, records: Vec<VesselRecord>) -> Vec<VesselRecord> {
        let mut kept: Vec<VesselRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
        kept.sort_by(|a, b| {
            b.length
                .partial_cmp(&a.length)
                .unwrap_or(Ordering::Equal)
        });
        kept
    }
}

/// Source of the vessels to track, queried once at startup.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return every vessel passing `filter`, longest first.
    async fn load(&self, filter: &CatalogFilter) -> Result<Vec<VesselRecord>, CatalogError>;
}

/// The loaded catalog: tracking order plus attribute lookup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    order: Vec<Mmsi>,
    attributes: HashMap<Mmsi, StaticAttributes>,
}

impl StaticCatalog {
    /// Build from catalog rows. Repeated MMSIs keep their first row so
    /// that every identifier is tracked exactly once.
    pub fn from_records(records: Vec<VesselRecord>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        let mut attributes = HashMap::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.mmsi) {
                tracing::debug!(mmsi = %record.mmsi, "Duplicate catalog row, keeping first");
                continue;
            }
            order.push(record.mmsi);
            attributes.insert(record.mmsi, record.attributes());
        }

        Self { order, attributes }
    }

    /// Identifiers in catalog order
    pub fn identifiers(&self) -> &[Mmsi] {
        &self.order
    }

    pub fn lookup(&self, mmsi: Mmsi) -> Option<&StaticAttributes> {
        self.attributes.get(&mmsi)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate `(mmsi, attributes)` in catalog order
    pub fn iter(&self) -> impl Iterator<Item = (Mmsi, &StaticAttributes)> {
        self.order
            .iter()
            .filter_map(|mmsi| self.attributes.get(mmsi).map(|attrs| (*mmsi, attrs)))
    }
}
