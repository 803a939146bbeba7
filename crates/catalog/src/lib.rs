//! aistrack-catalog: static vessel reference data
//!
//! Loads the set of vessels to track, together with their descriptive
//! attributes, from a YAML file or a PostgreSQL `vessels_static` table.

pub mod catalog;
pub mod error;
pub mod file;
pub mod postgres;
pub mod vessel;

pub use catalog::{
    Catalog, CatalogFilter, StaticCatalog, DEFAULT_EXCLUDED_SHIP_TYPES, DEFAULT_MIN_LENGTH,
};
pub use error::CatalogError;
pub use file::FileCatalog;
pub use postgres::PostgresCatalog;
pub use vessel::{Mmsi, StaticAttributes, VesselRecord, UNKNOWN};
