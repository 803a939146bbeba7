use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use crate::catalog::{Catalog, CatalogFilter};
use crate::error::CatalogError;
use crate::vessel::VesselRecord;

/// On-disk layout of a catalog file
#[derive(Debug, Deserialize)]
struct CatalogFile {
    vessels: Vec<VesselRecord>,
}

/// Catalog backed by a YAML file:
///
/// ```yaml
/// vessels:
///   - mmsi: 244660000
///     name: EVER GIVEN
///     ship_type: 70
///     length: 399.9
/// ```
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every record in the file, unfiltered.
    pub fn read_all(&self) -> Result<Vec<VesselRecord>, CatalogError> {
        let content = std::fs::read_to_string(&self.path)?;
        let file: CatalogFile = serde_yaml::from_str(&content)?;
        Ok(file.vessels)
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn load(&self, filter: &CatalogFilter) -> Result<Vec<VesselRecord>, CatalogError> {
        let path = self.path.clone();
        let records = tokio::task::spawn_blocking(move || FileCatalog::new(path).read_all())
            .await
            .map_err(|e| CatalogError::Validation(format!("catalog reader panicked: {}", e)))??;

        let total = records.len();
        let kept = filter.apply(records);
        tracing::info!(
            path = %self.path.display(),
            total,
            kept = kept.len(),
            "Loaded vessel catalog file"
        );
        Ok(kept)
    }
}
