use async_trait::async_trait;
use tokio_postgres::{NoTls, Row};

use crate::catalog::{Catalog, CatalogFilter};
use crate::error::CatalogError;
use crate::vessel::{Mmsi, VesselRecord};

const VESSELS_QUERY: &str = r#"
    SELECT mmsi::int8, name, ship_type::int4, length::float8, beam::float8,
           imo::text, call_sign, flag_state
    FROM vessels_static
    WHERE length::float8 >= $1::float8
      AND mmsi IS NOT NULL
      AND length IS NOT NULL
      AND (ship_type IS NULL OR NOT (ship_type::int4 = ANY($2::int4[])))
    ORDER BY length DESC
"#;

/// Catalog backed by the `vessels_static` table.
///
/// Connects lazily on [`Catalog::load`] so an unreachable database surfaces
/// as a load failure rather than at construction.
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    database_url: String,
}

impl PostgresCatalog {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn load(&self, filter: &CatalogFilter) -> Result<Vec<VesselRecord>, CatalogError> {
        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls).await?;

        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        let rows = client
            .query(VESSELS_QUERY, &[&filter.min_length, &filter.excluded_ship_types])
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row)? {
                Some(record) => records.push(record),
                None => tracing::warn!("Skipping catalog row with out-of-range MMSI"),
            }
        }

        drop(client);
        conn_task.abort();

        tracing::info!(vessels = records.len(), "Loaded vessel catalog from PostgreSQL");
        Ok(records)
    }
}

/// `None` when the stored MMSI does not fit an MMSI.
fn record_from_row(row: &Row) -> Result<Option<VesselRecord>, CatalogError> {
    let raw_mmsi: i64 = row.try_get(0)?;
    let Ok(mmsi) = u32::try_from(raw_mmsi) else {
        return Ok(None);
    };

    Ok(Some(VesselRecord {
        mmsi: Mmsi(mmsi),
        name: row.try_get(1)?,
        ship_type: row.try_get(2)?,
        length: row.try_get(3)?,
        beam: row.try_get(4)?,
        imo: row.try_get(5)?,
        call_sign: row.try_get(6)?,
        flag_state: row.try_get(7)?,
    }))
}
