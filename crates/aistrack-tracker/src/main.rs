//! aistrack-tracker: live AIS vessel tracking service
//!
//! Loads the vessel catalog, streams positions from aisstream over several
//! connections, and serves the latest state over HTTP and SSE.

mod config;
mod shutdown;

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aistrack_catalog::{Catalog, FileCatalog, PostgresCatalog};
use aistrack_tracker_lib::{
    run_server, AisStreamSource, Broadcaster, IngestionSupervisor, ServerState, SourceResolver,
    StateStore,
};

use config::{CatalogSource, Config};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    info!(
        ws_url = %config.ws_url,
        listen_addr = %config.listen_addr,
        max_batch_size = config.max_batch_size.get(),
        min_length = config.min_length,
        excluded_ship_types = ?config.exclude_ship_types,
        "aistrack-tracker starting"
    );

    let catalog: Arc<dyn Catalog> = match config.catalog_source() {
        Some(CatalogSource::File(path)) => {
            info!(path = %path.display(), "Using YAML vessel catalog");
            Arc::new(FileCatalog::new(path))
        }
        Some(CatalogSource::Postgres(url)) => {
            info!("Using PostgreSQL vessel catalog");
            Arc::new(PostgresCatalog::new(url))
        }
        None => {
            error!("No vessel catalog configured");
            bail!("set --catalog-file or --database-url");
        }
    };

    let source = AisStreamSource::new(&config.ws_url, config.ping_interval())
        .context("invalid aisstream URL")?;

    let store = Arc::new(StateStore::new());
    let broadcaster = Broadcaster::start(Arc::clone(&store), config.observer_buffer);
    let supervisor = Arc::new(IngestionSupervisor::new(
        store,
        broadcaster,
        Arc::new(source),
        config.supervisor_config(),
    ));

    // Ingestion starts in the background so the API answers while batches stagger in.
    let starter = {
        let supervisor = Arc::clone(&supervisor);
        let key_source = config.api_key_source.clone();
        tokio::spawn(async move {
            let resolver = SourceResolver::new();
            match supervisor.start(&resolver, &key_source, catalog.as_ref()).await {
                Ok(report) => info!(
                    vessels = report.vessels,
                    batches = report.batches,
                    workers = report.workers,
                    "Ingestion started"
                ),
                Err(_) => warn!("Serving without live tracking"),
            }
        })
    };

    let state = ServerState::new(Arc::clone(&supervisor));
    let shutdown = shutdown::wait_for_shutdown(Arc::clone(&supervisor));
    run_server(config.listen_addr, state, shutdown)
        .await
        .context("HTTP server failed")?;

    // No-op when the signal path already stopped everything.
    supervisor.stop().await;
    if let Err(e) = starter.await {
        warn!(error = %e, "Startup task failed");
    }

    info!("aistrack-tracker stopped");
    Ok(())
}
