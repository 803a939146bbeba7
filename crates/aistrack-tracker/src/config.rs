use aistrack_catalog::{CatalogFilter, DEFAULT_MIN_LENGTH};
use aistrack_tracker_lib::{SupervisorConfig, AISSTREAM_WS_URL};
use clap::Parser;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// aistrack-tracker: live AIS positions for a catalog of vessels
#[derive(Parser, Debug)]
#[command(name = "aistrack-tracker")]
pub struct Config {
    /// aisstream WebSocket URL
    #[arg(long, env = "AISSTREAM_URL", default_value = AISSTREAM_WS_URL)]
    pub ws_url: String,

    /// API key source: env:VAR or file:PATH (last non-empty line)
    #[arg(long, env = "AISTRACK_API_KEY_SOURCE", default_value = "file:api.txt")]
    pub api_key_source: String,

    /// YAML vessel catalog (`vessels: [...]`)
    #[arg(long, env = "AISTRACK_CATALOG_FILE", conflicts_with = "database_url")]
    pub catalog_file: Option<PathBuf>,

    /// PostgreSQL URL holding the vessels_static table
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Minimum vessel length in metres
    #[arg(long, env = "AISTRACK_MIN_LENGTH", default_value_t = DEFAULT_MIN_LENGTH)]
    pub min_length: f64,

    /// Comma-separated ship types to exclude
    #[arg(
        long,
        env = "AISTRACK_EXCLUDE_SHIP_TYPES",
        value_delimiter = ',',
        default_value = "71,72"
    )]
    pub exclude_ship_types: Vec<i32>,

    /// Max MMSIs per upstream connection
    #[arg(long, env = "AISTRACK_MAX_BATCH_SIZE", default_value = "50")]
    pub max_batch_size: NonZeroUsize,

    /// Delay between worker starts, milliseconds
    #[arg(long, env = "AISTRACK_STAGGER_MS", default_value = "1000")]
    pub stagger_ms: u64,

    /// Delay before reconnecting a lost connection, seconds
    #[arg(long, env = "AISTRACK_RECONNECT_DELAY_SECS", default_value = "5")]
    pub reconnect_delay_secs: u64,

    /// Keep-alive ping interval, seconds
    #[arg(long, env = "AISTRACK_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Per-observer update queue depth
    #[arg(long, env = "AISTRACK_OBSERVER_BUFFER", default_value = "1024")]
    pub observer_buffer: usize,

    /// HTTP listen address
    #[arg(long, env = "AISTRACK_LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    pub listen_addr: SocketAddr,

    /// Log as JSON lines
    #[arg(long, env = "AISTRACK_LOG_JSON")]
    pub log_json: bool,
}

/// Where the vessel catalog comes from
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogSource {
    File(PathBuf),
    Postgres(String),
}

impl Config {
    /// Exactly one catalog must be configured.
    pub fn catalog_source(&self) -> Option<CatalogSource> {
        match (&self.catalog_file, &self.database_url) {
            (Some(path), _) => Some(CatalogSource::File(path.clone())),
            (None, Some(url)) => Some(CatalogSource::Postgres(url.clone())),
            (None, None) => None,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_batch_size: self.max_batch_size,
            stagger: Duration::from_millis(self.stagger_ms),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            filter: CatalogFilter {
                min_length: self.min_length,
                excluded_ship_types: self.exclude_ship_types.clone(),
            },
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}
