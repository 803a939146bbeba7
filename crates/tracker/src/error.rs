use aistrack_catalog::CatalogError;
use thiserror::Error;

/// Failures talking to the upstream stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
    #[error("empty key: {0}")]
    EmptyKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal startup failures; tracking does not start when one occurs.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("credential loading failed: {0}")]
    Credentials(#[from] ResolverError),
    #[error("catalog loading failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("tracking already started")]
    AlreadyStarted,
}
