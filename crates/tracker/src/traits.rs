use async_trait::async_trait;

use crate::error::{ResolverError, StreamError};
use crate::resolver::ApiKey;

/// Opens upstream connections (aisstream WebSocket, test doubles).
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Establish a new connection. Returning `Ok` is a completed handshake.
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError>;
}

/// One open, message-oriented upstream connection.
#[async_trait]
pub trait StreamConnection: Send {
    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<(), StreamError>;

    /// Wait for the next text message.
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn next_text(&mut self) -> Result<Option<String>, StreamError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// KeyResolver trait for credential sources (env vars, files)
pub trait KeyResolver: Send + Sync {
    /// Resolve the API key from a source string (e.g., "env:AISSTREAM_API_KEY")
    fn resolve(&self, source: &str) -> Result<ApiKey, ResolverError>;
}
