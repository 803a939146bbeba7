use std::env;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

/// aisstream API key. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Resolves the API key from `env:VAR` or `file:PATH` sources.
///
/// A file source yields its last non-empty line, so a key file can carry
/// comments or previous keys above the current one.
pub struct SourceResolver;

impl SourceResolver {
    pub fn new() -> Self {
        Self
    }

    fn from_env(var: &str) -> Result<ApiKey, ResolverError> {
        let value = env::var(var).map_err(|_| ResolverError::MissingKey(var.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(ResolverError::EmptyKey(var.to_string()));
        }
        Ok(ApiKey::new(value))
    }

    fn from_file(path: &str) -> Result<ApiKey, ResolverError> {
        let content = std::fs::read_to_string(Path::new(path))?;
        content
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ApiKey::new)
            .ok_or_else(|| ResolverError::EmptyKey(path.to_string()))
    }
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyResolver for SourceResolver {
    fn resolve(&self, source: &str) -> Result<ApiKey, ResolverError> {
        if let Some(var) = source.strip_prefix("env:") {
            let var = var.trim();
            if var.is_empty() {
                return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
            }
            return Self::from_env(var);
        }

        if let Some(path) = source.strip_prefix("file:") {
            let path = path.trim();
            if path.is_empty() {
                return Err(ResolverError::UnsupportedSource("empty file source".to_string()));
            }
            return Self::from_file(path);
        }

        Err(ResolverError::UnsupportedSource(format!(
            "expected 'env:' or 'file:' prefix, got: {}",
            source
        )))
    }
}
