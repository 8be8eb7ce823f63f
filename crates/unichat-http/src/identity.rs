//! Caller identity
//!
//! Authentication happens upstream. The realtime server only needs to know
//! which user a request belongs to, and asks an [`IdentityResolver`] for it.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName};
use unichat_realtime::UserId;

use crate::config::ConfigError;

/// Resolves the authenticated user behind a request
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` means the request is not authenticated.
    async fn resolve(&self, headers: &HeaderMap) -> Option<UserId>;
}

/// Reads a numeric user id from a trusted header set by the auth proxy.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: &str) -> Result<Self, ConfigError> {
        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
            ConfigError::ValidationError(format!("invalid identity header '{header}': {e}"))
        })?;
        Ok(Self { header })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

#[async_trait]
impl IdentityResolver for HeaderIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Option<UserId> {
        headers
            .get(&self.header)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()
            .map(UserId::new)
    }
}
