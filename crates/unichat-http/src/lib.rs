//! # UniChat HTTP
//!
//! HTTP and WebSocket boundary for [`unichat_realtime`]: upgrades subscribe
//! requests, adapts axum sockets to the realtime transport trait, and
//! exposes logout, health and metrics routes.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use unichat_http::{HeaderIdentity, ServerConfigBuilder, serve};
//!
//! let config = ServerConfigBuilder::from_env()?.build()?;
//! let identity = Arc::new(HeaderIdentity::new(&config.user_header)?);
//! serve(config, identity).await?;
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use config::{ConfigError, ServerConfig, ServerConfigBuilder};
pub use error::{ApiError, ServerError};
pub use identity::{HeaderIdentity, IdentityResolver};
pub use metrics::{MetricsError, RealtimeMetrics};
pub use routes::{AppState, DisconnectResponse, HealthResponse, SubscribeQuery, router};
pub use server::{RealtimeServer, serve};
pub use shutdown::{shutdown_signal, shutdown_with_cleanup};
pub use transport::AxumTransport;
