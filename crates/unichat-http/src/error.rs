//! HTTP-layer errors

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::config::ConfigError;
use crate::metrics::MetricsError;

/// Failures that stop the server from starting or running
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Errors returned to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Missing or invalid user identity")]
    Unauthenticated,

    #[error("Metrics encoding failed: {0}")]
    Metrics(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::UnknownCategory(_) => "UNKNOWN_CATEGORY",
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Metrics(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownCategory(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
