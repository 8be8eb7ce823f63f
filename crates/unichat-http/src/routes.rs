//! HTTP routes
//!
//! - `GET  /{category}/Subscribe?entityId=<id>` upgrades to a WebSocket and
//!   registers it. `conversationId` is accepted as an alias for `entityId`.
//! - `POST /realtime/disconnect` closes every connection of the caller.
//! - `GET  /health` returns registry statistics as JSON.
//! - `GET  /metrics` returns Prometheus text.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use unichat_realtime::{CategoryName, ConnectionRegistry, EntityScope, RegistryStats, UserId};

use crate::error::ApiError;
use crate::identity::IdentityResolver;
use crate::metrics::RealtimeMetrics;
use crate::transport::AxumTransport;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub identity: Arc<dyn IdentityResolver>,
    pub categories: Arc<HashSet<CategoryName>>,
    pub metrics: RealtimeMetrics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    #[serde(alias = "conversationId")]
    pub entity_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub closed: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub registry: RegistryStats,
}

pub fn router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/{category}/Subscribe", get(subscribe))
        .route("/realtime/disconnect", post(disconnect))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

/// GET /{category}/Subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(category) = state.categories.get(category.as_str()).cloned() else {
        return ApiError::UnknownCategory(category).into_response();
    };
    let Some(user) = state.identity.resolve(&headers).await else {
        return ApiError::Unauthenticated.into_response();
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let scope = EntityScope::from(query.entity_id);
    let registry = Arc::clone(&state.registry);
    upgrade.on_upgrade(move |socket| hold_subscription(registry, category, scope, user, socket))
}

/// Keep the upgraded request alive for as long as the subscription lasts.
async fn hold_subscription(
    registry: Arc<ConnectionRegistry>,
    category: CategoryName,
    scope: EntityScope,
    user: UserId,
    socket: WebSocket,
) {
    match registry
        .register(category.clone(), scope, user, AxumTransport::new(socket))
        .await
    {
        Ok(handle) => {
            let reason = handle.wait_until_closed().await;
            info!(
                connection_id = %handle.id(),
                category = %category,
                scope = %scope,
                user = %user,
                %reason,
                "Subscription ended"
            );
        }
        Err(error) => {
            warn!(
                category = %category,
                scope = %scope,
                user = %user,
                code = error.code(),
                %error,
                "Subscription rejected"
            );
        }
    }
}

/// POST /realtime/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let user = state
        .identity
        .resolve(&headers)
        .await
        .ok_or(ApiError::Unauthenticated)?;
    let closed = state.registry.remove_user_everywhere(user).await;
    Ok(Json(DisconnectResponse { closed }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.registry.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        registry: state.registry.stats(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state.metrics.refresh(&state.registry.stats());
    state
        .metrics
        .render()
        .map_err(|e| ApiError::Metrics(e.to_string()))
}
