//! Integration Gateway HTTP API
//!
//! Endpoints for:
//! - Change-capture webhook ingestion
//! - Per-user server-sent change events
//! - Dashboard aggregation
//! - Gateway and per-integration health
//! - Stream subscriptions and lifecycle hooks
//! - Proxying routes declared by integrations

use axum::routing::{get, post, put};
use axum::Router;

pub mod auth;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod health;
pub mod integrations;
pub mod proxy;
pub mod state;
pub mod streams;
pub mod webhook;

pub use auth::{UserIdentity, USER_HEADER};
pub use error::{ApiError, ApiResult};
pub use state::{client_config, GatewayState};

/// Every gateway route; unmatched requests fall through to declared-route proxying
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health::health_summary))
        .route("/webhooks/changes", post(webhook::receive_changes))
        .route("/events", get(events::event_stream))
        .route("/dashboard", get(dashboard::get_dashboard))
        .route("/integrations", get(integrations::list_integrations))
        .route("/integrations/:name/health", get(health::integration_health))
        .route("/integrations/:name/config-schema", get(integrations::config_schema))
        .route("/streams/:stream_type/subscribers", get(streams::list_subscribers))
        .route(
            "/streams/:stream_type/subscribers/:user_id",
            put(streams::subscribe).delete(streams::unsubscribe),
        )
        .fallback(proxy::proxy_declared_route)
        .with_state(state)
}
