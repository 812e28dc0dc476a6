use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::proxy::upstream_response;
use crate::state::GatewayState;
use ig_common::HealthState;
use ig_router::health::synthesized_body;
use ig_router::HealthOutcome;

/// Gateway-wide summary. Only an unreachable store makes this a 503;
/// failing integrations show up as `degraded`.
pub async fn health_summary(State(state): State<GatewayState>) -> Response {
    let summary = state.health.summary().await;
    let status = if summary.store == HealthState::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(summary)).into_response()
}

/// Single integration: its own answer verbatim, or a synthesized 503
pub async fn integration_health(State(state): State<GatewayState>, Path(name): Path<String>) -> Response {
    let outcome = state.health.check(&name).await;
    match outcome {
        HealthOutcome::Upstream(response) => upstream_response(response, &["content-type"]),
        other => {
            let body = synthesized_body(&other).unwrap_or_default();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
    }
}
