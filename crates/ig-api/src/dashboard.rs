use axum::extract::State;
use axum::http::HeaderName;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::auth::UserIdentity;
use crate::state::GatewayState;

pub const CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub user_id: String,
    pub data: BTreeMap<String, Value>,
}

/// Merged dashboard for the calling user; `X-Cache` tells HIT from MISS
pub async fn get_dashboard(State(state): State<GatewayState>, UserIdentity(user_id): UserIdentity) -> Response {
    let (data, status) = state.dashboard.aggregate_cached(&user_id).await;
    (
        [(CACHE_HEADER, status.as_str())],
        Json(DashboardResponse { user_id, data }),
    )
        .into_response()
}
