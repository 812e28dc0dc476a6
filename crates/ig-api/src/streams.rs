//! Stream subscriptions
//!
//! Membership lives in the shared store. Every change invalidates the
//! user's cached dashboard and, where advertised, fires the owning
//! integration's lifecycle hook. Hook failures never fail the request.

use axum::extract::{Path, State};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;
use ig_router::{LifecycleEvent, LifecycleEventKind};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub old_config: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub stream_type: String,
    pub user_id: String,
    pub subscribed: bool,
    /// Whether membership actually changed
    pub changed: bool,
    pub hook_delivered: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberList {
    pub stream_type: String,
    pub subscribers: Vec<String>,
}

pub async fn subscribe(
    State(state): State<GatewayState>,
    Path((stream_type, user_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<SubscriptionResponse>> {
    let request = parse_request(&body)?;
    let added = state.subscriptions.add(&stream_type, &user_id).await?;
    state.dashboard.invalidate(&user_id).await;

    let event = LifecycleEvent {
        event: if added {
            LifecycleEventKind::Created
        } else {
            LifecycleEventKind::Updated
        },
        user: user_id.clone(),
        config: request.config.unwrap_or_else(empty_config),
        old_config: request.old_config,
        enabled: Some(true),
    };
    let hook_delivered = state.hooks.notify_lifecycle(&stream_type, &event).await;

    info!(stream_type = %stream_type, user_id = %user_id, added, "Subscription stored");
    Ok(Json(SubscriptionResponse {
        stream_type,
        user_id,
        subscribed: true,
        changed: added,
        hook_delivered,
    }))
}

pub async fn unsubscribe(
    State(state): State<GatewayState>,
    Path((stream_type, user_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<SubscriptionResponse>> {
    let request = parse_request(&body)?;
    let removed = state.subscriptions.remove(&stream_type, &user_id).await?;
    state.dashboard.invalidate(&user_id).await;

    let hook_delivered = if removed {
        let event = LifecycleEvent {
            event: LifecycleEventKind::Deleted,
            user: user_id.clone(),
            config: request.config.unwrap_or_else(empty_config),
            old_config: request.old_config,
            enabled: Some(false),
        };
        state.hooks.notify_lifecycle(&stream_type, &event).await
    } else {
        false
    };

    info!(stream_type = %stream_type, user_id = %user_id, removed, "Subscription removed");
    Ok(Json(SubscriptionResponse {
        stream_type,
        user_id,
        subscribed: false,
        changed: removed,
        hook_delivered,
    }))
}

pub async fn list_subscribers(
    State(state): State<GatewayState>,
    Path(stream_type): Path<String>,
) -> ApiResult<Json<SubscriberList>> {
    let members = state.subscriptions.members(&stream_type).await?;
    Ok(Json(SubscriberList {
        stream_type,
        subscribers: members.into_iter().collect(),
    }))
}

fn parse_request(body: &Bytes) -> ApiResult<SubscriptionRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SubscriptionRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("Invalid subscription body: {e}")))
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}
