//! Fallback proxy for routes integrations declare in their registration
//!
//! Anything the gateway does not serve itself is matched against the
//! `routes` of live integrations and forwarded verbatim. Only a small set of
//! headers crosses in either direction.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::auth::{UserIdentity, USER_HEADER};
use crate::error::ApiError;
use crate::state::GatewayState;
use ig_router::{ForwardRequest, UpstreamResponse};

const FORWARDED_REQUEST_HEADERS: &[&str] = &["content-type", "authorization", "cookie"];
const RETURNED_RESPONSE_HEADERS: &[&str] = &["content-type", "set-cookie", "location"];

pub async fn proxy_declared_route(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match forward(&state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(
    state: &GatewayState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let snapshot = state.dispatcher.snapshot().await?;
    let Some(matched) = snapshot.match_route(method.as_str(), uri.path()) else {
        return Err(ApiError::not_found(format!("No route for {} {}", method, uri.path())));
    };

    let mut forwarded: Vec<(String, String)> = FORWARDED_REQUEST_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    if matched.route.auth_required {
        let UserIdentity(user_id) = UserIdentity::from_headers(&headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        forwarded.push((USER_HEADER.to_string(), user_id));
    }

    let target = matched.descriptor;
    let request = ForwardRequest {
        method,
        path_and_query: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: forwarded,
        body,
    };

    debug!(integration = %target.name, path = %request.path_and_query, "Proxying declared route");
    match state.client.forward(target, request).await {
        Ok(response) => Ok(upstream_response(response, RETURNED_RESPONSE_HEADERS)),
        Err(e) => {
            warn!(integration = %target.name, error = %e, "Proxied route failed");
            Err(ApiError::BadGateway(format!("Integration {} is unavailable", target.name)))
        }
    }
}

/// Rebuild an integration response, keeping only the `allowed` headers
pub(crate) fn upstream_response(upstream: UpstreamResponse, allowed: &[&str]) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, upstream.body).into_response();

    let headers = response.headers_mut();
    headers.remove(axum::http::header::CONTENT_TYPE);
    for (name, value) in &upstream.headers {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    response
}
