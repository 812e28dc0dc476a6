//! Caller identity and webhook authentication
//!
//! User identity is established upstream of the gateway and arrives in the
//! `X-User-Sub` header. The change webhook is authenticated with a shared
//! bearer secret, compared in constant time.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-user-sub";

/// Authenticated user id taken from [`USER_HEADER`]
#[derive(Debug, Clone)]
pub struct UserIdentity(pub String);

impl UserIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers).ok_or_else(|| ApiError::unauthorized("Missing user identity"))
    }
}

/// Check `Authorization: Bearer <secret>`; no configured secret means open
pub fn verify_bearer(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = secret else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");

    if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        warn!("Webhook request rejected: bad or missing bearer secret");
        Err(ApiError::unauthorized("Invalid webhook secret"))
    }
}
