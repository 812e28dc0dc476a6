//! API error responses
//!
//! Handlers never leak internal failures; everything becomes one of these
//! with a JSON `{error, message}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ig_common::GatewayError;
use ig_router::HookError;
use ig_registry::DispatchRefusal;
use ig_store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized(String),
    NotFound(String),
    BadGateway(String),
    Unavailable(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation", m),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, "bad_gateway", m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation { message } => ApiError::Validation(message),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        GatewayError::from(err).into()
    }
}

impl From<HookError> for ApiError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Refused(refusal) => refusal.into(),
            HookError::Upstream(e) => ApiError::BadGateway(e.to_string()),
            HookError::Registry(e) => e.into(),
        }
    }
}

impl From<DispatchRefusal> for ApiError {
    fn from(refusal: DispatchRefusal) -> Self {
        ApiError::NotFound(refusal.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
