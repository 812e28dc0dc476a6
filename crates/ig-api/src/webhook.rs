//! Change-capture webhook
//!
//! Accepts either `{"data": [record, ...]}` or a bare record. Elements that
//! do not parse are counted as received and dropped; the rest go through the
//! change router in one batch.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::verify_bearer;
use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;
use ig_common::ChangeRecord;
use ig_router::RouteReport;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: RouteReport,
}

pub async fn receive_changes(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    verify_bearer(&headers, state.webhook_secret.as_deref())?;

    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::validation(format!("Invalid JSON: {e}")))?;
    let (records, malformed) = parse_batch(payload)?;

    let mut report = state.router.route_batch(records).await;
    report.received += malformed;
    report.dropped += malformed;

    info!(
        received = report.received,
        processed = report.processed,
        delivered = report.delivered,
        dropped = report.dropped,
        "Change batch routed"
    );
    Ok(Json(WebhookResponse { status: "ok", report }))
}

/// Split a webhook payload into parsed records and a count of unparsable ones
fn parse_batch(payload: Value) -> ApiResult<(Vec<ChangeRecord>, usize)> {
    let elements = match payload {
        Value::Object(mut map) if map.contains_key("data") => match map.remove("data") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => return Err(ApiError::validation("'data' must be a non-empty array of change records")),
        },
        record @ Value::Object(_) => return parse_single(record).map(|record| (vec![record], 0)),
        _ => return Err(ApiError::validation("Expected a change record or {\"data\": [...]}")),
    };

    let mut records = Vec::with_capacity(elements.len());
    let mut malformed = 0;
    for element in elements {
        match serde_json::from_value::<ChangeRecord>(element) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(error = %e, "Dropping unparsable change record");
                malformed += 1;
            }
        }
    }
    Ok((records, malformed))
}

/// A bare record must be a well-formed change with a table name
fn parse_single(value: Value) -> ApiResult<ChangeRecord> {
    let record: ChangeRecord = serde_json::from_value(value)
        .map_err(|e| ApiError::validation(format!("Invalid change record: {e}")))?;
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(table: &str) -> Value {
        json!({
            "action": "insert",
            "record": {"id": 1},
            "metadata": {"table_name": table}
        })
    }

    #[test]
    fn test_parse_envelope() {
        let (records, malformed) = parse_batch(json!({"data": [record("a"), record("b")]})).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(malformed, 0);
        assert_eq!(records[1].table(), "b");
    }

    #[test]
    fn test_parse_single_record() {
        let (records, malformed) = parse_batch(record("a")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(malformed, 0);
    }

    #[test]
    fn test_malformed_elements_are_counted() {
        let (records, malformed) =
            parse_batch(json!({"data": [record("a"), {"action": "explode"}, 42]})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(malformed, 2);
    }

    #[test]
    fn test_rejects_non_batch_payloads() {
        assert!(parse_batch(json!({"data": "nope"})).is_err());
        assert!(parse_batch(json!({"data": []})).is_err());
        assert!(parse_batch(json!([record("a")])).is_err());
    }

    #[test]
    fn test_rejects_objects_that_are_not_records() {
        assert!(parse_batch(json!({})).is_err());
        assert!(parse_batch(json!({"foo": 1})).is_err());
        assert!(parse_batch(record("")).is_err());
    }
}
