//! HTTP client for integration-internal endpoints
//!
//! Every call the gateway makes into an integration goes through
//! [`IntegrationClient`]. Callers are responsible for capability gating;
//! this layer only speaks HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use ig_common::{ChangeRecord, GatewayError, IntegrationDescriptor};

pub const INGEST_PATH: &str = "/internal/cdc";
pub const DASHBOARD_PATH: &str = "/internal/dashboard";
pub const HEALTH_PATH: &str = "/internal/health";
pub const LIFECYCLE_PATH: &str = "/internal/stream-lifecycle";
pub const CONFIG_SCHEMA_PATH: &str = "/internal/config-schema";

/// Headers copied from an integration response back to the caller
const PASSTHROUGH_RESPONSE_HEADERS: [&str; 3] = ["content-type", "set-cookie", "location"];

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub ingest_timeout: Duration,
    pub dashboard_timeout: Duration,
    pub lifecycle_timeout: Duration,
    pub proxy_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            ingest_timeout: Duration::from_secs(10),
            dashboard_timeout: Duration::from_secs(2),
            lifecycle_timeout: Duration::from_secs(10),
            proxy_timeout: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("integration {0} has no internal URL")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        GatewayError::transient(err.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    records: &'a [ChangeRecord],
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    /// None means "no custom list, use the stream's subscribers"
    #[serde(default)]
    users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    Created,
    Updated,
    Deleted,
}

/// Body posted to an integration's stream lifecycle hook
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub event: LifecycleEventKind,
    pub user: String,
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A request forwarded verbatim to an integration route
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: reqwest::Method,
    /// Path plus optional `?query`
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Status, selected headers and body of an integration response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait IntegrationClient: Send + Sync {
    /// Hand change records to their owner; returns its custom recipient list, if any
    async fn ingest_changes(
        &self,
        target: &IntegrationDescriptor,
        records: &[ChangeRecord],
    ) -> ClientResult<Option<Vec<String>>>;

    /// Dashboard fragment keyed by stream type
    async fn fetch_dashboard(
        &self,
        target: &IntegrationDescriptor,
        user_id: &str,
    ) -> ClientResult<serde_json::Map<String, serde_json::Value>>;

    async fn probe_health(&self, url: &str, timeout: Duration) -> ClientResult<UpstreamResponse>;

    async fn notify_lifecycle(
        &self,
        target: &IntegrationDescriptor,
        event: &LifecycleEvent,
    ) -> ClientResult<()>;

    async fn fetch_config_schema(&self, target: &IntegrationDescriptor) -> ClientResult<serde_json::Value>;

    async fn forward(
        &self,
        target: &IntegrationDescriptor,
        request: ForwardRequest,
    ) -> ClientResult<UpstreamResponse>;
}

/// reqwest-backed [`IntegrationClient`]
pub struct HttpIntegrationClient {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl HttpIntegrationClient {
    pub fn new(config: HttpClientConfig) -> ClientResult<Self> {
        // No client-wide timeout: each call sets its own
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { config, client })
    }

    fn url(target: &IntegrationDescriptor, path: &str) -> ClientResult<String> {
        target
            .internal_base()
            .map(|base| format!("{base}{path}"))
            .ok_or_else(|| ClientError::NotConfigured(target.name.clone()))
    }
}

/// Error for non-2xx responses, keeping a bounded slice of the body
async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

const MAX_ERROR_BODY: usize = 512;

/// Cut `body` to at most `max` bytes without splitting a character
fn truncate_at_char_boundary(body: &mut String, max: usize) {
    if body.len() <= max {
        return;
    }
    let cut = (0..=max).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
    body.truncate(cut);
}

async fn into_upstream(response: reqwest::Response) -> ClientResult<UpstreamResponse> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| PASSTHROUGH_RESPONSE_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response.bytes().await?;
    Ok(UpstreamResponse { status, headers, body })
}

#[async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn ingest_changes(
        &self,
        target: &IntegrationDescriptor,
        records: &[ChangeRecord],
    ) -> ClientResult<Option<Vec<String>>> {
        let url = Self::url(target, INGEST_PATH)?;
        debug!(integration = %target.name, records = records.len(), "Forwarding change records");

        let response = self
            .client
            .post(&url)
            .timeout(self.config.ingest_timeout)
            .json(&IngestRequest { records })
            .send()
            .await?;
        let response = check_status(response).await?;

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let parsed: IngestResponse =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(parsed.users)
    }

    async fn fetch_dashboard(
        &self,
        target: &IntegrationDescriptor,
        user_id: &str,
    ) -> ClientResult<serde_json::Map<String, serde_json::Value>> {
        let url = Self::url(target, DASHBOARD_PATH)?;
        let response = self
            .client
            .get(&url)
            .query(&[("user", user_id)])
            .timeout(self.config.dashboard_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;

        match response.json::<serde_json::Value>().await? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(ClientError::Decode(format!(
                "dashboard response is not an object: {other}"
            ))),
        }
    }

    async fn probe_health(&self, url: &str, timeout: Duration) -> ClientResult<UpstreamResponse> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        into_upstream(response).await
    }

    async fn notify_lifecycle(
        &self,
        target: &IntegrationDescriptor,
        event: &LifecycleEvent,
    ) -> ClientResult<()> {
        let url = Self::url(target, LIFECYCLE_PATH)?;
        let response = self
            .client
            .post(&url)
            .timeout(self.config.lifecycle_timeout)
            .json(event)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_config_schema(&self, target: &IntegrationDescriptor) -> ClientResult<serde_json::Value> {
        let url = Self::url(target, CONFIG_SCHEMA_PATH)?;
        let response = self
            .client
            .get(&url)
            .timeout(self.config.lifecycle_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn forward(
        &self,
        target: &IntegrationDescriptor,
        request: ForwardRequest,
    ) -> ClientResult<UpstreamResponse> {
        let url = Self::url(target, &request.path_and_query)?;
        let mut builder = self
            .client
            .request(request.method, &url)
            .timeout(self.config.proxy_timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        into_upstream(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ig_common::Capability;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpIntegrationClient {
        HttpIntegrationClient::new(HttpClientConfig::default()).unwrap()
    }

    fn change() -> ChangeRecord {
        serde_json::from_value(json!({
            "action": "insert",
            "record": {"id": 1},
            "metadata": {"table_schema": "public", "table_name": "trades"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_returns_custom_recipients() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/cdc"))
            .and(body_json(json!({"records": [change()]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": ["u1", "u2"]})))
            .expect(1)
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("finance", server.uri())
            .with_capability(Capability::ChangeHandler);
        let users = client().ingest_changes(&target, &[change()]).await.unwrap();
        assert_eq!(users, Some(vec!["u1".to_string(), "u2".to_string()]));
    }

    #[tokio::test]
    async fn test_ingest_without_users_means_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/cdc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("finance", server.uri());
        assert_eq!(client().ingest_changes(&target, &[change()]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ingest_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/cdc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("finance", server.uri());
        let err = client().ingest_changes(&target, &[change()]).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_error_body_truncated_on_char_boundary() {
        let body = format!("{}é tail", "x".repeat(511));
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/cdc"))
            .respond_with(ResponseTemplate::new(500).set_body_string(body))
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("sports", server.uri());
        match client().ingest_changes(&target, &[change()]).await.unwrap_err() {
            ClientError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "x".repeat(511));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncate_at_char_boundary() {
        let mut short = "héllo".to_string();
        truncate_at_char_boundary(&mut short, 512);
        assert_eq!(short, "héllo");

        let mut cut = "aé".to_string();
        truncate_at_char_boundary(&mut cut, 2);
        assert_eq!(cut, "a");
    }

    #[tokio::test]
    async fn test_missing_internal_url() {
        let target = IntegrationDescriptor::new("finance", "");
        let err = client().ingest_changes(&target, &[change()]).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_dashboard_passes_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/dashboard"))
            .and(query_param("user", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"finance": {"quotes": []}})))
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("finance", format!("{}/", server.uri()));
        let data = client().fetch_dashboard(&target, "u1").await.unwrap();
        assert_eq!(data.get("finance"), Some(&json!({"quotes": []})));
    }

    #[tokio::test]
    async fn test_lifecycle_event_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/stream-lifecycle"))
            .and(body_json(json!({"event": "created", "user": "u1", "config": {}, "enabled": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("rss", server.uri());
        let event = LifecycleEvent {
            event: LifecycleEventKind::Created,
            user: "u1".into(),
            config: json!({}),
            old_config: None,
            enabled: Some(true),
        };
        client().notify_lifecycle(&target, &event).await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_keeps_selected_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss/feeds"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("set-cookie", "session=abc")
                    .insert_header("x-internal", "hidden")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let target = IntegrationDescriptor::new("rss", server.uri());
        let response = client()
            .forward(
                &target,
                ForwardRequest {
                    method: reqwest::Method::GET,
                    path_and_query: "/rss/feeds?page=2".into(),
                    headers: vec![],
                    body: Bytes::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.header("Set-Cookie"), Some("session=abc"));
        assert!(response.header("x-internal").is_none());
        assert_eq!(response.body, Bytes::from_static(b"created"));
    }
}
