//! Health probes against integrations
//!
//! A single check passes the integration's own answer through untouched.
//! Transport failures of any kind collapse into `down`; a missing URL or a
//! missing `health_checker` tag is `unknown`.

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{IntegrationClient, UpstreamResponse, HEALTH_PATH};
use ig_common::{Capability, HealthState};
use ig_registry::Dispatcher;
use ig_store::KeyValueStore;

pub const NOT_CONFIGURED: &str = "Internal URL not configured";
pub const NOT_ADVERTISED: &str = "Health checks not advertised";

#[derive(Debug, Clone)]
pub enum HealthOutcome {
    /// The integration answered; status and body are returned as-is
    Upstream(UpstreamResponse),
    Down { error: String },
    Unknown { reason: String },
}

impl HealthOutcome {
    pub fn state(&self) -> HealthState {
        match self {
            HealthOutcome::Upstream(response) if response.is_success() => HealthState::Healthy,
            HealthOutcome::Upstream(_) | HealthOutcome::Down { .. } => HealthState::Down,
            HealthOutcome::Unknown { .. } => HealthState::Unknown,
        }
    }
}

/// Gateway-wide health view
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthState,
    pub store: HealthState,
    pub services: BTreeMap<String, HealthState>,
}

pub struct HealthAggregator {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn IntegrationClient>,
    check_timeout: Duration,
    summary_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        client: Arc<dyn IntegrationClient>,
        check_timeout: Duration,
        summary_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            client,
            check_timeout,
            summary_timeout,
        }
    }

    pub async fn check(&self, name: &str) -> HealthOutcome {
        let descriptor = match self.dispatcher.registry().lookup(name).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(integration = %name, error = %e, "Registry lookup failed during health check");
                return HealthOutcome::Down { error: e.to_string() };
            }
        };

        let Some(base) = descriptor.as_ref().and_then(|d| d.internal_base()) else {
            return HealthOutcome::Unknown {
                reason: NOT_CONFIGURED.to_string(),
            };
        };
        if descriptor.as_ref().is_some_and(|d| !d.has_capability(Capability::HealthChecker)) {
            return HealthOutcome::Unknown {
                reason: NOT_ADVERTISED.to_string(),
            };
        }

        self.probe(name, &health_url(base), self.check_timeout).await
    }

    /// Store reachability plus every health-checking integration, probed concurrently
    pub async fn summary(&self) -> HealthSummary {
        let backend = self.dispatcher.registry().store();
        let store = match backend.ping().await {
            Ok(()) => HealthState::Healthy,
            Err(e) => {
                warn!(backend = backend.backend_name(), error = %e, "Store ping failed");
                HealthState::Down
            }
        };

        let mut services = BTreeMap::new();
        match self.dispatcher.snapshot().await {
            Ok(snapshot) => {
                let probes = snapshot.targets(Capability::HealthChecker).map(|d| async move {
                    let state = match d.internal_base() {
                        Some(base) => self
                            .probe(&d.name, &health_url(base), self.summary_timeout)
                            .await
                            .state(),
                        None => HealthState::Unknown,
                    };
                    (d.name.clone(), state)
                });
                services.extend(join_all(probes).await);
            }
            Err(e) => warn!(error = %e, "Registry unavailable during health summary"),
        }

        let healthy = store == HealthState::Healthy && services.values().all(|s| *s == HealthState::Healthy);
        HealthSummary {
            status: if healthy { HealthState::Healthy } else { HealthState::Degraded },
            store,
            services,
        }
    }

    async fn probe(&self, name: &str, url: &str, timeout: Duration) -> HealthOutcome {
        match self.client.probe_health(url, timeout).await {
            Ok(response) => {
                debug!(integration = %name, status = response.status, "Health probe answered");
                HealthOutcome::Upstream(response)
            }
            Err(e) => {
                debug!(integration = %name, error = %e, "Health probe failed");
                HealthOutcome::Down { error: e.to_string() }
            }
        }
    }
}

/// Base URL with the health suffix appended exactly once
pub fn health_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(HEALTH_PATH) {
        base.to_string()
    } else {
        format!("{base}{HEALTH_PATH}")
    }
}

/// Body for synthesized (non-upstream) outcomes: `{"status":..,"error":..}`
pub fn synthesized_body(outcome: &HealthOutcome) -> Option<Bytes> {
    #[derive(Serialize)]
    struct Body<'a> {
        status: HealthState,
        error: &'a str,
    }

    let body = match outcome {
        HealthOutcome::Upstream(_) => return None,
        HealthOutcome::Down { error } => Body {
            status: HealthState::Down,
            error,
        },
        HealthOutcome::Unknown { reason } => Body {
            status: HealthState::Unknown,
            error: reason,
        },
    };
    serde_json::to_vec(&body).ok().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_normalization() {
        assert_eq!(health_url("http://rss:8083"), "http://rss:8083/internal/health");
        assert_eq!(health_url("http://rss:8083/"), "http://rss:8083/internal/health");
        assert_eq!(
            health_url("http://rss:8083/internal/health/"),
            "http://rss:8083/internal/health"
        );
    }

    #[test]
    fn test_synthesized_bodies() {
        let down = synthesized_body(&HealthOutcome::Down { error: "refused".into() }).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&down).unwrap();
        assert_eq!(value, serde_json::json!({"status": "down", "error": "refused"}));

        let unknown = synthesized_body(&HealthOutcome::Unknown { reason: NOT_CONFIGURED.into() }).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&unknown).unwrap();
        assert_eq!(value["status"], "unknown");
    }

    #[test]
    fn test_states() {
        let ok = HealthOutcome::Upstream(UpstreamResponse {
            status: 200,
            headers: vec![],
            body: Bytes::new(),
        });
        let failing = HealthOutcome::Upstream(UpstreamResponse {
            status: 500,
            headers: vec![],
            body: Bytes::new(),
        });
        assert_eq!(ok.state(), HealthState::Healthy);
        assert_eq!(failing.state(), HealthState::Down);
        assert_eq!(HealthOutcome::Unknown { reason: String::new() }.state(), HealthState::Unknown);
    }
}
