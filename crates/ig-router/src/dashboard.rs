//! Dashboard aggregation
//!
//! Calls every `dashboard_provider` concurrently, each under its own
//! timeout, and merges the fragments by stream type. A provider that fails
//! or is too slow shows up as `null` under its name instead of failing the
//! whole dashboard.

use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ClientError, IntegrationClient};
use ig_common::Capability;
use ig_registry::Dispatcher;
use ig_store::{Cache, CacheStatus};

/// Merged dashboard plus the providers that contributed nothing
#[derive(Debug, Clone, Default)]
pub struct DashboardAggregate {
    pub data: BTreeMap<String, Value>,
    pub failed: Vec<String>,
}

impl DashboardAggregate {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct DashboardAggregator {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn IntegrationClient>,
    cache: Cache,
    call_timeout: Duration,
    cache_ttl: Duration,
}

impl DashboardAggregator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        client: Arc<dyn IntegrationClient>,
        cache: Cache,
        call_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            dispatcher,
            client,
            cache,
            call_timeout,
            cache_ttl,
        }
    }

    pub async fn aggregate(&self, user_id: &str) -> DashboardAggregate {
        let snapshot = match self.dispatcher.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Registry unavailable, returning empty dashboard");
                return DashboardAggregate::default();
            }
        };

        let calls = snapshot.targets(Capability::DashboardProvider).map(|target| async move {
            let result = match tokio::time::timeout(
                self.call_timeout,
                self.client.fetch_dashboard(target, user_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.call_timeout)),
            };
            (target.name.as_str(), result)
        });

        let mut aggregate = DashboardAggregate::default();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(fragment) => aggregate.data.extend(fragment),
                Err(e) => {
                    warn!(integration = %name, user_id, error = %e, "Dashboard provider failed");
                    metrics::counter!("gateway_dashboard_partial_failures_total").increment(1);
                    aggregate.failed.push(name.to_string());
                }
            }
        }
        // Failed providers get a null slot; a healthy one may answer under other keys
        for name in &aggregate.failed {
            aggregate.data.entry(name.clone()).or_insert(Value::Null);
        }

        debug!(user_id, streams = aggregate.data.len(), failed = aggregate.failed.len(), "Dashboard aggregated");
        aggregate
    }

    /// Read-through variant; only complete aggregates are cached
    pub async fn aggregate_cached(&self, user_id: &str) -> (BTreeMap<String, Value>, CacheStatus) {
        let key = cache_resource(user_id);
        if let Some(data) = self.cache.get(&key).await {
            return (data, CacheStatus::Hit);
        }

        let aggregate = self.aggregate(user_id).await;
        if aggregate.is_complete() {
            self.cache.set(&key, &aggregate.data, self.cache_ttl).await;
        }
        (aggregate.data, CacheStatus::Miss)
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(&cache_resource(user_id)).await;
    }
}

fn cache_resource(user_id: &str) -> String {
    format!("dashboard:{user_id}")
}
