//! Lease keeper - integration-side registration loop
//!
//! Registers the descriptor, then renews it on a fixed tick shorter than the
//! lease TTL. Store failures are logged and retried on the next tick; if the
//! store stays down long enough the lease simply lapses. A lapsed lease is
//! re-registered with its original `registered_at`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ServiceRegistry;
use ig_common::{GatewayError, IntegrationDescriptor, RegistrationRecord, Result};

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub ttl: Duration,
    /// Must be strictly shorter than `ttl`
    pub renew_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            renew_interval: Duration::from_secs(20),
        }
    }
}

pub struct LeaseKeeper {
    name: String,
    registry: Arc<ServiceRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Spawn the renewal loop. The first registration happens on the first tick.
    pub fn start(
        registry: Arc<ServiceRegistry>,
        descriptor: IntegrationDescriptor,
        config: LeaseConfig,
    ) -> Result<Self> {
        descriptor.validate()?;
        if config.renew_interval.is_zero() || config.renew_interval >= config.ttl {
            return Err(GatewayError::configuration(format!(
                "renew interval {:?} must be shorter than lease ttl {:?}",
                config.renew_interval, config.ttl
            )));
        }

        let name = descriptor.name.clone();
        let record = RegistrationRecord::new(descriptor);
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let task_registry = registry.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.renew_interval);
            let mut registered = false;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registered = tick(&task_registry, &record, config.ttl, registered).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!(integration = %record.name(), "Lease keeper shutting down");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            name,
            registry,
            shutdown_tx,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop renewing and delete the lease
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            error!(integration = %self.name, error = %e, "Lease keeper task failed");
        }
        if let Err(e) = self.registry.deregister(&self.name).await {
            warn!(integration = %self.name, error = %e, "Deregistration failed, lease will expire on its own");
        }
    }
}

/// One renewal step; returns whether the lease is believed to be held
async fn tick(
    registry: &ServiceRegistry,
    record: &RegistrationRecord,
    ttl: Duration,
    registered: bool,
) -> bool {
    if registered {
        match registry.renew(record.name(), ttl).await {
            Ok(true) => return true,
            Ok(false) => {
                warn!(integration = %record.name(), "Lease lapsed, registering again");
            }
            Err(e) => {
                warn!(integration = %record.name(), error = %e, "Lease renewal failed, retrying next tick");
                return true;
            }
        }
    }

    match registry.register_record(record.clone(), ttl).await {
        Ok(lease) => {
            debug!(integration = %record.name(), expires_at = %lease.expires_at, "Lease acquired");
            true
        }
        Err(e) => {
            warn!(integration = %record.name(), error = %e, "Registration failed, retrying next tick");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ig_store::{KeyValueStore, MemoryStore};

    fn config() -> LeaseConfig {
        LeaseConfig {
            ttl: Duration::from_secs(30),
            renew_interval: Duration::from_secs(20),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_lease_alive_then_deregisters() {
        let registry = Arc::new(ServiceRegistry::new(Arc::new(MemoryStore::new())));
        let keeper = LeaseKeeper::start(
            registry.clone(),
            IntegrationDescriptor::new("rss", "http://rss:8083"),
            config(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(registry.lookup("rss").await.unwrap().is_some());

        // well past a single ttl
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(registry.lookup("rss").await.unwrap().is_some());

        keeper.shutdown().await;
        assert!(registry.lookup("rss").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_lease_is_restored_with_original_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ServiceRegistry::new(store.clone()));
        let keeper = LeaseKeeper::start(
            registry.clone(),
            IntegrationDescriptor::new("rss", "http://rss:8083"),
            config(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = registry.lookup_record("rss").await.unwrap().unwrap();

        store.delete("service:rss").await.unwrap();
        assert!(registry.lookup("rss").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(20)).await;
        let restored = registry.lookup_record("rss").await.unwrap().unwrap();
        assert_eq!(restored.registered_at, first.registered_at);

        keeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_renew_interval_not_shorter_than_ttl() {
        let registry = Arc::new(ServiceRegistry::new(Arc::new(MemoryStore::new())));
        let result = LeaseKeeper::start(
            registry,
            IntegrationDescriptor::new("rss", ""),
            LeaseConfig {
                ttl: Duration::from_secs(20),
                renew_interval: Duration::from_secs(20),
            },
        );
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }
}
