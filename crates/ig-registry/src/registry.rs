use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ig_common::{
    service_key, IntegrationDescriptor, RegistrationRecord, Result, SERVICE_KEY_PREFIX,
};
use ig_store::KeyValueStore;

/// A registration together with the moment it stops being live
#[derive(Debug, Clone)]
pub struct Lease {
    pub record: RegistrationRecord,
    pub expires_at: DateTime<Utc>,
}

/// Lease-based registry of integrations.
///
/// Liveness is the store's own key expiry: a descriptor is visible until its
/// lease runs out and invisible afterwards, whether or not it deregistered.
pub struct ServiceRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Register a descriptor, overwriting any previous lease under its name
    pub async fn register(&self, descriptor: IntegrationDescriptor, ttl: Duration) -> Result<Lease> {
        self.register_record(RegistrationRecord::new(descriptor), ttl).await
    }

    /// Write a full record, keeping whatever `registered_at` it carries
    pub async fn register_record(&self, record: RegistrationRecord, ttl: Duration) -> Result<Lease> {
        record.descriptor.validate()?;
        let raw = serde_json::to_string(&record)?;
        self.store
            .set_with_ttl(&service_key(record.name()), &raw, ttl)
            .await?;

        info!(
            integration = %record.name(),
            ttl_secs = ttl.as_secs(),
            capabilities = ?record.descriptor.capabilities,
            "Integration registered"
        );

        Ok(Lease {
            expires_at: expiry(ttl),
            record,
        })
    }

    /// Push the expiry of a live lease forward; false if it already lapsed
    pub async fn renew(&self, name: &str, ttl: Duration) -> Result<bool> {
        let renewed = self.store.expire(&service_key(name), ttl).await?;
        if renewed {
            debug!(integration = %name, "Lease renewed");
        }
        Ok(renewed)
    }

    pub async fn lookup(&self, name: &str) -> Result<Option<IntegrationDescriptor>> {
        Ok(self.lookup_record(name).await?.map(|r| r.descriptor))
    }

    pub async fn lookup_record(&self, name: &str) -> Result<Option<RegistrationRecord>> {
        let key = service_key(name);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        Ok(parse_record(&key, &raw))
    }

    pub async fn deregister(&self, name: &str) -> Result<bool> {
        let removed = self.store.delete(&service_key(name)).await?;
        info!(integration = %name, removed, "Integration deregistered");
        Ok(removed)
    }

    /// Every live registration, earliest registered first
    pub async fn live_records(&self) -> Result<Vec<RegistrationRecord>> {
        let keys = self.store.scan_prefix(SERVICE_KEY_PREFIX).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // The lease may lapse between the scan and the read
            if let Some(raw) = self.store.get(&key).await? {
                if let Some(record) = parse_record(&key, &raw) {
                    records.push(record);
                }
            }
        }
        records.sort_by(registration_order);
        Ok(records)
    }
}

fn parse_record(key: &str, raw: &str) -> Option<RegistrationRecord> {
    match serde_json::from_str::<RegistrationRecord>(raw) {
        Ok(record) if format!("{SERVICE_KEY_PREFIX}{}", record.name()) == key => Some(record),
        Ok(record) => {
            warn!(key = %key, name = %record.name(), "Registration name does not match its key, ignoring");
            None
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Unreadable registration record, ignoring");
            None
        }
    }
}

/// Timestamped records first, oldest first; ties and untimestamped by name
pub(crate) fn registration_order(a: &RegistrationRecord, b: &RegistrationRecord) -> Ordering {
    match (a.registered_at, b.registered_at) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name().cmp(b.name())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name().cmp(b.name()),
    }
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ig_common::{Capability, GatewayError};
    use ig_store::MemoryStore;

    fn finance() -> IntegrationDescriptor {
        IntegrationDescriptor::new("finance", "http://finance:8081")
            .with_capability(Capability::ChangeHandler)
            .with_table("trades")
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_follows_lease() {
        let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()));
        let ttl = Duration::from_secs(30);

        let lease = registry.register(finance(), ttl).await.unwrap();
        assert!(lease.expires_at > Utc::now());
        assert_eq!(registry.lookup("finance").await.unwrap(), Some(finance()));

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert!(registry.lookup("finance").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(registry.lookup("finance").await.unwrap().is_none());
        assert!(registry.live_records().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_extends_and_reports_lapse() {
        let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()));
        let ttl = Duration::from_secs(30);
        registry.register(finance(), ttl).await.unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(20)).await;
            assert!(registry.renew("finance", ttl).await.unwrap());
        }
        assert!(registry.lookup("finance").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!registry.renew("finance", ttl).await.unwrap());
        assert!(registry.lookup("finance").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deregister_is_immediate() {
        let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()));
        registry.register(finance(), Duration::from_secs(30)).await.unwrap();

        assert!(registry.deregister("finance").await.unwrap());
        assert!(registry.lookup("finance").await.unwrap().is_none());
        assert!(!registry.deregister("finance").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_descriptor() {
        let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()));
        let err = registry
            .register(IntegrationDescriptor::new("bad name", ""), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        let err = registry
            .register(IntegrationDescriptor::new("rss", "http://a b"), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert!(registry.lookup("rss").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_and_mismatched_records_are_absent() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_with_ttl("service:broken", "{not json", Duration::from_secs(30))
            .await
            .unwrap();
        store
            .set_with_ttl("service:alias", r#"{"name":"finance"}"#, Duration::from_secs(30))
            .await
            .unwrap();

        let registry = ServiceRegistry::new(store);
        assert!(registry.lookup("broken").await.unwrap().is_none());
        assert!(registry.lookup("alias").await.unwrap().is_none());
        assert!(registry.live_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_records_in_registration_order() {
        let store = Arc::new(MemoryStore::new());
        let registry = ServiceRegistry::new(store.clone());
        let ttl = Duration::from_secs(30);

        let mut later = RegistrationRecord::new(IntegrationDescriptor::new("alpha", ""));
        let mut earlier = RegistrationRecord::new(IntegrationDescriptor::new("zulu", ""));
        earlier.registered_at = Some(Utc::now() - chrono::Duration::seconds(60));
        later.registered_at = Some(Utc::now());
        registry.register_record(later, ttl).await.unwrap();
        registry.register_record(earlier, ttl).await.unwrap();
        store
            .set_with_ttl("service:legacy", r#"{"name":"legacy"}"#, ttl)
            .await
            .unwrap();

        let names: Vec<_> = registry
            .live_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["zulu", "alpha", "legacy"]);
    }
}
