//! Shared store for the integration gateway
//!
//! Everything the gateway shares between processes lives in one key-value
//! store with native per-key expiry and native sets:
//! - **KeyValueStore**: the backend seam (Redis in production, in-memory for
//!   single-node runs and tests)
//! - **Cache**: TTL read-through cache under `cache:<resource_type>`
//! - **SubscriptionSets**: per-stream-type subscriber sets
//!
//! Every operation maps to one atomic store command. Nothing here spans
//! multiple keys.

pub mod cache;
pub mod memory;
pub mod redis_store;
pub mod subscriptions;

pub use cache::{Cache, CacheStatus};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use subscriptions::SubscriptionSets;

use async_trait::async_trait;
use ig_common::GatewayError;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Key {key} holds a value of another type")]
    WrongType { key: String },

    #[error("Invalid argument: {0}")]
    Invalid(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(message) => GatewayError::validation(message),
            other => GatewayError::transient(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value of a live key, or None if missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that the store expires on its own after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Reset the expiry of a live key; false if the key is gone
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys currently live under `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Add to a set; false if already a member
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove from a set; false if not a member
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<HashSet<String>>;

    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
