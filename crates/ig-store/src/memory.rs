use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::{KeyValueStore, Result, StoreError};

enum Entry {
    Value {
        data: String,
        expires_at: Instant,
    },
    Set(HashSet<String>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Entry::Value { expires_at, .. } if *expires_at <= now)
    }
}

/// In-process store with per-key expiry checked on access.
///
/// Expired keys are never returned; they are removed lazily the next time
/// they are touched, the same way Redis treats passive expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry::Value { data, .. }) => Ok(Some(data.clone())),
            Some(Entry::Set(_)) => Err(StoreError::WrongType { key: key.to_string() }),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry::Value {
                data: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_if_expired(key);
        match self.entries.get_mut(key).as_deref_mut() {
            Some(Entry::Value { expires_at, .. }) => {
                *expires_at = Instant::now() + ttl;
                Ok(true)
            }
            Some(Entry::Set(_)) => Err(StoreError::WrongType { key: key.to_string() }),
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        match entry.value_mut() {
            Entry::Set(members) => Ok(members.insert(member.to_string())),
            Entry::Value { .. } => Err(StoreError::WrongType { key: key.to_string() }),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let removed = match self.entries.get_mut(key).as_deref_mut() {
            Some(Entry::Set(members)) => members.remove(member),
            Some(Entry::Value { .. }) => {
                return Err(StoreError::WrongType { key: key.to_string() })
            }
            None => false,
        };
        // Redis drops a set once its last member is gone
        self.entries
            .remove_if(key, |_, entry| matches!(entry, Entry::Set(m) if m.is_empty()));
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        match self.entries.get(key).as_deref() {
            Some(Entry::Set(members)) => Ok(members.clone()),
            Some(Entry::Value { .. }) => Err(StoreError::WrongType { key: key.to_string() }),
            None => Ok(HashSet::new()),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
