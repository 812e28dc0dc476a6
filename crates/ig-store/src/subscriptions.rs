use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::{KeyValueStore, Result, StoreError};
use ig_common::subscribers_key;

/// Per-stream-type subscriber sets.
///
/// Each call is a single native set command, so concurrent add/remove on the
/// same stream type is safe. Moving a user between two stream types is two
/// independent calls.
#[derive(Clone)]
pub struct SubscriptionSets {
    store: Arc<dyn KeyValueStore>,
}

impl SubscriptionSets {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns true if the user was not already subscribed
    pub async fn add(&self, stream_type: &str, user_id: &str) -> Result<bool> {
        check(stream_type, user_id)?;
        let added = self.store.set_add(&subscribers_key(stream_type), user_id).await?;
        debug!(stream_type, user_id, added, "Subscriber added");
        Ok(added)
    }

    pub async fn remove(&self, stream_type: &str, user_id: &str) -> Result<bool> {
        check(stream_type, user_id)?;
        let removed = self
            .store
            .set_remove(&subscribers_key(stream_type), user_id)
            .await?;
        debug!(stream_type, user_id, removed, "Subscriber removed");
        Ok(removed)
    }

    pub async fn members(&self, stream_type: &str) -> Result<BTreeSet<String>> {
        if stream_type.is_empty() {
            return Err(StoreError::Invalid("stream type is empty".into()));
        }
        let members = self.store.set_members(&subscribers_key(stream_type)).await?;
        Ok(members.into_iter().collect())
    }
}

fn check(stream_type: &str, user_id: &str) -> Result<()> {
    if stream_type.is_empty() {
        return Err(StoreError::Invalid("stream type is empty".into()));
    }
    if user_id.is_empty() {
        return Err(StoreError::Invalid("user id is empty".into()));
    }
    Ok(())
}
