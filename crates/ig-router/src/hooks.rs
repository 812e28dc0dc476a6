//! Optional integration contracts: stream lifecycle hooks and config schemas.
//!
//! Both are only ever called on integrations that advertised them.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{ClientError, IntegrationClient, LifecycleEvent};
use ig_common::{Capability, GatewayError};
use ig_registry::{DispatchRefusal, Dispatcher};

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Refused(#[from] DispatchRefusal),

    #[error("integration call failed: {0}")]
    Upstream(#[from] ClientError),

    #[error(transparent)]
    Registry(#[from] GatewayError),
}

pub struct IntegrationHooks {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn IntegrationClient>,
}

impl IntegrationHooks {
    pub fn new(dispatcher: Arc<Dispatcher>, client: Arc<dyn IntegrationClient>) -> Self {
        Self { dispatcher, client }
    }

    /// Tell the integration behind `stream_type` about a subscription change.
    ///
    /// Best-effort: returns whether the hook was delivered, never an error.
    pub async fn notify_lifecycle(&self, stream_type: &str, event: &LifecycleEvent) -> bool {
        match self.call_lifecycle(stream_type, event).await {
            Ok(()) => {
                debug!(stream_type, event = ?event.event, user = %event.user, "Lifecycle hook delivered");
                true
            }
            Err(HookError::Refused(reason)) => {
                debug!(stream_type, reason = %reason, "Lifecycle hook skipped");
                false
            }
            Err(e) => {
                warn!(stream_type, event = ?event.event, error = %e, "Lifecycle hook failed");
                false
            }
        }
    }

    async fn call_lifecycle(&self, stream_type: &str, event: &LifecycleEvent) -> Result<(), HookError> {
        let snapshot = self.dispatcher.snapshot().await?;
        let target = snapshot.resolve(Capability::LifecycleHooks, stream_type)?;
        self.client.notify_lifecycle(target, event).await?;
        Ok(())
    }

    pub async fn config_schema(&self, name: &str) -> Result<Value, HookError> {
        let snapshot = self.dispatcher.snapshot().await?;
        let target = snapshot.resolve(Capability::Configurable, name)?;
        Ok(self.client.fetch_config_schema(target).await?)
    }
}
