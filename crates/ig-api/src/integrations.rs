use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;
use ig_common::{Capability, IntegrationDescriptor};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSummary {
    pub name: String,
    pub display_name: String,
    pub capabilities: Vec<&'static str>,
    pub owned_tables: Vec<String>,
}

impl From<&IntegrationDescriptor> for IntegrationSummary {
    fn from(d: &IntegrationDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            display_name: d.display_name.clone(),
            capabilities: d
                .capabilities
                .iter()
                .filter(|c| **c != Capability::Unrecognized)
                .map(|c| c.as_str())
                .collect(),
            owned_tables: d.owned_tables.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IntegrationList {
    pub integrations: Vec<IntegrationSummary>,
}

/// Live integrations, in registration order
pub async fn list_integrations(State(state): State<GatewayState>) -> ApiResult<Json<IntegrationList>> {
    let snapshot = state.dispatcher.snapshot().await?;
    Ok(Json(IntegrationList {
        integrations: snapshot.descriptors().map(IntegrationSummary::from).collect(),
    }))
}

pub async fn config_schema(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let schema = state.hooks.config_schema(&name).await.map_err(ApiError::from)?;
    Ok(Json(schema))
}
