//! Gateway-initiated traffic towards integrations and clients
//!
//! Components:
//! - **IntegrationClient**: HTTP calls into integration-internal endpoints
//! - **ChangeEventRouter**: change batches -> owning integration -> subscribers
//! - **DeliveryHub**: per-user bounded output channels
//! - **HealthAggregator**: single probes and the gateway-wide summary
//! - **DashboardAggregator**: concurrent per-user dashboard merge
//! - **IntegrationHooks**: lifecycle hooks and config schemas

pub mod client;
pub mod dashboard;
pub mod health;
pub mod hooks;
pub mod hub;
pub mod router;

pub use client::{
    ClientError, ForwardRequest, HttpClientConfig, HttpIntegrationClient, IntegrationClient,
    LifecycleEvent, LifecycleEventKind, UpstreamResponse,
};
pub use dashboard::{DashboardAggregate, DashboardAggregator};
pub use health::{HealthAggregator, HealthOutcome, HealthSummary};
pub use hooks::{HookError, IntegrationHooks};
pub use hub::{DeliveryHub, EventSink, Subscription};
pub use router::{ChangeEventRouter, ChangeRouterConfig, RouteReport};
