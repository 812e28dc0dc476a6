use std::sync::Arc;

use ig_config::GatewayConfig;
use ig_registry::{Dispatcher, ServiceRegistry};
use ig_router::{
    ChangeEventRouter, ChangeRouterConfig, DashboardAggregator, DeliveryHub, HealthAggregator,
    HttpClientConfig, IntegrationClient, IntegrationHooks,
};
use ig_store::{Cache, KeyValueStore, SubscriptionSets};

/// Shared handler state; every component is reference-counted
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub client: Arc<dyn IntegrationClient>,
    pub router: Arc<ChangeEventRouter>,
    pub hub: Arc<DeliveryHub>,
    pub health: Arc<HealthAggregator>,
    pub dashboard: Arc<DashboardAggregator>,
    pub hooks: Arc<IntegrationHooks>,
    pub subscriptions: SubscriptionSets,
    pub webhook_secret: Option<Arc<str>>,
}

impl GatewayState {
    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn IntegrationClient>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry));
        let subscriptions = SubscriptionSets::new(store.clone());
        let hub = Arc::new(DeliveryHub::new(config.delivery.client_buffer));

        let router = ChangeEventRouter::new(
            dispatcher.clone(),
            client.clone(),
            subscriptions.clone(),
            hub.clone(),
            ChangeRouterConfig {
                core_tables: config.router.core_tables.clone().into_iter().collect(),
            },
        );
        let health = HealthAggregator::new(
            dispatcher.clone(),
            client.clone(),
            config.timeouts.health(),
            config.timeouts.health_summary(),
        );
        let dashboard = DashboardAggregator::new(
            dispatcher.clone(),
            client.clone(),
            Cache::new(store),
            config.timeouts.dashboard(),
            config.dashboard_cache_ttl(),
        );
        let hooks = IntegrationHooks::new(dispatcher.clone(), client.clone());

        Self {
            dispatcher,
            client,
            router: Arc::new(router),
            hub,
            health: Arc::new(health),
            dashboard: Arc::new(dashboard),
            hooks: Arc::new(hooks),
            subscriptions,
            webhook_secret: config
                .webhook
                .secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(Arc::from),
        }
    }
}

/// Outbound HTTP settings derived from the gateway timeouts
pub fn client_config(config: &GatewayConfig) -> HttpClientConfig {
    HttpClientConfig {
        connect_timeout: config.timeouts.connect(),
        ingest_timeout: config.timeouts.ingest(),
        dashboard_timeout: config.timeouts.dashboard(),
        lifecycle_timeout: config.timeouts.lifecycle(),
        proxy_timeout: config.timeouts.proxy(),
    }
}
