//! Gateway configuration
//!
//! Configuration is layered:
//! - built-in defaults
//! - an optional TOML file
//! - environment variable overrides (`IG_*`)
//!
//! Missing connection strings and inconsistent lease timings are rejected by
//! [`GatewayConfig::validate`] so the process never starts half-configured.

use ig_common::{GatewayError, IntegrationDescriptor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// In-process store; only meaningful for a single gateway instance
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::Invalid(format!("unknown store backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub lease_ttl_secs: u64,
    pub renew_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 30,
            renew_interval_secs: 20,
        }
    }
}

impl RegistryConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.lease_ttl_secs == 0 {
            return Err(ConfigError::Invalid("registry.lease_ttl_secs must be > 0".into()));
        }
        if self.renew_interval_secs == 0 || self.renew_interval_secs >= self.lease_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "registry.renew_interval_secs ({}) must be > 0 and shorter than lease_ttl_secs ({})",
                self.renew_interval_secs, self.lease_ttl_secs
            )));
        }
        Ok(())
    }
}

/// Outbound call timeouts, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub ingest_ms: u64,
    pub dashboard_ms: u64,
    pub health_ms: u64,
    pub health_summary_ms: u64,
    pub lifecycle_ms: u64,
    pub proxy_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            ingest_ms: 10_000,
            dashboard_ms: 2_000,
            health_ms: 5_000,
            health_summary_ms: 2_000,
            lifecycle_ms: 10_000,
            proxy_ms: 25_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    pub fn ingest(&self) -> Duration {
        Duration::from_millis(self.ingest_ms)
    }
    pub fn dashboard(&self) -> Duration {
        Duration::from_millis(self.dashboard_ms)
    }
    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }
    pub fn health_summary(&self) -> Duration {
        Duration::from_millis(self.health_summary_ms)
    }
    pub fn lifecycle(&self) -> Duration {
        Duration::from_millis(self.lifecycle_ms)
    }
    pub fn proxy(&self) -> Duration {
        Duration::from_millis(self.proxy_ms)
    }

    fn validate(&self) -> Result<()> {
        let all = [
            ("connect_ms", self.connect_ms),
            ("ingest_ms", self.ingest_ms),
            ("dashboard_ms", self.dashboard_ms),
            ("health_ms", self.health_ms),
            ("health_summary_ms", self.health_summary_ms),
            ("lifecycle_ms", self.lifecycle_ms),
            ("proxy_ms", self.proxy_ms),
        ];
        match all.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("timeouts.{name} must be > 0"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Bearer token the change relay must present; unset disables the check
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dashboard_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { dashboard_ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-connection buffer; events beyond it are dropped
    pub client_buffer: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { client_buffer: 64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Tables delivered straight to the user named in the given field
    pub core_tables: BTreeMap<String, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut core_tables = BTreeMap::new();
        core_tables.insert("user_preferences".to_string(), "logto_sub".to_string());
        core_tables.insert("user_streams".to_string(), "logto_sub".to_string());
        Self { core_tables }
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub timeouts: TimeoutConfig,
    pub webhook: WebhookConfig,
    pub cache: CacheConfig,
    pub delivery: DeliveryConfig,
    pub router: RouterConfig,
}

impl GatewayConfig {
    /// Defaults, then the TOML file (if any), then process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Override fields from `lookup`, usually `std::env::var`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);

        if let Some(bind) = env.string("IG_BIND") {
            self.server.bind = bind;
        }
        env.parse_into("IG_STORE_BACKEND", &mut self.store.backend);
        if let Some(url) = env.string("IG_REDIS_URL").or_else(|| env.string("REDIS_URL")) {
            self.store.redis_url = url;
        }
        env.parse_into("IG_LEASE_TTL_SECS", &mut self.registry.lease_ttl_secs);
        env.parse_into("IG_RENEW_INTERVAL_SECS", &mut self.registry.renew_interval_secs);
        env.parse_into("IG_INGEST_TIMEOUT_MS", &mut self.timeouts.ingest_ms);
        env.parse_into("IG_DASHBOARD_TIMEOUT_MS", &mut self.timeouts.dashboard_ms);
        env.parse_into("IG_HEALTH_TIMEOUT_MS", &mut self.timeouts.health_ms);
        env.parse_into("IG_PROXY_TIMEOUT_MS", &mut self.timeouts.proxy_ms);
        if let Some(secret) = env.string("IG_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        env.parse_into("IG_DASHBOARD_CACHE_TTL_SECS", &mut self.cache.dashboard_ttl_secs);
        env.parse_into("IG_CLIENT_BUFFER", &mut self.delivery.client_buffer);
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.redis_url is required for the redis backend".into(),
            ));
        }
        self.registry.validate()?;
        self.timeouts.validate()?;
        if self.delivery.client_buffer == 0 {
            return Err(ConfigError::Invalid("delivery.client_buffer must be > 0".into()));
        }
        if matches!(&self.webhook.secret, Some(s) if s.is_empty()) {
            return Err(ConfigError::Invalid("webhook.secret must not be empty when set".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.bind '{}' is not a socket address", self.server.bind)))
    }

    pub fn dashboard_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.dashboard_ttl_secs)
    }
}

// ============================================================================
// Integration sidecar
// ============================================================================

/// Configuration of a process announcing one integration into the registry
#[derive(Debug, Clone, Deserialize)]
pub struct AnnounceConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub integration: IntegrationDescriptor,
}

impl AnnounceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AnnounceConfig = toml::from_str(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);
        if let Some(url) = env.string("IG_REDIS_URL").or_else(|| env.string("REDIS_URL")) {
            self.store.redis_url = url;
        }
        if let Some(url) = env.string("IG_INTERNAL_URL") {
            self.integration.internal_url = url;
        }
        env.parse_into("IG_LEASE_TTL_SECS", &mut self.registry.lease_ttl_secs);
        env.parse_into("IG_RENEW_INTERVAL_SECS", &mut self.registry.renew_interval_secs);
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend != StoreBackend::Redis {
            return Err(ConfigError::Invalid(
                "announce requires the shared redis store".into(),
            ));
        }
        if self.store.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid("store.redis_url is required".into()));
        }
        self.registry.validate()?;
        self.integration
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse_into<T: FromStr>(&self, key: &str, target: &mut T) {
        if let Some(raw) = self.string(key) {
            match raw.parse() {
                Ok(value) => *target = value,
                Err(_) => warn!(key = key, value = %raw, "Ignoring unparsable environment override"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn with_redis() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.store.redis_url = "redis://cache:6379".to_string();
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = with_redis();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.lease_ttl(), Duration::from_secs(30));
        assert_eq!(config.registry.renew_interval(), Duration::from_secs(20));
        assert_eq!(config.timeouts.health(), Duration::from_secs(5));
        assert_eq!(config.router.core_tables.get("user_streams").map(String::as_str), Some("logto_sub"));
    }

    #[test]
    fn test_toml_file_with_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:9000"

[store]
backend = "memory"

[timeouts]
dashboard_ms = 750

[webhook]
secret = "from-file"
"#
        )
        .unwrap();

        let mut config = GatewayConfig::from_file(file.path()).unwrap();
        config.apply_env(lookup(&[
            ("IG_WEBHOOK_SECRET", "from-env"),
            ("IG_LEASE_TTL_SECS", "45"),
            ("IG_PROXY_TIMEOUT_MS", "not-a-number"),
        ]));

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.timeouts.dashboard_ms, 750);
        assert_eq!(config.timeouts.proxy_ms, 25_000);
        assert_eq!(config.registry.lease_ttl_secs, 45);
        assert_eq!(config.webhook.secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_missing_redis_url_is_fatal() {
        let config = GatewayConfig::default();
        assert!(config.store.redis_url.is_empty());
        let err = config.validate().unwrap_err();
        let gateway: GatewayError = err.into();
        assert!(matches!(gateway, GatewayError::Configuration { .. }));

        let mut config = GatewayConfig::default();
        config.apply_env(lookup(&[("REDIS_URL", "redis://cache:6379")]));
        assert!(config.validate().is_ok());

        let mut config = GatewayConfig::default();
        config.store.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_renew_must_be_shorter_than_ttl() {
        let mut config = with_redis();
        config.registry.renew_interval_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = with_redis();
        config.timeouts.health_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::from_file(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_announce_config() {
        let raw = r#"
[store]
redis_url = "redis://cache:6379"

[integration]
name = "finance"
display_name = "Finance"
internal_url = "http://finance:8081"
capabilities = ["change_handler", "dashboard_provider"]
owned_tables = ["trades"]

[[integration.routes]]
method = "GET"
path = "/finance/quotes/:symbol"
auth_required = true
"#;
        let mut config: AnnounceConfig = toml::from_str(raw).unwrap();
        config.apply_env(lookup(&[("IG_INTERNAL_URL", "http://10.0.0.5:8081")]));

        assert!(config.validate().is_ok());
        assert_eq!(config.integration.internal_url, "http://10.0.0.5:8081");
        assert_eq!(config.integration.routes.len(), 1);
        assert!(config.integration.routes[0].auth_required);
        assert_eq!(config.registry.lease_ttl_secs, 30);
    }
}
