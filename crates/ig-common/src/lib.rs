use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Store Keys
// ============================================================================

pub const SERVICE_KEY_PREFIX: &str = "service:";
pub const SUBSCRIBERS_KEY_PREFIX: &str = "stream:subscribers:";
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Registry key for an integration lease
pub fn service_key(name: &str) -> String {
    format!("{SERVICE_KEY_PREFIX}{name}")
}

/// Set key holding the subscribers of a stream type
pub fn subscribers_key(stream_type: &str) -> String {
    format!("{SUBSCRIBERS_KEY_PREFIX}{stream_type}")
}

pub fn cache_key(resource_type: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{resource_type}")
}

// ============================================================================
// Integration Descriptors
// ============================================================================

/// Classes of gateway-initiated calls an integration can opt into
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ChangeHandler,
    DashboardProvider,
    HealthChecker,
    LifecycleHooks,
    Configurable,
    /// Tag this gateway does not know; kept so foreign records still parse
    #[serde(other)]
    Unrecognized,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ChangeHandler => "change_handler",
            Capability::DashboardProvider => "dashboard_provider",
            Capability::HealthChecker => "health_checker",
            Capability::LifecycleHooks => "lifecycle_hooks",
            Capability::Configurable => "configurable",
            Capability::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP route an integration exposes through the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteSpec {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub auth_required: bool,
}

/// Self-announced description of an integration, written under its lease
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrationDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Empty when the integration exposes no internal surface
    #[serde(default)]
    pub internal_url: String,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub owned_tables: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl IntegrationDescriptor {
    pub fn new(name: impl Into<String>, internal_url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            internal_url: internal_url.into(),
            capabilities: BTreeSet::new(),
            owned_tables: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.owned_tables.push(table.into());
        self
    }

    pub fn with_route(mut self, method: &str, path: &str, auth_required: bool) -> Self {
        self.routes.push(RouteSpec {
            method: method.to_uppercase(),
            path: path.to_string(),
            auth_required,
        });
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        capability != Capability::Unrecognized && self.capabilities.contains(&capability)
    }

    /// Base URL without a trailing slash, or None if not configured
    pub fn internal_base(&self) -> Option<&str> {
        let url = self.internal_url.trim().trim_end_matches('/');
        if url.is_empty() {
            None
        } else {
            Some(url)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GatewayError::validation("integration name is empty"));
        }
        if self.name.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(GatewayError::validation(format!(
                "integration name '{}' contains whitespace or ':'",
                self.name
            )));
        }
        if let Some(base) = self.internal_base() {
            let absolute = url::Url::parse(base).is_ok_and(|u| {
                matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty())
            });
            if !absolute {
                return Err(GatewayError::validation(format!(
                    "internal_url '{}' of '{}' is not an absolute http(s) URL",
                    self.internal_url, self.name
                )));
            }
        }
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(GatewayError::validation(format!(
                    "route path '{}' of '{}' must start with '/'",
                    route.path, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The JSON value stored under `service:<name>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRecord {
    #[serde(flatten)]
    pub descriptor: IntegrationDescriptor,
    /// First registration time; preserved across renewals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

impl RegistrationRecord {
    pub fn new(descriptor: IntegrationDescriptor) -> Self {
        Self {
            descriptor,
            registered_at: Some(Utc::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

// ============================================================================
// Change Records
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeMetadata {
    #[serde(default)]
    pub table_schema: String,
    #[serde(default)]
    pub table_name: String,
}

/// One row-level change emitted by the change-data-capture relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub action: ChangeAction,
    #[serde(default)]
    pub record: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<serde_json::Map<String, serde_json::Value>>,
    pub metadata: ChangeMetadata,
}

impl ChangeRecord {
    pub fn table(&self) -> &str {
        &self.metadata.table_name
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata.table_name.trim().is_empty() {
            return Err(GatewayError::validation("change record has no table_name"));
        }
        Ok(())
    }

    /// String value of a record field, if present
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.record.get(field).and_then(|v| v.as_str())
    }
}

/// Outbound envelope pushed to subscribers: `{"data":[record]}`
#[derive(Debug, Serialize)]
pub struct ChangeEnvelope<'a> {
    pub data: [&'a ChangeRecord; 1],
}

impl<'a> ChangeEnvelope<'a> {
    pub fn for_record(record: &'a ChangeRecord) -> Self {
        Self { data: [record] }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Transient I/O error: {message}")]
    TransientIo { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Ownership conflict on table {table}: {winner} keeps it, {loser} ignored")]
    OwnershipConflict {
        table: String,
        winner: String,
        loser: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_wire_format() {
        let raw = json!({
            "name": "finance",
            "display_name": "Finance",
            "internal_url": "http://finance:8081/",
            "capabilities": ["change_handler", "dashboard_provider", "cdc_magic"],
            "owned_tables": ["trades"],
            "routes": [{"method": "GET", "path": "/finance/quotes", "auth_required": true}]
        });

        let descriptor: IntegrationDescriptor = serde_json::from_value(raw).unwrap();
        assert!(descriptor.has_capability(Capability::ChangeHandler));
        assert!(descriptor.has_capability(Capability::DashboardProvider));
        assert!(!descriptor.has_capability(Capability::HealthChecker));
        assert!(!descriptor.has_capability(Capability::Unrecognized));
        assert_eq!(descriptor.internal_base(), Some("http://finance:8081"));
        assert_eq!(descriptor.owned_tables, vec!["trades".to_string()]);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_record_without_timestamp_parses() {
        let raw = json!({"name": "rss", "internal_url": ""});
        let record: RegistrationRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.name(), "rss");
        assert!(record.registered_at.is_none());
        assert!(record.descriptor.internal_base().is_none());
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(IntegrationDescriptor::new("", "").validate().is_err());
        assert!(IntegrationDescriptor::new("a:b", "").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "ftp://rss").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "http://").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "http://a b").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "http://:8080").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "rss:8080").validate().is_err());
        assert!(IntegrationDescriptor::new("rss", "https://rss.internal:8443/base/")
            .validate()
            .is_ok());
        assert!(IntegrationDescriptor::new("rss", "http://rss:8080")
            .with_route("get", "no-slash", false)
            .validate()
            .is_err());
        assert!(IntegrationDescriptor::new("rss", "")
            .with_route("get", "/rss/feeds", false)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_change_record_envelope() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "action": "update",
            "record": {"id": 7, "logto_sub": "user-1"},
            "changes": {"price": 10},
            "metadata": {"table_schema": "public", "table_name": "trades"}
        }))
        .unwrap();

        assert_eq!(record.table(), "trades");
        assert_eq!(record.field_str("logto_sub"), Some("user-1"));

        let bytes = ChangeEnvelope::for_record(&record).to_vec().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["data"][0]["action"], "update");
        assert_eq!(value["data"][0]["metadata"]["table_name"], "trades");
    }

    #[test]
    fn test_change_record_requires_table() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "action": "insert",
            "metadata": {"table_name": " "}
        }))
        .unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_keys() {
        assert_eq!(service_key("finance"), "service:finance");
        assert_eq!(subscribers_key("sports"), "stream:subscribers:sports");
        assert_eq!(cache_key("dashboard:u1"), "cache:dashboard:u1");
    }
}
