//! Capability dispatch
//!
//! Integrations are separate processes, so the only thing the gateway trusts
//! is what they advertised at registration. Every gateway-initiated call goes
//! through a [`DispatchSnapshot`], which only hands out descriptors that
//! carry the matching capability tag.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::registry::registration_order;
use crate::ServiceRegistry;
use ig_common::{Capability, GatewayError, IntegrationDescriptor, RegistrationRecord, Result, RouteSpec};

/// Two live integrations claiming the same table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnershipConflict {
    pub table: String,
    pub winner: String,
    pub loser: String,
}

impl From<OwnershipConflict> for GatewayError {
    fn from(c: OwnershipConflict) -> Self {
        GatewayError::OwnershipConflict {
            table: c.table,
            winner: c.winner,
            loser: c.loser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRefusal {
    #[error("integration {0} is not registered")]
    NotRegistered(String),

    #[error("integration {name} does not advertise {capability}")]
    NotAdvertised { name: String, capability: Capability },
}

/// A declared route matched against an incoming request
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    pub descriptor: &'a IntegrationDescriptor,
    pub route: &'a RouteSpec,
}

/// Point-in-time view of live integrations and the table ownership they imply
#[derive(Debug, Default)]
pub struct DispatchSnapshot {
    records: IndexMap<String, RegistrationRecord>,
    ownership: HashMap<String, String>,
    conflicts: Vec<OwnershipConflict>,
}

impl DispatchSnapshot {
    /// Fold records into an ownership map; the first registered claimant of
    /// a table keeps it.
    pub fn build(mut records: Vec<RegistrationRecord>) -> Self {
        records.sort_by(registration_order);

        let mut ownership: HashMap<String, String> = HashMap::new();
        let mut conflicts = Vec::new();
        for record in &records {
            for table in &record.descriptor.owned_tables {
                match ownership.get(table) {
                    Some(winner) if winner != record.name() => conflicts.push(OwnershipConflict {
                        table: table.clone(),
                        winner: winner.clone(),
                        loser: record.name().to_string(),
                    }),
                    Some(_) => {}
                    None => {
                        ownership.insert(table.clone(), record.name().to_string());
                    }
                }
            }
        }

        let records = records
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();

        Self {
            records,
            ownership,
            conflicts,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live descriptors in registration order
    pub fn descriptors(&self) -> impl Iterator<Item = &IntegrationDescriptor> {
        self.records.values().map(|r| &r.descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&IntegrationDescriptor> {
        self.records.get(name).map(|r| &r.descriptor)
    }

    /// Descriptors that advertise `class`
    pub fn targets(&self, class: Capability) -> impl Iterator<Item = &IntegrationDescriptor> {
        self.descriptors().filter(move |d| d.has_capability(class))
    }

    pub fn owner_of(&self, table: &str) -> Option<&IntegrationDescriptor> {
        self.ownership.get(table).and_then(|name| self.get(name))
    }

    /// Owner of `table`, provided it advertises `class`
    pub fn resolve_table(&self, class: Capability, table: &str) -> Option<&IntegrationDescriptor> {
        self.owner_of(table).filter(|d| d.has_capability(class))
    }

    pub fn resolve(
        &self,
        class: Capability,
        name: &str,
    ) -> std::result::Result<&IntegrationDescriptor, DispatchRefusal> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| DispatchRefusal::NotRegistered(name.to_string()))?;
        if descriptor.has_capability(class) {
            Ok(descriptor)
        } else {
            Err(DispatchRefusal::NotAdvertised {
                name: name.to_string(),
                capability: class,
            })
        }
    }

    pub fn conflicts(&self) -> &[OwnershipConflict] {
        &self.conflicts
    }

    /// First declared route matching `method` and `path`, in registration order.
    ///
    /// Route segments starting with `:` match any single non-empty segment.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        self.descriptors().find_map(|descriptor| {
            descriptor
                .routes
                .iter()
                .find(|route| route.method.eq_ignore_ascii_case(method) && path_matches(&route.path, path))
                .map(|route| RouteMatch { descriptor, route })
        })
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.trim_end_matches('/').split('/').collect();
    let path: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    pattern.len() == path.len()
        && pattern.iter().zip(&path).all(|(p, s)| {
            if p.starts_with(':') {
                !s.is_empty()
            } else {
                p == s
            }
        })
}

/// Builds snapshots from live leases and reports new ownership conflicts
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    reported: Mutex<HashSet<OwnershipConflict>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Snapshot of the leases that are live right now
    pub async fn snapshot(&self) -> Result<DispatchSnapshot> {
        let snapshot = DispatchSnapshot::build(self.registry.live_records().await?);
        self.report_conflicts(&snapshot);
        Ok(snapshot)
    }

    fn report_conflicts(&self, snapshot: &DispatchSnapshot) {
        let mut reported = self.reported.lock();
        // forget conflicts that resolved themselves so a recurrence is logged again
        reported.retain(|c| snapshot.conflicts.contains(c));
        for conflict in snapshot.conflicts() {
            if reported.insert(conflict.clone()) {
                let error = GatewayError::from(conflict.clone());
                warn!(
                    table = %conflict.table,
                    winner = %conflict.winner,
                    loser = %conflict.loser,
                    error = %error,
                    "Table claimed by more than one integration, first registered wins"
                );
            }
        }
    }
}
