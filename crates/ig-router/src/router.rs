//! Change-event router
//!
//! Takes a batch from the change-data-capture relay and, per record:
//! 1. serializes the outbound envelope once
//! 2. resolves the owning integration (or the owning user, for core tables)
//! 3. asks the owner for recipients, falling back to the stream's subscribers
//! 4. hands the same bytes to each recipient exactly once
//!
//! Records of one table are handled strictly in arrival order; different
//! tables proceed concurrently. Delivery is at-most-once. A failing
//! integration costs only its own record.

use bytes::Bytes;
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashMap;
use std::slice;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::client::IntegrationClient;
use crate::hub::EventSink;
use ig_common::{Capability, ChangeEnvelope, ChangeRecord};
use ig_registry::{DispatchSnapshot, Dispatcher};
use ig_store::SubscriptionSets;

#[derive(Debug, Clone)]
pub struct ChangeRouterConfig {
    /// Table name -> record field holding the owning user id
    pub core_tables: HashMap<String, String>,
}

impl Default for ChangeRouterConfig {
    fn default() -> Self {
        Self {
            core_tables: HashMap::from([
                ("user_preferences".to_string(), "logto_sub".to_string()),
                ("user_streams".to_string(), "logto_sub".to_string()),
            ]),
        }
    }
}

/// Outcome counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub received: usize,
    /// Records that reached at least the recipient-resolution stage
    pub processed: usize,
    /// Per-user deliveries, summed over records
    pub delivered: usize,
    pub dropped: usize,
}

enum RecordOutcome {
    Delivered(usize),
    Dropped,
}

pub struct ChangeEventRouter {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn IntegrationClient>,
    subscriptions: SubscriptionSets,
    sink: Arc<dyn EventSink>,
    config: ChangeRouterConfig,
}

impl ChangeEventRouter {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        client: Arc<dyn IntegrationClient>,
        subscriptions: SubscriptionSets,
        sink: Arc<dyn EventSink>,
        config: ChangeRouterConfig,
    ) -> Self {
        Self {
            dispatcher,
            client,
            subscriptions,
            sink,
            config,
        }
    }

    pub async fn route_batch(&self, records: Vec<ChangeRecord>) -> RouteReport {
        let mut report = RouteReport {
            received: records.len(),
            ..Default::default()
        };

        let mut by_table: IndexMap<String, Vec<ChangeRecord>> = IndexMap::new();
        for record in records {
            if let Err(e) = record.validate() {
                warn!(error = %e, action = ?record.action, "Dropping invalid change record");
                count(&mut report, RecordOutcome::Dropped);
                continue;
            }
            by_table.entry(record.table().to_string()).or_default().push(record);
        }

        if by_table.is_empty() {
            return report;
        }

        // One snapshot per batch; core tables can still be routed without it
        let snapshot = match self.dispatcher.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(error = %e, "Registry unavailable, integration-owned records will be dropped");
                None
            }
        };

        let groups = by_table.into_iter().map(|(table, records)| {
            let snapshot = snapshot.as_ref();
            async move {
                let mut outcomes = Vec::with_capacity(records.len());
                for record in records {
                    outcomes.push(self.route_record(snapshot, &table, record).await);
                }
                outcomes
            }
        });

        for outcome in join_all(groups).await.into_iter().flatten() {
            count(&mut report, outcome);
        }

        debug!(
            received = report.received,
            processed = report.processed,
            delivered = report.delivered,
            dropped = report.dropped,
            "Change batch routed"
        );
        report
    }

    async fn route_record(
        &self,
        snapshot: Option<&DispatchSnapshot>,
        table: &str,
        record: ChangeRecord,
    ) -> RecordOutcome {
        let payload = match ChangeEnvelope::for_record(&record).to_vec() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(table, error = %e, "Failed to serialize change envelope");
                return RecordOutcome::Dropped;
            }
        };

        if let Some(field) = self.config.core_tables.get(table) {
            return match record.field_str(field).filter(|u| !u.is_empty()) {
                Some(user_id) => RecordOutcome::Delivered(self.fan_out([user_id.to_string()], &payload)),
                None => {
                    warn!(table, field = %field, "Core table record has no owner, dropping");
                    RecordOutcome::Dropped
                }
            };
        }

        let Some(snapshot) = snapshot else {
            return RecordOutcome::Dropped;
        };
        let Some(owner) = snapshot.owner_of(table) else {
            debug!(table, "No integration owns table, dropping");
            return RecordOutcome::Dropped;
        };
        if !owner.has_capability(Capability::ChangeHandler) {
            warn!(table, integration = %owner.name, "Table owner does not accept change events, dropping");
            return RecordOutcome::Dropped;
        }

        let recipients = match self
            .client
            .ingest_changes(owner, slice::from_ref(&record))
            .await
        {
            Ok(Some(users)) => users,
            Ok(None) => match self.subscriptions.members(&owner.name).await {
                Ok(members) => members.into_iter().collect(),
                Err(e) => {
                    error!(table, integration = %owner.name, error = %e, "Subscriber lookup failed, dropping");
                    return RecordOutcome::Dropped;
                }
            },
            Err(e) => {
                error!(table, integration = %owner.name, error = %e, "Integration rejected change record, dropping");
                return RecordOutcome::Dropped;
            }
        };

        RecordOutcome::Delivered(self.fan_out(recipients, &payload))
    }

    /// Deliver to each distinct non-empty recipient once
    fn fan_out(&self, recipients: impl IntoIterator<Item = String>, payload: &Bytes) -> usize {
        let unique: IndexSet<String> = recipients.into_iter().filter(|u| !u.is_empty()).collect();
        for user_id in &unique {
            self.sink.deliver(user_id, payload.clone());
        }
        metrics::counter!("gateway_deliveries_total").increment(unique.len() as u64);
        unique.len()
    }
}

fn count(report: &mut RouteReport, outcome: RecordOutcome) {
    match outcome {
        RecordOutcome::Delivered(n) => {
            report.processed += 1;
            report.delivered += n;
            metrics::counter!("gateway_change_records_total", "outcome" => "routed").increment(1);
        }
        RecordOutcome::Dropped => {
            report.dropped += 1;
            metrics::counter!("gateway_change_records_total", "outcome" => "dropped").increment(1);
        }
    }
}
