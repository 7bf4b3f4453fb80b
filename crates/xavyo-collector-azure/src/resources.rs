//! Per-subscription resource stage.
//!
//! Resources and resource groups are read with one Resource Graph query each
//! across every subscription (chunked at the service limit) and partitioned by
//! `subscriptionId`. Role assignments, role definitions and Key Vault access
//! policies are then read per subscription by a small worker pool.

use std::collections::{BTreeMap, HashMap};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::clients::ClientFactory;
use crate::model::{EntityKind, Record};
use crate::pagination::read_all;
use crate::projection::{
    project_resource_row, project_rm_role_assignment, project_rm_role_definition,
};
use crate::scope::{ScopeBucket, ScopeBuckets};
use crate::timing::CollectionTimer;
use crate::{CollectorError, CollectorResult};

pub const RESOURCES_QUERY: &str = "resources \
| project id, name, type, location, resourceGroup, subscriptionId, tags, identity, properties, zones, kind, sku, plan \
| order by subscriptionId asc, type asc";

pub const RESOURCE_GROUPS_QUERY: &str = "resourcecontainers \
| where type == \"microsoft.resources/subscriptions/resourcegroups\" \
| project id, name, type, location, subscriptionId, tags, properties \
| order by subscriptionId asc, name asc";

/// Key Vault access policies of one subscription, one row per policy entry.
#[must_use]
pub fn key_vault_access_policy_query(subscription_id: &str) -> String {
    format!(
        "resources \
| where type == \"microsoft.keyvault/vaults\" \
| where subscriptionId == '{}' \
| project id, name, type, location, resourceGroup, subscriptionId, properties.accessPolicies \
| extend accessPolicies = properties_accessPolicies \
| where isnotnull(accessPolicies) and array_length(accessPolicies) > 0 \
| mvexpand policy = accessPolicies \
| project id, name, type, location, resourceGroup, subscriptionId, policy \
| order by name asc",
        subscription_id.replace('\'', "\\'")
    )
}

/// Lifecycle of one subscription in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "inProgress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One `azure_resources[<subscriptionId>]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    pub azure_resources: Vec<Record>,
    pub azure_resource_groups: Vec<Record>,
    pub key_vault_access_policies: Vec<Record>,
    pub subscription_role_assignments: Vec<Record>,
    pub resource_group_role_assignments: Vec<Record>,
    pub resource_level_role_assignments: Vec<Record>,
    pub management_group_role_assignments: Vec<Record>,
    pub tenant_role_assignments: Vec<Record>,
    pub azure_role_definitions: Vec<Record>,
}

impl SubscriptionData {
    #[must_use]
    pub fn total(&self) -> usize {
        [
            &self.azure_resources,
            &self.azure_resource_groups,
            &self.key_vault_access_policies,
            &self.subscription_role_assignments,
            &self.resource_group_role_assignments,
            &self.resource_level_role_assignments,
            &self.management_group_role_assignments,
            &self.tenant_role_assignments,
            &self.azure_role_definitions,
        ]
        .iter()
        .map(|c| c.len())
        .sum()
    }

    /// Places role assignments in the slot matching their scope bucket.
    fn set_role_assignments(&mut self, assignments: Vec<Record>) {
        let buckets = ScopeBuckets::partition(assignments, |record| {
            record
                .as_rm_role_assignment()
                .map_or(ScopeBucket::Resource, |a| a.scope_bucket)
        });
        self.tenant_role_assignments = buckets.tenant;
        self.management_group_role_assignments = buckets.management_group;
        self.subscription_role_assignments = buckets.subscription;
        self.resource_group_role_assignments = buckets.resource_group;
        self.resource_level_role_assignments = buckets.resource;
    }
}

/// Resource Graph rows for one subscription.
#[derive(Debug, Default)]
struct Partition {
    resources: Vec<Record>,
    resource_groups: Vec<Record>,
}

/// Result of one subscription worker.
#[derive(Debug)]
pub struct SubscriptionOutcome {
    pub subscription_id: String,
    pub state: SubscriptionState,
    pub data: SubscriptionData,
}

#[derive(Debug)]
pub struct ResourceStage<'a> {
    clients: &'a ClientFactory,
}

impl<'a> ResourceStage<'a> {
    #[must_use]
    pub fn new(clients: &'a ClientFactory) -> Self {
        Self { clients }
    }

    /// Collects `azure_resources` for `subscriptions`. Failed subscriptions are
    /// left out of the map.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Cancelled` if the run is cancelled.
    #[instrument(skip(self, subscriptions), fields(subscription_count = subscriptions.len()))]
    pub async fn collect(
        &self,
        subscriptions: &[String],
    ) -> CollectorResult<BTreeMap<String, SubscriptionData>> {
        let mut out = BTreeMap::new();
        if subscriptions.is_empty() {
            return Ok(out);
        }

        let mut partitions = self.read_cross_subscription(subscriptions).await?;
        let work: Vec<(String, Partition)> = subscriptions
            .iter()
            .map(|s| {
                let partition = partitions.remove(&s.to_lowercase()).unwrap_or_default();
                debug!(
                    subscription = %s,
                    state = %SubscriptionState::Pending,
                    "Subscription queued"
                );
                (s.clone(), partition)
            })
            .collect();

        let workers = self.clients.config().concurrency.subscription_workers;
        let outcomes: Vec<CollectorResult<SubscriptionOutcome>> = stream::iter(work)
            .map(|(subscription_id, partition)| self.build_subscription(subscription_id, partition))
            .buffer_unordered(workers)
            .collect()
            .await;

        for outcome in outcomes {
            let outcome = outcome?;
            match outcome.state {
                SubscriptionState::Succeeded => {
                    out.insert(outcome.subscription_id, outcome.data);
                }
                state => {
                    warn!(
                        subscription = %outcome.subscription_id,
                        state = %state,
                        "Subscription failed, omitting it from the document"
                    );
                }
            }
        }

        info!(
            processed = out.len(),
            requested = subscriptions.len(),
            "Resource collection complete"
        );
        Ok(out)
    }

    /// Runs the pooled resource and resource-group queries and partitions the
    /// rows by lowercased subscription id.
    async fn read_cross_subscription(
        &self,
        subscriptions: &[String],
    ) -> CollectorResult<HashMap<String, Partition>> {
        let arm = self.clients.resource_manager();
        let chunk_size = self.clients.config().resource_graph_subscription_chunk;
        let mut partitions: HashMap<String, Partition> = HashMap::new();

        for chunk in subscriptions.chunks(chunk_size) {
            let timer = CollectionTimer::start("azureResources");
            let rows = self
                .query_or_empty(arm.query_resource_graph("azureResources", RESOURCES_QUERY, chunk))
                .await?;
            timer.finish(rows.len());
            for row in &rows {
                if let Some((key, record)) = partition_row(EntityKind::Resource, row) {
                    partitions.entry(key).or_default().resources.push(record);
                }
            }

            let timer = CollectionTimer::start("azureResourceGroups");
            let rows = self
                .query_or_empty(arm.query_resource_graph(
                    "azureResourceGroups",
                    RESOURCE_GROUPS_QUERY,
                    chunk,
                ))
                .await?;
            timer.finish(rows.len());
            for row in &rows {
                if let Some((key, record)) = partition_row(EntityKind::ResourceGroup, row) {
                    partitions.entry(key).or_default().resource_groups.push(record);
                }
            }
        }

        Ok(partitions)
    }

    async fn query_or_empty(
        &self,
        query: impl std::future::Future<Output = CollectorResult<Vec<Value>>>,
    ) -> CollectorResult<Vec<Value>> {
        match query.await {
            Ok(rows) => Ok(rows),
            Err(CollectorError::Cancelled) => Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Resource Graph query failed, continuing without its rows");
                Ok(Vec::new())
            }
        }
    }

    /// Builds one subscription's entry. The subscription fails only when role
    /// assignments, role definitions and Key Vault policies all fail.
    async fn build_subscription(
        &self,
        subscription_id: String,
        partition: Partition,
    ) -> CollectorResult<SubscriptionOutcome> {
        debug!(
            subscription = %subscription_id,
            state = %SubscriptionState::InProgress,
            "Processing subscription"
        );
        let arm = self.clients.resource_manager();
        let mut data = SubscriptionData {
            azure_resources: partition.resources,
            azure_resource_groups: partition.resource_groups,
            ..SubscriptionData::default()
        };
        let mut failures = 0;

        let timer = CollectionTimer::start(format!("roleAssignments {subscription_id}"));
        match read_all(
            arm,
            "roleAssignments",
            &arm.role_assignments_url(&subscription_id),
            project_rm_role_assignment,
        )
        .await
        {
            Ok(assignments) => {
                timer.finish(assignments.len());
                data.set_role_assignments(assignments);
            }
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    subscription = %subscription_id,
                    error = %e,
                    "Failed to list role assignments"
                );
                failures += 1;
            }
        }

        let timer = CollectionTimer::start(format!("azureRoleDefinitions {subscription_id}"));
        match read_all(
            arm,
            "azureRoleDefinitions",
            &arm.role_definitions_url(&subscription_id),
            project_rm_role_definition,
        )
        .await
        {
            Ok(definitions) => {
                timer.finish(definitions.len());
                data.azure_role_definitions = definitions;
            }
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    subscription = %subscription_id,
                    error = %e,
                    "Failed to list role definitions"
                );
                failures += 1;
            }
        }

        let timer = CollectionTimer::start(format!("keyVaultAccessPolicies {subscription_id}"));
        let scope = [subscription_id.clone()];
        match arm
            .query_resource_graph(
                "keyVaultAccessPolicies",
                &key_vault_access_policy_query(&subscription_id),
                &scope,
            )
            .await
        {
            Ok(rows) => {
                data.key_vault_access_policies = rows
                    .iter()
                    .filter_map(|row| project_resource_row(EntityKind::KeyVaultAccessPolicy, row))
                    .collect();
                timer.finish(data.key_vault_access_policies.len());
            }
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    subscription = %subscription_id,
                    error = %e,
                    "Failed to query Key Vault access policies"
                );
                failures += 1;
            }
        }

        let state = if failures == 3 {
            SubscriptionState::Failed
        } else {
            SubscriptionState::Succeeded
        };
        info!(
            subscription = %subscription_id,
            state = %state,
            item_count = data.total(),
            "Subscription processed"
        );
        Ok(SubscriptionOutcome {
            subscription_id,
            state,
            data,
        })
    }
}

/// Projects a Resource Graph row and returns it with its lowercased
/// subscription id. Rows without a subscription id are dropped.
fn partition_row(kind: EntityKind, row: &Value) -> Option<(String, Record)> {
    let record = project_resource_row(kind, row)?;
    let key = record.as_resource_row()?.subscription_id()?.to_lowercase();
    Some((key, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::project_rm_role_assignment;
    use serde_json::json;

    #[test]
    fn test_key_vault_query_embeds_subscription() {
        let query = key_vault_access_policy_query("sub-1");
        assert!(query.contains("where subscriptionId == 'sub-1'"));
        assert!(query.contains("mvexpand policy = accessPolicies"));
        assert!(key_vault_access_policy_query("a'b").contains("'a\\'b'"));
    }

    #[test]
    fn test_partition_row_lowercases_subscription() {
        let (key, record) = partition_row(
            EntityKind::Resource,
            &json!({"id": "/subscriptions/ABC/x", "subscriptionId": "ABC"}),
        )
        .unwrap();
        assert_eq!(key, "abc");
        assert_eq!(record.kind(), EntityKind::Resource);

        assert!(partition_row(EntityKind::Resource, &json!({"id": "/x"})).is_none());
    }

    #[test]
    fn test_role_assignments_land_in_scope_slots() {
        let scopes = [
            "/",
            "/providers/Microsoft.Management/managementGroups/mg1",
            "/subscriptions/s1",
            "/subscriptions/s1/resourceGroups/rg1",
            "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
        ];
        let assignments: Vec<Record> = scopes
            .iter()
            .enumerate()
            .map(|(i, scope)| {
                project_rm_role_assignment(&json!({
                    "id": format!("ra{i}"),
                    "properties": {"scope": scope, "principalId": "p1"}
                }))
                .unwrap()
            })
            .collect();

        let mut data = SubscriptionData::default();
        data.set_role_assignments(assignments);
        assert_eq!(data.tenant_role_assignments.len(), 1);
        assert_eq!(data.management_group_role_assignments.len(), 1);
        assert_eq!(data.subscription_role_assignments.len(), 1);
        assert_eq!(data.resource_group_role_assignments.len(), 1);
        assert_eq!(data.resource_level_role_assignments.len(), 1);
        assert_eq!(data.total(), 5);
        assert_eq!(data.resource_level_role_assignments[0].id(), "ra4");
    }

    #[test]
    fn test_subscription_data_keys() {
        let value = serde_json::to_value(SubscriptionData::default()).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "azureResources",
            "azureResourceGroups",
            "keyVaultAccessPolicies",
            "subscriptionRoleAssignments",
            "resourceGroupRoleAssignments",
            "resourceLevelRoleAssignments",
            "managementGroupRoleAssignments",
            "tenantRoleAssignments",
            "azureRoleDefinitions",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object.len(), 9);
    }
}
