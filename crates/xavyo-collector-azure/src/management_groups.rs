//! Management-group collection stage.
//!
//! Groups are emitted flat: `ParentId` is null and `HierarchyLevel` is 0.
//! [`stitch_hierarchy`] is a separate pass for callers that hold the parent
//! relationships.

use std::collections::{HashMap, HashSet};

use tracing::{instrument, warn};

use crate::clients::ClientFactory;
use crate::model::Record;
use crate::pagination::read_all;
use crate::projection::project_management_group;
use crate::timing::CollectionTimer;
use crate::{CollectorError, CollectorResult};

#[derive(Debug)]
pub struct ManagementGroupStage<'a> {
    clients: &'a ClientFactory,
}

impl<'a> ManagementGroupStage<'a> {
    #[must_use]
    pub fn new(clients: &'a ClientFactory) -> Self {
        Self { clients }
    }

    /// Lists the tenant's management groups. Empty when the listing fails.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Cancelled` if the run is cancelled.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> CollectorResult<Vec<Record>> {
        let arm = self.clients.resource_manager();
        let timer = CollectionTimer::start("management_groups");
        match read_all(
            arm,
            "management_groups",
            &arm.management_groups_url(),
            project_management_group,
        )
        .await
        {
            Ok(groups) => {
                timer.finish(groups.len());
                Ok(groups)
            }
            Err(CollectorError::Cancelled) => Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Failed to list management groups, leaving them empty");
                Ok(Vec::new())
            }
        }
    }
}

/// Sets `ParentId` and `HierarchyLevel` from `parents` (group id to parent
/// group id). A group whose ancestry loops keeps level 0.
pub fn stitch_hierarchy(records: &mut [Record], parents: &HashMap<String, String>) {
    for record in records.iter_mut() {
        let Record::ManagementGroup(group) = record else {
            continue;
        };
        group.parent_id = parents.get(&group.id).cloned();

        let mut seen = HashSet::from([group.id.as_str()]);
        let mut level = 0u32;
        let mut current = group.id.as_str();
        while let Some(parent) = parents.get(current) {
            if !seen.insert(parent.as_str()) {
                warn!(group = %group.id, "Management group hierarchy contains a cycle");
                level = 0;
                break;
            }
            level += 1;
            current = parent;
        }
        group.hierarchy_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn groups(ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| {
                project_management_group(&json!({
                    "id": id,
                    "name": id,
                    "properties": {"displayName": id, "tenantId": "t1"}
                }))
                .unwrap()
            })
            .collect()
    }

    fn fields(record: &Record) -> (Option<String>, u32) {
        match record {
            Record::ManagementGroup(g) => (g.parent_id.clone(), g.hierarchy_level),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_stitch_levels() {
        let mut records = groups(&["root", "child", "leaf"]);
        let parents = HashMap::from([
            ("child".to_string(), "root".to_string()),
            ("leaf".to_string(), "child".to_string()),
        ]);
        stitch_hierarchy(&mut records, &parents);

        assert_eq!(fields(&records[0]), (None, 0));
        assert_eq!(fields(&records[1]), (Some("root".to_string()), 1));
        assert_eq!(fields(&records[2]), (Some("child".to_string()), 2));
    }

    #[test]
    fn test_stitch_cycle_terminates() {
        let mut records = groups(&["a", "b"]);
        let parents = HashMap::from([
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ]);
        stitch_hierarchy(&mut records, &parents);

        assert_eq!(fields(&records[0]), (Some("b".to_string()), 0));
        assert_eq!(fields(&records[1]), (Some("a".to_string()), 0));
    }

    #[test]
    fn test_unstitched_defaults() {
        let records = groups(&["mg1"]);
        let value = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(value["ParentId"], serde_json::Value::Null);
        assert_eq!(value["HierarchyLevel"], 0);
        assert_eq!(value["ResourceType"], "ManagementGroup");
        assert_eq!(value["entityKind"], "ManagementGroup");
    }
}
