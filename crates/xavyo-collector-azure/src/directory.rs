//! Directory (Entra ID) collection stage.
//!
//! Nine independent listings run under a small semaphore. The three
//! dependent fan-outs (role members, group members, service principal app
//! role assignments) start only after all listings have completed and read
//! their parents from the finished listing.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::batch::{BatchDispatcher, FanOut};
use crate::clients::ClientFactory;
use crate::model::{AppRoleDirection, EntityKind, Record};
use crate::pagination::read_all;
use crate::projection::{
    project_app_role_assignment, project_directory_object, project_directory_role_assignment,
    project_group_membership, project_oauth2_grant, select_fields,
};
use crate::timing::CollectionTimer;
use crate::{CollectorError, CollectorResult};

/// The `azure_ad` section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureAdData {
    pub users: Vec<Record>,
    pub groups: Vec<Record>,
    pub service_principals: Vec<Record>,
    pub applications: Vec<Record>,
    pub devices: Vec<Record>,
    pub directory_roles: Vec<Record>,
    pub role_definitions: Vec<Record>,
    pub conditional_access_policies: Vec<Record>,
    pub directory_role_assignments: Vec<Record>,
    pub group_memberships: Vec<Record>,
    pub oauth2_permission_grants: Vec<Record>,
    pub app_role_assignments: Vec<Record>,
}

impl AzureAdData {
    /// Number of records across every collection.
    #[must_use]
    pub fn total(&self) -> usize {
        [
            &self.users,
            &self.groups,
            &self.service_principals,
            &self.applications,
            &self.devices,
            &self.directory_roles,
            &self.role_definitions,
            &self.conditional_access_policies,
            &self.directory_role_assignments,
            &self.group_memberships,
            &self.oauth2_permission_grants,
            &self.app_role_assignments,
        ]
        .iter()
        .map(|c| c.len())
        .sum()
    }
}

/// One independent directory listing and the slot it fills.
#[derive(Clone, Copy)]
pub struct DirectoryListing {
    pub key: &'static str,
    pub path: &'static str,
    pub kind: EntityKind,
    slot: fn(&mut AzureAdData) -> &mut Vec<Record>,
}

impl DirectoryListing {
    fn project(&self, value: &Value) -> Option<Record> {
        match self.kind {
            EntityKind::OAuth2PermissionGrant => project_oauth2_grant(value),
            kind => project_directory_object(kind, value),
        }
    }
}

impl std::fmt::Debug for DirectoryListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryListing")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Listings with no dependency on another collection.
pub const INDEPENDENT_LISTINGS: [DirectoryListing; 9] = [
    DirectoryListing {
        key: "users",
        path: "/users",
        kind: EntityKind::User,
        slot: |d| &mut d.users,
    },
    DirectoryListing {
        key: "groups",
        path: "/groups",
        kind: EntityKind::Group,
        slot: |d| &mut d.groups,
    },
    DirectoryListing {
        key: "servicePrincipals",
        path: "/servicePrincipals",
        kind: EntityKind::ServicePrincipal,
        slot: |d| &mut d.service_principals,
    },
    DirectoryListing {
        key: "applications",
        path: "/applications",
        kind: EntityKind::Application,
        slot: |d| &mut d.applications,
    },
    DirectoryListing {
        key: "devices",
        path: "/devices",
        kind: EntityKind::Device,
        slot: |d| &mut d.devices,
    },
    DirectoryListing {
        key: "directoryRoles",
        path: "/directoryRoles",
        kind: EntityKind::DirectoryRole,
        slot: |d| &mut d.directory_roles,
    },
    DirectoryListing {
        key: "roleDefinitions",
        path: "/roleManagement/directory/roleDefinitions",
        kind: EntityKind::DirectoryRoleDefinition,
        slot: |d| &mut d.role_definitions,
    },
    DirectoryListing {
        key: "conditionalAccessPolicies",
        path: "/identity/conditionalAccess/policies",
        kind: EntityKind::ConditionalAccessPolicy,
        slot: |d| &mut d.conditional_access_policies,
    },
    DirectoryListing {
        key: "oauth2PermissionGrants",
        path: "/oauth2PermissionGrants",
        kind: EntityKind::OAuth2PermissionGrant,
        slot: |d| &mut d.oauth2_permission_grants,
    },
];

const ROLE_MEMBERS: FanOut = FanOut {
    tag: "members",
    path: |id| format!("/directoryRoles/{id}/members"),
};

const GROUP_MEMBERS: FanOut = FanOut {
    tag: "members",
    path: |id| format!("/groups/{id}/members"),
};

const APP_ROLE_ASSIGNED_TO: FanOut = FanOut {
    tag: "AppRoleAssignedTo",
    path: |id| format!("/servicePrincipals/{id}/appRoleAssignedTo"),
};

const APP_ROLE_ASSIGNMENTS: FanOut = FanOut {
    tag: "AppRoleAssignments",
    path: |id| format!("/servicePrincipals/{id}/appRoleAssignments"),
};

fn direction_for(fanout: &FanOut) -> AppRoleDirection {
    if fanout.tag == APP_ROLE_ASSIGNMENTS.tag {
        AppRoleDirection::AppRoleAssignments
    } else {
        AppRoleDirection::AppRoleAssignedTo
    }
}

/// Drives the directory listings and fan-outs.
#[derive(Debug)]
pub struct DirectoryStage<'a> {
    clients: &'a ClientFactory,
}

impl<'a> DirectoryStage<'a> {
    #[must_use]
    pub fn new(clients: &'a ClientFactory) -> Self {
        Self { clients }
    }

    /// Collects the `azure_ad` section.
    ///
    /// A failing collection leaves its slot empty.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Cancelled` if the run is cancelled.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> CollectorResult<AzureAdData> {
        let mut data = AzureAdData::default();

        let permits = Semaphore::new(self.clients.config().concurrency.directory_concurrency);
        let listings = INDEPENDENT_LISTINGS.iter().map(|listing| {
            let permits = &permits;
            async move {
                let result = match permits.acquire().await {
                    Ok(_permit) => self.read_listing(listing).await,
                    Err(_) => Err(CollectorError::Cancelled),
                };
                (listing, result)
            }
        });

        for (listing, result) in join_all(listings).await {
            match result {
                Ok(records) => *(listing.slot)(&mut data) = records,
                Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
                Err(e) => {
                    warn!(
                        collection = listing.key,
                        error = %e,
                        "Collection failed, leaving it empty"
                    );
                }
            }
        }

        let dispatcher = BatchDispatcher::new(
            self.clients.batch(),
            self.clients.graph(),
            self.clients.config(),
        );

        data.directory_role_assignments = dispatcher
            .dispatch(
                "directoryRoleAssignments",
                &data.directory_roles,
                &[ROLE_MEMBERS],
                |role: &Record, _, member| {
                    project_directory_role_assignment(role.as_directory_object()?, member)
                },
            )
            .await?;

        data.group_memberships = dispatcher
            .dispatch(
                "groupMemberships",
                &data.groups,
                &[GROUP_MEMBERS],
                |group: &Record, _, member| project_group_membership(&group.id(), member),
            )
            .await?;

        data.app_role_assignments = dispatcher
            .dispatch(
                "appRoleAssignments",
                &data.service_principals,
                &[APP_ROLE_ASSIGNED_TO, APP_ROLE_ASSIGNMENTS],
                |sp: &Record, fanout, value| {
                    project_app_role_assignment(&sp.id(), direction_for(fanout), value)
                },
            )
            .await?;

        info!(total = data.total(), "Directory collection complete");
        Ok(data)
    }

    async fn read_listing(&self, listing: &DirectoryListing) -> CollectorResult<Vec<Record>> {
        let graph = self.clients.graph();
        let timer = CollectionTimer::start(listing.key);
        let url = graph.list_url(listing.path, select_fields(listing.kind));
        let records = read_all(graph, listing.key, &url, |value| listing.project(value)).await?;
        timer.finish(records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_independent_listing_keys() {
        let keys: Vec<&str> = INDEPENDENT_LISTINGS.iter().map(|l| l.key).collect();
        assert_eq!(
            keys,
            vec![
                "users",
                "groups",
                "servicePrincipals",
                "applications",
                "devices",
                "directoryRoles",
                "roleDefinitions",
                "conditionalAccessPolicies",
                "oauth2PermissionGrants",
            ]
        );
    }

    #[test]
    fn test_azure_ad_keys() {
        let value = serde_json::to_value(AzureAdData::default()).unwrap();
        let mut keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "appRoleAssignments",
                "applications",
                "conditionalAccessPolicies",
                "devices",
                "directoryRoleAssignments",
                "directoryRoles",
                "groupMemberships",
                "groups",
                "oauth2PermissionGrants",
                "roleDefinitions",
                "servicePrincipals",
                "users",
            ]
        );
    }

    #[test]
    fn test_fanout_paths() {
        assert_eq!((ROLE_MEMBERS.path)("r1"), "/directoryRoles/r1/members");
        assert_eq!((GROUP_MEMBERS.path)("g1"), "/groups/g1/members");
        assert_eq!(
            (APP_ROLE_ASSIGNED_TO.path)("sp1"),
            "/servicePrincipals/sp1/appRoleAssignedTo"
        );
        assert_eq!(
            (APP_ROLE_ASSIGNMENTS.path)("sp1"),
            "/servicePrincipals/sp1/appRoleAssignments"
        );
        assert_eq!(direction_for(&APP_ROLE_ASSIGNMENTS), AppRoleDirection::AppRoleAssignments);
        assert_eq!(direction_for(&APP_ROLE_ASSIGNED_TO), AppRoleDirection::AppRoleAssignedTo);
    }

    #[test]
    fn test_listing_projection_dispatch() {
        let grants = &INDEPENDENT_LISTINGS[8];
        let record = grants
            .project(&json!({"id": "g1", "clientId": "c", "consentType": "AllPrincipals"}))
            .unwrap();
        assert_eq!(record.kind(), EntityKind::OAuth2PermissionGrant);

        let users = &INDEPENDENT_LISTINGS[0];
        assert_eq!(users.project(&json!({"id": "u1"})).unwrap().kind(), EntityKind::User);
        assert!(users.project(&json!({"displayName": "no id"})).is_none());
    }

    #[test]
    fn test_total_counts_every_slot() {
        let mut data = AzureAdData::default();
        let user = INDEPENDENT_LISTINGS[0].project(&json!({"id": "u1"})).unwrap();
        data.users.push(user.clone());
        data.group_memberships.push(user);
        assert_eq!(data.total(), 2);
    }
}
