//! Records emitted into the consolidated document.
//!
//! Every record is a [`Record`] variant. The serialized form carries an
//! `entityKind` tag next to the wire-compatible attribute keys, so the
//! downstream importer can dispatch without guessing from field shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scope::ScopeBucket;

/// Entity kinds produced by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Group,
    ServicePrincipal,
    Application,
    Device,
    DirectoryRole,
    DirectoryRoleDefinition,
    ConditionalAccessPolicy,
    GroupMembership,
    DirectoryRoleAssignment,
    OAuth2PermissionGrant,
    AppRoleAssignment,
    PimSchedule,
    ManagementGroup,
    Resource,
    ResourceGroup,
    KeyVaultAccessPolicy,
    RmRoleAssignment,
    RmRoleDefinition,
}

/// A directory object: the id plus the projected attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryObject {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl DirectoryObject {
    /// Returns a string attribute, if present and a string.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// A Resource Graph row, kept as returned apart from the extracted id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ResourceRow {
    /// The row's `subscriptionId`, if any.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.attributes.get("subscriptionId").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    pub group_id: String,
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRoleAssignment {
    pub role_id: String,
    pub role_template_id: String,
    pub role_name: String,
    pub principal_id: String,
    pub principal_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2PermissionGrant {
    pub id: String,
    pub client_id: Option<String>,
    pub resource_id: Option<String>,
    pub principal_id: Option<String>,
    pub scope: Option<String>,
    pub consent_type: Option<String>,
}

/// Which side of a service principal an app role assignment was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppRoleDirection {
    /// `/servicePrincipals/{id}/appRoleAssignedTo`: principals granted roles on this SP.
    AppRoleAssignedTo,
    /// `/servicePrincipals/{id}/appRoleAssignments`: roles this SP holds elsewhere.
    AppRoleAssignments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAssignment {
    pub id: String,
    pub assignment_type: AppRoleDirection,
    pub service_on_sp_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_role_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
}

/// PIM schedule state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentState {
    Eligible,
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PimSchedule {
    pub id: String,
    pub principal_id: Option<String>,
    pub role_definition_id: Option<String>,
    pub directory_scope_id: Option<String>,
    pub status: Option<String>,
    pub created_date_time: Option<String>,
    pub member_type: Option<String>,
    pub assignment_state: AssignmentState,
    pub assignment_type: Option<String>,
    /// Any other `*Id` attributes, flattened from nested objects where needed.
    #[serde(flatten)]
    pub extra_ids: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementGroupProperties {
    pub display_name: Option<String>,
    pub tenant_id: Option<String>,
}

/// Management group with the hierarchy fields the importer expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementGroup {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub properties: ManagementGroupProperties,
    #[serde(rename = "ResourceType")]
    pub kind_label: String,
    #[serde(rename = "ParentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "HierarchyLevel")]
    pub hierarchy_level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RmRoleAssignment {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<String>,
    pub role_definition_id: Option<String>,
    pub scope: Option<String>,
    pub scope_bucket: ScopeBucket,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RmPermission {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub not_actions: Vec<String>,
    #[serde(default)]
    pub data_actions: Vec<String>,
    #[serde(default)]
    pub not_data_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RmRoleDefinition {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub role_name: Option<String>,
    pub role_type: Option<String>,
    pub description: Option<String>,
    pub permissions: Vec<RmPermission>,
}

/// One emitted record, tagged with its entity kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entityKind")]
pub enum Record {
    User(DirectoryObject),
    Group(DirectoryObject),
    ServicePrincipal(DirectoryObject),
    Application(DirectoryObject),
    Device(DirectoryObject),
    DirectoryRole(DirectoryObject),
    DirectoryRoleDefinition(DirectoryObject),
    ConditionalAccessPolicy(DirectoryObject),
    GroupMembership(GroupMembership),
    DirectoryRoleAssignment(DirectoryRoleAssignment),
    OAuth2PermissionGrant(OAuth2PermissionGrant),
    AppRoleAssignment(AppRoleAssignment),
    PimSchedule(PimSchedule),
    ManagementGroup(ManagementGroup),
    Resource(ResourceRow),
    ResourceGroup(ResourceRow),
    KeyVaultAccessPolicy(ResourceRow),
    RmRoleAssignment(RmRoleAssignment),
    RmRoleDefinition(RmRoleDefinition),
}

impl Record {
    /// Wraps a directory object in the variant for `kind`.
    ///
    /// Returns `None` for kinds that are not plain directory objects.
    #[must_use]
    pub fn directory_object(kind: EntityKind, object: DirectoryObject) -> Option<Self> {
        Some(match kind {
            EntityKind::User => Self::User(object),
            EntityKind::Group => Self::Group(object),
            EntityKind::ServicePrincipal => Self::ServicePrincipal(object),
            EntityKind::Application => Self::Application(object),
            EntityKind::Device => Self::Device(object),
            EntityKind::DirectoryRole => Self::DirectoryRole(object),
            EntityKind::DirectoryRoleDefinition => Self::DirectoryRoleDefinition(object),
            EntityKind::ConditionalAccessPolicy => Self::ConditionalAccessPolicy(object),
            _ => return None,
        })
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Group(_) => EntityKind::Group,
            Self::ServicePrincipal(_) => EntityKind::ServicePrincipal,
            Self::Application(_) => EntityKind::Application,
            Self::Device(_) => EntityKind::Device,
            Self::DirectoryRole(_) => EntityKind::DirectoryRole,
            Self::DirectoryRoleDefinition(_) => EntityKind::DirectoryRoleDefinition,
            Self::ConditionalAccessPolicy(_) => EntityKind::ConditionalAccessPolicy,
            Self::GroupMembership(_) => EntityKind::GroupMembership,
            Self::DirectoryRoleAssignment(_) => EntityKind::DirectoryRoleAssignment,
            Self::OAuth2PermissionGrant(_) => EntityKind::OAuth2PermissionGrant,
            Self::AppRoleAssignment(_) => EntityKind::AppRoleAssignment,
            Self::PimSchedule(_) => EntityKind::PimSchedule,
            Self::ManagementGroup(_) => EntityKind::ManagementGroup,
            Self::Resource(_) => EntityKind::Resource,
            Self::ResourceGroup(_) => EntityKind::ResourceGroup,
            Self::KeyVaultAccessPolicy(_) => EntityKind::KeyVaultAccessPolicy,
            Self::RmRoleAssignment(_) => EntityKind::RmRoleAssignment,
            Self::RmRoleDefinition(_) => EntityKind::RmRoleDefinition,
        }
    }

    /// Record identity. Relationship records without their own id use a
    /// composite of the two endpoints.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::User(o)
            | Self::Group(o)
            | Self::ServicePrincipal(o)
            | Self::Application(o)
            | Self::Device(o)
            | Self::DirectoryRole(o)
            | Self::DirectoryRoleDefinition(o)
            | Self::ConditionalAccessPolicy(o) => o.id.clone(),
            Self::GroupMembership(m) => format!("{}:{}", m.group_id, m.member_id),
            Self::DirectoryRoleAssignment(a) => format!("{}:{}", a.role_id, a.principal_id),
            Self::OAuth2PermissionGrant(g) => g.id.clone(),
            // The same assignment can be read from both directions.
            Self::AppRoleAssignment(a) => format!(
                "{}:{:?}:{}",
                a.service_on_sp_id, a.assignment_type, a.id
            ),
            Self::PimSchedule(s) => s.id.clone(),
            Self::ManagementGroup(g) => g.id.clone(),
            Self::Resource(r) | Self::ResourceGroup(r) => r.id.clone(),
            Self::KeyVaultAccessPolicy(r) => {
                // mvexpand repeats the vault id once per policy.
                match r.attributes.get("policy") {
                    Some(policy) => format!("{}#{}", r.id, policy),
                    None => r.id.clone(),
                }
            }
            Self::RmRoleAssignment(a) => a.id.clone(),
            Self::RmRoleDefinition(d) => d.id.clone(),
        }
    }

    /// Returns the inner directory object for directory-object variants.
    #[must_use]
    pub fn as_directory_object(&self) -> Option<&DirectoryObject> {
        match self {
            Self::User(o)
            | Self::Group(o)
            | Self::ServicePrincipal(o)
            | Self::Application(o)
            | Self::Device(o)
            | Self::DirectoryRole(o)
            | Self::DirectoryRoleDefinition(o)
            | Self::ConditionalAccessPolicy(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the inner role assignment for `RmRoleAssignment`.
    #[must_use]
    pub fn as_rm_role_assignment(&self) -> Option<&RmRoleAssignment> {
        match self {
            Self::RmRoleAssignment(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the inner row for Resource Graph variants.
    #[must_use]
    pub fn as_resource_row(&self) -> Option<&ResourceRow> {
        match self {
            Self::Resource(r) | Self::ResourceGroup(r) | Self::KeyVaultAccessPolicy(r) => Some(r),
            _ => None,
        }
    }
}
