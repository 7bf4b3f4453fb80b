//! Projection of raw Graph / ARM entities into [`Record`]s.
//!
//! Every projection drops entities without a non-empty id. Missing optional
//! attributes become `null` so each kind always carries the same key set.

use serde_json::{json, Map, Value};

use crate::model::{
    AppRoleAssignment, AppRoleDirection, AssignmentState, DirectoryObject, DirectoryRoleAssignment,
    EntityKind, GroupMembership, ManagementGroup, ManagementGroupProperties, OAuth2PermissionGrant,
    PimSchedule, Record, ResourceRow, RmPermission, RmRoleAssignment, RmRoleDefinition,
};
use crate::scope::classify_scope;

/// Principal type used when a member comes back without `@odata.type`.
pub const DEFAULT_PRINCIPAL_TYPE: &str = "#microsoft.graph.directoryObject";

const MANAGEMENT_GROUP_TYPE: &str = "microsoft.management/managementgroups";

const USER_FIELDS: &[&str] = &[
    "displayName",
    "userPrincipalName",
    "mail",
    "jobTitle",
    "department",
    "accountEnabled",
    "userType",
    "createdDateTime",
    "businessPhones",
    "givenName",
    "surname",
    "mobilePhone",
    "officeLocation",
    "preferredLanguage",
];

const GROUP_FIELDS: &[&str] = &[
    "displayName",
    "description",
    "groupTypes",
    "membershipRule",
    "mailEnabled",
    "securityEnabled",
    "createdDateTime",
];

const SERVICE_PRINCIPAL_FIELDS: &[&str] = &[
    "appId",
    "displayName",
    "servicePrincipalType",
    "accountEnabled",
    "replyUrls",
    "signInAudience",
];

const APPLICATION_FIELDS: &[&str] = &["displayName", "appId", "createdDateTime", "signInAudience"];

const DEVICE_FIELDS: &[&str] = &[
    "displayName",
    "deviceId",
    "operatingSystem",
    "operatingSystemVersion",
    "isCompliant",
    "isManaged",
    "accountEnabled",
];

const DIRECTORY_ROLE_FIELDS: &[&str] = &["displayName", "description", "roleTemplateId"];

const ROLE_DEFINITION_FIELDS: &[&str] = &[
    "displayName",
    "description",
    "isBuiltIn",
    "isEnabled",
    "templateId",
];

const CONDITIONAL_ACCESS_FIELDS: &[&str] = &[
    "displayName",
    "state",
    "createdDateTime",
    "modifiedDateTime",
];

/// `$select` clause for a directory object kind.
#[must_use]
pub fn select_fields(kind: EntityKind) -> Option<&'static str> {
    Some(match kind {
        EntityKind::User => {
            "id,displayName,userPrincipalName,mail,jobTitle,department,accountEnabled,userType,\
             createdDateTime,businessPhones,givenName,surname,mobilePhone,officeLocation,\
             preferredLanguage"
        }
        EntityKind::Group => {
            "id,displayName,description,groupTypes,membershipRule,mailEnabled,securityEnabled,\
             createdDateTime"
        }
        EntityKind::ServicePrincipal => {
            "id,appId,displayName,servicePrincipalType,accountEnabled,replyUrls,signInAudience"
        }
        EntityKind::Application => "id,displayName,appId,createdDateTime,signInAudience,web",
        EntityKind::Device => {
            "id,displayName,deviceId,operatingSystem,operatingSystemVersion,isCompliant,isManaged,\
             accountEnabled,registrationDateTime"
        }
        EntityKind::DirectoryRole => "id,displayName,description,roleTemplateId",
        EntityKind::DirectoryRoleDefinition => {
            "id,displayName,description,isBuiltIn,isEnabled,templateId,rolePermissions"
        }
        EntityKind::ConditionalAccessPolicy => {
            "id,displayName,state,createdDateTime,modifiedDateTime"
        }
        EntityKind::OAuth2PermissionGrant => "id,clientId,resourceId,principalId,scope,consentType",
        _ => return None,
    })
}

fn copied_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::User => USER_FIELDS,
        EntityKind::Group => GROUP_FIELDS,
        EntityKind::ServicePrincipal => SERVICE_PRINCIPAL_FIELDS,
        EntityKind::Application => APPLICATION_FIELDS,
        EntityKind::Device => DEVICE_FIELDS,
        EntityKind::DirectoryRole => DIRECTORY_ROLE_FIELDS,
        EntityKind::DirectoryRoleDefinition => ROLE_DEFINITION_FIELDS,
        EntityKind::ConditionalAccessPolicy => CONDITIONAL_ACCESS_FIELDS,
        _ => &[],
    }
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Projects a directory object of `kind` (users, groups, ...).
#[must_use]
pub fn project_directory_object(kind: EntityKind, value: &Value) -> Option<Record> {
    let id = non_empty_str(value, "id")?;
    let mut attributes = Map::new();
    for field in copied_fields(kind) {
        attributes.insert(
            (*field).to_string(),
            value.get(*field).cloned().unwrap_or(Value::Null),
        );
    }

    match kind {
        EntityKind::Application => {
            let reply_urls = value
                .pointer("/web/redirectUris")
                .cloned()
                .unwrap_or_else(|| json!([]));
            attributes.insert("replyUrls".to_string(), reply_urls);
        }
        EntityKind::Device => {
            attributes.insert(
                "createdDateTime".to_string(),
                value.get("registrationDateTime").cloned().unwrap_or(Value::Null),
            );
        }
        EntityKind::DirectoryRoleDefinition => {
            let permissions: Vec<Value> = value
                .get("rolePermissions")
                .and_then(Value::as_array)
                .map(|perms| {
                    perms
                        .iter()
                        .map(|p| {
                            json!({
                                "allowedResourceActions": string_list(p.get("allowedResourceActions")),
                                "condition": p.get("condition").cloned().unwrap_or(Value::Null),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            attributes.insert("rolePermissions".to_string(), Value::Array(permissions));
        }
        _ => {}
    }

    Record::directory_object(kind, DirectoryObject { id, attributes })
}

#[must_use]
pub fn project_oauth2_grant(value: &Value) -> Option<Record> {
    Some(Record::OAuth2PermissionGrant(OAuth2PermissionGrant {
        id: non_empty_str(value, "id")?,
        client_id: opt_str(value, "clientId"),
        resource_id: opt_str(value, "resourceId"),
        principal_id: opt_str(value, "principalId"),
        scope: opt_str(value, "scope"),
        consent_type: opt_str(value, "consentType"),
    }))
}

/// Projects one member of `/groups/{id}/members`.
#[must_use]
pub fn project_group_membership(group_id: &str, member: &Value) -> Option<Record> {
    Some(Record::GroupMembership(GroupMembership {
        group_id: group_id.to_string(),
        member_id: non_empty_str(member, "id")?,
        member_type: opt_str(member, "@odata.type"),
    }))
}

/// Projects one member of `/directoryRoles/{id}/members` against its role.
#[must_use]
pub fn project_directory_role_assignment(role: &DirectoryObject, member: &Value) -> Option<Record> {
    Some(Record::DirectoryRoleAssignment(DirectoryRoleAssignment {
        role_id: role.id.clone(),
        role_template_id: role.attr_str("roleTemplateId").unwrap_or_default().to_string(),
        role_name: role.attr_str("displayName").unwrap_or_default().to_string(),
        principal_id: non_empty_str(member, "id")?,
        principal_type: opt_str(member, "@odata.type")
            .unwrap_or_else(|| DEFAULT_PRINCIPAL_TYPE.to_string()),
    }))
}

/// Projects an app role assignment read from service principal `sp_id`.
#[must_use]
pub fn project_app_role_assignment(
    sp_id: &str,
    direction: AppRoleDirection,
    value: &Value,
) -> Option<Record> {
    Some(Record::AppRoleAssignment(AppRoleAssignment {
        id: non_empty_str(value, "id")?,
        assignment_type: direction,
        service_on_sp_id: sp_id.to_string(),
        principal_id: opt_str(value, "principalId"),
        principal_type: opt_str(value, "principalType"),
        principal_display_name: opt_str(value, "principalDisplayName"),
        resource_id: opt_str(value, "resourceId"),
        resource_display_name: opt_str(value, "resourceDisplayName"),
        app_role_id: opt_str(value, "appRoleId"),
        created_date_time: opt_str(value, "createdDateTime"),
    }))
}

const PIM_KNOWN_KEYS: &[&str] = &[
    "id",
    "principalId",
    "roleDefinitionId",
    "directoryScopeId",
    "status",
    "createdDateTime",
    "memberType",
    "assignmentType",
];

/// Projects a PIM eligibility or assignment schedule.
///
/// Nested objects with an `id` (`principal`, `roleDefinition`, ...) are
/// flattened to `<name>Id` when the flat key is absent, and any other
/// top-level `*Id` attribute is carried through.
#[must_use]
pub fn project_pim_schedule(state: AssignmentState, value: &Value) -> Option<Record> {
    let id = non_empty_str(value, "id")?;
    let object = value.as_object()?;

    let mut flat: Map<String, Value> = Map::new();
    for (key, field) in object {
        if key.ends_with("Id") && !field.is_object() && !field.is_array() {
            flat.insert(key.clone(), field.clone());
        }
    }
    for (key, field) in object {
        if let Some(nested_id) = field.get("id").and_then(Value::as_str) {
            let flat_key = format!("{key}Id");
            flat.entry(flat_key)
                .or_insert_with(|| Value::String(nested_id.to_string()));
        }
    }

    let mut take = |key: &str| flat.remove(key).and_then(|v| v.as_str().map(str::to_string));
    let principal_id = take("principalId");
    let role_definition_id = take("roleDefinitionId");
    let directory_scope_id = take("directoryScopeId");

    let assignment_type = match state {
        AssignmentState::Eligible => Some("Eligible".to_string()),
        AssignmentState::Active => opt_str(value, "assignmentType"),
    };

    for key in PIM_KNOWN_KEYS {
        flat.remove(*key);
    }

    Some(Record::PimSchedule(PimSchedule {
        id,
        principal_id,
        role_definition_id,
        directory_scope_id,
        status: opt_str(value, "status"),
        created_date_time: opt_str(value, "createdDateTime"),
        member_type: opt_str(value, "memberType"),
        assignment_state: state,
        assignment_type,
        extra_ids: flat,
    }))
}

/// Projects an ARM management group. Hierarchy fields start unset.
#[must_use]
pub fn project_management_group(value: &Value) -> Option<Record> {
    let properties = value.get("properties").cloned().unwrap_or(Value::Null);
    Some(Record::ManagementGroup(ManagementGroup {
        id: non_empty_str(value, "id")?,
        name: opt_str(value, "name"),
        resource_type: MANAGEMENT_GROUP_TYPE.to_string(),
        properties: ManagementGroupProperties {
            display_name: opt_str(&properties, "displayName"),
            tenant_id: opt_str(&properties, "tenantId"),
        },
        kind_label: "ManagementGroup".to_string(),
        parent_id: None,
        hierarchy_level: 0,
    }))
}

/// Projects an ARM role assignment and classifies its scope.
#[must_use]
pub fn project_rm_role_assignment(value: &Value) -> Option<Record> {
    let id = non_empty_str(value, "id")?;
    let properties = value.get("properties")?;
    let scope = opt_str(properties, "scope");
    let scope_bucket = classify_scope(scope.as_deref().unwrap_or_default());
    Some(Record::RmRoleAssignment(RmRoleAssignment {
        id,
        name: opt_str(value, "name"),
        resource_type: opt_str(value, "type"),
        principal_id: opt_str(properties, "principalId"),
        principal_type: opt_str(properties, "principalType"),
        role_definition_id: opt_str(properties, "roleDefinitionId"),
        scope,
        scope_bucket,
    }))
}

/// Projects an ARM role definition with its permission blocks.
#[must_use]
pub fn project_rm_role_definition(value: &Value) -> Option<Record> {
    let id = non_empty_str(value, "id")?;
    let properties = value.get("properties")?;
    let permissions = properties
        .get("permissions")
        .and_then(Value::as_array)
        .map(|perms| {
            perms
                .iter()
                .filter(|p| p.is_object())
                .map(|p| RmPermission {
                    actions: string_list(p.get("actions")),
                    not_actions: string_list(p.get("notActions")),
                    data_actions: string_list(p.get("dataActions")),
                    not_data_actions: string_list(p.get("notDataActions")),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Record::RmRoleDefinition(RmRoleDefinition {
        id,
        name: opt_str(value, "name"),
        resource_type: opt_str(value, "type"),
        role_name: opt_str(properties, "roleName"),
        role_type: opt_str(properties, "type").or_else(|| opt_str(properties, "roleType")),
        description: opt_str(properties, "description"),
        permissions,
    }))
}

/// Projects a Resource Graph row as `kind` (resource, resource group or
/// expanded Key Vault access policy).
#[must_use]
pub fn project_resource_row(kind: EntityKind, value: &Value) -> Option<Record> {
    let id = non_empty_str(value, "id")?;
    let mut attributes = value.as_object()?.clone();
    attributes.remove("id");
    let row = ResourceRow { id, attributes };
    match kind {
        EntityKind::Resource => Some(Record::Resource(row)),
        EntityKind::ResourceGroup => Some(Record::ResourceGroup(row)),
        EntityKind::KeyVaultAccessPolicy => Some(Record::KeyVaultAccessPolicy(row)),
        _ => None,
    }
}
