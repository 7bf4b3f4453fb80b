//! Resource stage: cross-subscription queries, scope buckets and failures.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};
use xavyo_collector_azure::{classify_scope, Record, ScopeBucket};

#[tokio::test]
async fn test_one_query_per_kind_across_subscriptions() {
    let mock = MockAzure::new().await;

    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .and(body_string_contains("zones"))
        .and(body_string_contains("\"sub-1\",\"sub-2\",\"sub-3\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            create_resource_graph_response(
                vec![
                    create_resource_row("sub-1", "sa1"),
                    create_resource_row("sub-2", "sa2"),
                    create_resource_row("SUB-2", "sa3"),
                    create_resource_row("sub-9", "stray"),
                ],
                None,
            ),
        ))
        .expect(1)
        .mount(&mock.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .and(body_string_contains("resourcecontainers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            create_resource_graph_response(
                vec![
                    create_resource_group_row("sub-1", "rg-a"),
                    create_resource_group_row("sub-3", "rg-b"),
                ],
                None,
            ),
        ))
        .expect(1)
        .mount(&mock.server)
        .await;

    mock.mock_empty_tenant().await;

    let subscriptions = vec!["sub-1".to_string(), "sub-2".to_string(), "sub-3".to_string()];
    let document = mock.collector().collect(&subscriptions).await.unwrap();
    let resources = &document.azure_resources;

    assert_eq!(resources.len(), 3);
    for (subscription, data) in resources {
        for record in data.azure_resources.iter().chain(&data.azure_resource_groups) {
            let row = record.as_resource_row().unwrap();
            assert!(row.subscription_id().unwrap().eq_ignore_ascii_case(subscription));
        }
    }
    assert_eq!(resources["sub-1"].azure_resources.len(), 1);
    assert_eq!(resources["sub-1"].azure_resource_groups.len(), 1);
    assert_eq!(resources["sub-2"].azure_resources.len(), 2);
    assert!(resources["sub-2"].azure_resource_groups.is_empty());
    assert!(resources["sub-3"].azure_resources.is_empty());
    assert_eq!(resources["sub-3"].azure_resource_groups.len(), 1);
    assert!(!resources.contains_key("sub-9"));
}

#[tokio::test]
async fn test_role_assignments_classified_by_scope() {
    let mock = MockAzure::new().await;
    let scopes = [
        "/",
        "/providers/Microsoft.Management/managementGroups/mg1",
        "/subscriptions/s1",
        "/subscriptions/s1/resourceGroups/rg1",
        "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
    ];
    let assignments = scopes
        .iter()
        .enumerate()
        .map(|(i, scope)| {
            create_role_assignment(
                &format!("/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments/ra{i}"),
                scope,
                &format!("p{i}"),
            )
        })
        .collect();
    mock.mock_role_assignments("s1", assignments).await;
    mock.mock_empty_tenant().await;

    let document = mock.collector().collect(&["s1".to_string()]).await.unwrap();
    let data = &document.azure_resources["s1"];

    let slots: [(&[Record], ScopeBucket); 5] = [
        (&data.tenant_role_assignments, ScopeBucket::Tenant),
        (&data.management_group_role_assignments, ScopeBucket::ManagementGroup),
        (&data.subscription_role_assignments, ScopeBucket::Subscription),
        (&data.resource_group_role_assignments, ScopeBucket::ResourceGroup),
        (&data.resource_level_role_assignments, ScopeBucket::Resource),
    ];

    let mut seen = std::collections::HashSet::new();
    for (records, bucket) in slots {
        assert_eq!(records.len(), 1, "bucket {bucket}");
        for record in records {
            let assignment = record.as_rm_role_assignment().unwrap();
            assert_eq!(assignment.scope_bucket, bucket);
            assert_eq!(classify_scope(assignment.scope.as_deref().unwrap()), bucket);
            assert!(seen.insert(record.id()), "record in two buckets");
        }
    }
    assert_eq!(seen.len(), 5);

    let wire = serde_json::to_value(&data.subscription_role_assignments[0]).unwrap();
    assert_eq!(wire["scopeBucket"], "subscription");
    assert_eq!(wire["principalType"], "User");
}

#[tokio::test]
async fn test_role_definitions_and_key_vault_policies() {
    let mock = MockAzure::new().await;

    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_arm_response(
            vec![json!({
                "id": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/reader",
                "name": "reader",
                "type": "Microsoft.Authorization/roleDefinitions",
                "properties": {
                    "roleName": "Reader",
                    "type": "BuiltInRole",
                    "description": "View all resources",
                    "permissions": [{
                        "actions": ["*/read"],
                        "notActions": [],
                        "dataActions": [],
                        "notDataActions": []
                    }]
                }
            })],
            None,
        )))
        .mount(&mock.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .and(body_string_contains("mvexpand"))
        .and(body_string_contains("where subscriptionId == 'sub-1'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            create_resource_graph_response(
                vec![
                    json!({
                        "id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1",
                        "name": "kv1",
                        "type": "microsoft.keyvault/vaults",
                        "subscriptionId": "sub-1",
                        "policy": {"objectId": "u1", "permissions": {"secrets": ["get"]}}
                    }),
                    json!({
                        "id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1",
                        "name": "kv1",
                        "type": "microsoft.keyvault/vaults",
                        "subscriptionId": "sub-1",
                        "policy": {"objectId": "u2", "permissions": {"keys": ["list"]}}
                    }),
                ],
                None,
            ),
        ))
        .expect(1)
        .mount(&mock.server)
        .await;

    mock.mock_empty_tenant().await;

    let document = mock.collector().collect(&["sub-1".to_string()]).await.unwrap();
    let data = &document.azure_resources["sub-1"];

    assert_eq!(data.key_vault_access_policies.len(), 2);
    let wire = serde_json::to_value(&data.azure_role_definitions).unwrap();
    assert_eq!(wire[0]["roleName"], "Reader");
    assert_eq!(wire[0]["roleType"], "BuiltInRole");
    assert_eq!(wire[0]["permissions"][0]["actions"], json!(["*/read"]));
}

#[tokio::test]
async fn test_failed_subscription_is_omitted() {
    let mock = MockAzure::new().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/subscriptions/sub-bad/providers/Microsoft\.Authorization/.*$"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": "AuthorizationFailed", "message": "no access"}
        })))
        .mount(&mock.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .and(body_string_contains("'sub-bad'"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": "AuthorizationFailed", "message": "no access"}
        })))
        .mount(&mock.server)
        .await;

    mock.mock_empty_tenant().await;

    let document = mock
        .collector()
        .collect(&["sub-good".to_string(), "sub-bad".to_string()])
        .await
        .unwrap();

    assert!(document.azure_resources.contains_key("sub-good"));
    assert!(!document.azure_resources.contains_key("sub-bad"));
    assert_eq!(document.collection_metadata.subscriptions_processed, 2);
}

#[tokio::test]
async fn test_transient_throttle_is_retried() {
    let mock = MockAzure::new().await;

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub-1/providers/Microsoft.Authorization/roleAssignments"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "1")
                .set_body_json(json!({
                    "error": {"code": "TooManyRequests", "message": "throttled"}
                })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock.server)
        .await;
    mock.mock_role_assignments(
        "sub-1",
        vec![create_role_assignment("ra1", "/subscriptions/sub-1", "u1")],
    )
    .await;
    mock.mock_empty_tenant().await;

    let document = mock.collector().collect(&["sub-1".to_string()]).await.unwrap();

    let data = &document.azure_resources["sub-1"];
    assert_eq!(data.subscription_role_assignments.len(), 1);
}
