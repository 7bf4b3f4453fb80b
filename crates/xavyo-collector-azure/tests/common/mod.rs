//! Common test utilities for xavyo-collector-azure integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_collector_azure::{
    AzureCloudEnvironment, AzureIamCollector, BatchPolicy, ClientFactory, CollectionDocument,
    CollectorConfig, CollectorConfigBuilder, CollectorResult, DocumentSink, RetryPolicy,
    StaticTokenSource,
};

pub const TENANT_ID: &str = "00000000-0000-0000-0000-00000000t001";

/// Priority for catch-all mocks so that test-specific mocks win.
const FALLBACK_PRIORITY: u8 = 10;

/// Test data factory for directory users.
pub fn create_test_user(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "displayName": format!("Test User {name}"),
        "userPrincipalName": format!("{name}@test.onmicrosoft.com"),
        "accountEnabled": true,
        "userType": "Member"
    })
}

/// Test data factory for directory groups.
pub fn create_test_group(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "displayName": name,
        "securityEnabled": true,
        "mailEnabled": false,
        "groupTypes": []
    })
}

/// A group member as returned by `/groups/{id}/members`.
pub fn create_member(id: &str) -> Value {
    json!({
        "@odata.type": "#microsoft.graph.user",
        "id": id,
        "displayName": format!("Member {id}")
    })
}

/// Wraps items in an OData response format.
pub fn create_odata_response(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    response
}

/// Wraps items in an ARM list response.
pub fn create_arm_response(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["nextLink"] = json!(link);
    }
    response
}

/// Wraps rows in a Resource Graph object-array response.
pub fn create_resource_graph_response(rows: Vec<Value>, skip_token: Option<&str>) -> Value {
    let mut response = json!({
        "totalRecords": rows.len(),
        "count": rows.len(),
        "resultTruncated": "false",
        "data": rows,
    });
    if let Some(token) = skip_token {
        response["$skipToken"] = json!(token);
    }
    response
}

/// Builds a `$batch` response from `(id, status, body)` triples.
pub fn create_batch_response(responses: Vec<(String, u16, Value)>) -> Value {
    let responses: Vec<Value> = responses
        .into_iter()
        .map(|(id, status, body)| {
            json!({
                "id": id,
                "status": status,
                "headers": {"Content-Type": "application/json"},
                "body": body,
            })
        })
        .collect();
    json!({ "responses": responses })
}

/// Creates an OData error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// An ARM role assignment at `scope`.
pub fn create_role_assignment(id: &str, scope: &str, principal_id: &str) -> Value {
    json!({
        "id": id,
        "name": id.rsplit('/').next().unwrap_or(id),
        "type": "Microsoft.Authorization/roleAssignments",
        "properties": {
            "scope": scope,
            "principalId": principal_id,
            "principalType": "User",
            "roleDefinitionId": "/providers/Microsoft.Authorization/roleDefinitions/reader"
        }
    })
}

/// A Resource Graph resource row.
pub fn create_resource_row(subscription_id: &str, name: &str) -> Value {
    json!({
        "id": format!("/subscriptions/{subscription_id}/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/{name}"),
        "name": name,
        "type": "microsoft.storage/storageaccounts",
        "location": "westeurope",
        "resourceGroup": "rg",
        "subscriptionId": subscription_id,
        "tags": {},
        "identity": null,
        "properties": {},
        "zones": null,
        "kind": "StorageV2",
        "sku": {"name": "Standard_LRS"},
        "plan": null
    })
}

/// A Resource Graph resource-group row.
pub fn create_resource_group_row(subscription_id: &str, name: &str) -> Value {
    json!({
        "id": format!("/subscriptions/{subscription_id}/resourceGroups/{name}"),
        "name": name,
        "type": "microsoft.resources/subscriptions/resourcegroups",
        "location": "westeurope",
        "subscriptionId": subscription_id,
        "tags": {},
        "properties": {"provisioningState": "Succeeded"}
    })
}

/// Builder with every endpoint at `uri` and short test delays.
pub fn test_config_builder(uri: &str) -> CollectorConfigBuilder {
    let batch = BatchPolicy {
        inter_batch_delay: Duration::from_millis(1),
        ..BatchPolicy::default()
    };
    CollectorConfig::builder()
        .cloud(AzureCloudEnvironment::Custom {
            login: uri.to_string(),
            graph: uri.to_string(),
            management: uri.to_string(),
        })
        .retry(RetryPolicy::for_testing())
        .batch(batch)
}

/// Collector configuration pointing every endpoint at `uri`.
pub fn test_config(uri: &str) -> CollectorConfig {
    test_config_builder(uri).build().expect("valid test config")
}

/// Collects documents handed to it.
#[derive(Debug, Default)]
pub struct CapturingSink {
    documents: Mutex<Vec<CollectionDocument>>,
}

impl CapturingSink {
    pub fn documents(&self) -> Vec<CollectionDocument> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for CapturingSink {
    async fn emit(&self, document: CollectionDocument) -> CollectorResult<()> {
        self.documents.lock().unwrap().push(document);
        Ok(())
    }
}

/// Mock server standing in for Graph, ARM and Resource Graph at once.
pub struct MockAzure {
    pub server: MockServer,
}

impl MockAzure {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn config(&self) -> CollectorConfig {
        test_config(&self.url())
    }

    pub fn collector(&self) -> AzureIamCollector {
        self.collector_with(self.config())
    }

    pub fn collector_with(&self, config: CollectorConfig) -> AzureIamCollector {
        AzureIamCollector::new(config, Arc::new(StaticTokenSource::new("mock-token")))
            .expect("collector")
    }

    pub fn client_factory(&self) -> ClientFactory {
        ClientFactory::new(
            self.config(),
            Arc::new(StaticTokenSource::new("mock-token")),
            tokio_util::sync::CancellationToken::new(),
        )
        .expect("client factory")
    }

    /// Mounts a single-page Graph listing at `/v1.0{graph_path}`.
    pub async fn mock_graph_list(&self, graph_path: &str, items: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/v1.0{graph_path}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(create_odata_response(items, None)),
            )
            .mount(&self.server)
            .await;
    }

    /// Mounts the subscription listing.
    pub async fn mock_subscriptions(&self, subscriptions: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_arm_response(subscriptions, None)),
            )
            .mount(&self.server)
            .await;
    }

    /// Mounts role assignments for one subscription.
    pub async fn mock_role_assignments(&self, subscription_id: &str, assignments: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleAssignments"
            )))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(create_arm_response(assignments, None)),
            )
            .mount(&self.server)
            .await;
    }

    /// Mounts a Resource Graph response for queries containing `marker`.
    pub async fn mock_resource_graph(&self, marker: &str, rows: Vec<Value>) {
        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .and(body_string_contains(marker))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_resource_graph_response(rows, None)),
            )
            .mount(&self.server)
            .await;
    }

    /// Mounts low-priority catch-alls: the organization, empty Graph and ARM
    /// listings, empty Resource Graph results and an empty `$batch` reply.
    pub async fn mock_empty_tenant(&self) {
        Mock::given(method("GET"))
            .and(path("/v1.0/organization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_odata_response(
                vec![json!({"id": TENANT_ID, "displayName": "Test Tenant"})],
                None,
            )))
            .with_priority(FALLBACK_PRIORITY)
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/v1\.0/.+"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(create_odata_response(vec![], None)),
            )
            .with_priority(FALLBACK_PRIORITY + 1)
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1.0/$batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_batch_response(vec![])))
            .with_priority(FALLBACK_PRIORITY)
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/(subscriptions|providers)(/.*)?$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(create_arm_response(vec![], None)),
            )
            .with_priority(FALLBACK_PRIORITY)
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(create_resource_graph_response(vec![], None)),
            )
            .with_priority(FALLBACK_PRIORITY)
            .mount(&self.server)
            .await;
    }
}
