//! Azure Resource Manager and Resource Graph client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::auth::TokenCache;
use crate::clients::send_with_retry;
use crate::config::CollectorConfig;
use crate::pagination::{Page, PageSource};
use crate::{CollectorError, CollectorResult};

pub const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
pub const MANAGEMENT_GROUPS_API_VERSION: &str = "2021-04-01";
pub const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
pub const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";

/// ARM error envelope.
#[derive(Debug, Deserialize)]
struct ArmError {
    error: ArmErrorBody,
}

#[derive(Debug, Deserialize)]
struct ArmErrorBody {
    code: String,
    message: String,
}

fn arm_error(status: reqwest::StatusCode, body: &str) -> CollectorError {
    match serde_json::from_str::<ArmError>(body) {
        Ok(parsed) => CollectorError::ResourceManager {
            status: status.as_u16(),
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => CollectorError::ResourceManager {
            status: status.as_u16(),
            code: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: body.to_string(),
        },
    }
}

/// Resource Graph query request body.
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    subscriptions: &'a [String],
    query: &'a str,
    options: QueryOptions<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryOptions<'a> {
    result_format: &'static str,
    #[serde(rename = "$skipToken", skip_serializing_if = "Option::is_none")]
    skip_token: Option<&'a str>,
}

/// Resource Graph query response (object-array format).
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Value,
    #[serde(rename = "$skipToken")]
    skip_token: Option<String>,
}

/// Resource Manager client covering subscriptions, management groups,
/// authorization and Resource Graph.
#[derive(Debug)]
pub struct ResourceManagerClient {
    http_client: reqwest::Client,
    tokens: Arc<TokenCache>,
    config: Arc<CollectorConfig>,
    cancel: CancellationToken,
}

impl ResourceManagerClient {
    /// Creates a new Resource Manager client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        config: Arc<CollectorConfig>,
        tokens: Arc<TokenCache>,
        cancel: CancellationToken,
    ) -> CollectorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CollectorError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            tokens,
            config,
            cancel,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.config.cloud.management_endpoint()
    }

    #[must_use]
    pub fn subscriptions_url(&self) -> String {
        format!(
            "{}/subscriptions?api-version={SUBSCRIPTIONS_API_VERSION}",
            self.base_url()
        )
    }

    #[must_use]
    pub fn management_groups_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.Management/managementGroups?api-version={MANAGEMENT_GROUPS_API_VERSION}",
            self.base_url()
        )
    }

    /// Role definitions visible at `/subscriptions/{id}`.
    #[must_use]
    pub fn role_definitions_url(&self, subscription_id: &str) -> String {
        format!(
            "{}/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions?api-version={AUTHORIZATION_API_VERSION}",
            self.base_url(),
            urlencoding::encode(subscription_id)
        )
    }

    /// Role assignments for a subscription, including inherited ones.
    #[must_use]
    pub fn role_assignments_url(&self, subscription_id: &str) -> String {
        format!(
            "{}/subscriptions/{}/providers/Microsoft.Authorization/roleAssignments?api-version={AUTHORIZATION_API_VERSION}",
            self.base_url(),
            urlencoding::encode(subscription_id)
        )
    }

    #[must_use]
    pub fn resource_graph_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={RESOURCE_GRAPH_API_VERSION}",
            self.base_url()
        )
    }

    fn resolve(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("https://") || path_or_url.starts_with("http://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url(), path_or_url)
        }
    }

    async fn send<B>(&self, build: B) -> CollectorResult<Value>
    where
        B: Fn() -> reqwest::RequestBuilder,
    {
        send_with_retry(
            "resource_manager",
            &self.tokens,
            &self.config.cloud.management_scope(),
            &self.config.retry,
            &self.cancel,
            build,
            arm_error,
        )
        .await
    }

    /// Performs a GET request with bearer token injection.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::ResourceManager` for non-success responses
    /// once retries are spent.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> CollectorResult<Value> {
        let url = self.resolve(url);
        self.send(|| self.http_client.get(&url)).await
    }

    /// Performs a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::ResourceManager` for non-success responses
    /// once retries are spent.
    #[instrument(skip(self, body))]
    pub async fn post_json<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> CollectorResult<Value> {
        let url = self.resolve(url);
        self.send(|| self.http_client.post(&url).json(body)).await
    }

    /// Runs a Resource Graph query over `subscriptions`, following
    /// `$skipToken` until exhausted.
    ///
    /// The first page's error propagates. A later page's error is logged and
    /// the rows gathered so far are returned.
    ///
    /// # Errors
    ///
    /// Returns the first page's error or `CollectorError::Cancelled`.
    #[instrument(
        skip(self, query, subscriptions),
        fields(subscription_count = subscriptions.len())
    )]
    pub async fn query_resource_graph(
        &self,
        collection: &str,
        query: &str,
        subscriptions: &[String],
    ) -> CollectorResult<Vec<Value>> {
        let url = self.resource_graph_url();
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;
        let mut page = 0usize;

        loop {
            let request = QueryRequest {
                subscriptions,
                query,
                options: QueryOptions {
                    result_format: "objectArray",
                    skip_token: skip_token.as_deref(),
                },
            };

            let body = match self.post_json(&url, &request).await {
                Ok(body) => body,
                Err(e) if page == 0 || e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(
                        collection = %collection,
                        page = page + 1,
                        error = %e,
                        "Resource Graph page failed, keeping {} rows",
                        rows.len()
                    );
                    break;
                }
            };
            page += 1;

            let response: QueryResponse = serde_json::from_value(body)?;
            match response.data {
                Value::Array(items) => rows.extend(items),
                Value::Null => {}
                other => {
                    return Err(CollectorError::Json(serde::de::Error::custom(format!(
                        "unexpected Resource Graph data shape: {other}"
                    ))))
                }
            }

            match response.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => break,
            }
        }

        debug!(
            collection = %collection,
            pages = page,
            item_count = rows.len(),
            "Resource Graph query complete"
        );
        Ok(rows)
    }
}

#[async_trait]
impl PageSource for ResourceManagerClient {
    async fn fetch_page(&self, url: &str) -> CollectorResult<Page> {
        let body = self.get_json(url).await?;
        Page::from_arm(body)
    }
}
