//! Microsoft Graph v1.0 read client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::auth::TokenCache;
use crate::clients::send_with_retry;
use crate::config::CollectorConfig;
use crate::pagination::{Page, PageSource};
use crate::{CollectorError, CollectorResult};

/// Graph API version used for every call.
pub const GRAPH_API_VERSION: &str = "v1.0";

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

/// `OData` error body.
#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "innerError")]
    pub inner_error: Option<Value>,
}

impl ODataError {
    /// Converts an error response body into a `CollectorError::GraphApi`.
    pub(crate) fn into_collector_error(status: reqwest::StatusCode, body: &str) -> CollectorError {
        match serde_json::from_str::<ODataError>(body) {
            Ok(odata) => CollectorError::GraphApi {
                code: odata.error.code,
                message: odata.error.message,
                inner_error: odata.error.inner_error.map(|v| v.to_string()),
            },
            Err(_) => CollectorError::GraphApi {
                code: status.as_u16().to_string(),
                message: body.to_string(),
                inner_error: None,
            },
        }
    }
}

/// Microsoft Graph API client.
///
/// Every read goes through the configured `RetryPolicy`.
#[derive(Debug)]
pub struct GraphClient {
    http_client: reqwest::Client,
    tokens: Arc<TokenCache>,
    config: Arc<CollectorConfig>,
    cancel: CancellationToken,
}

impl GraphClient {
    /// Creates a new Graph client.
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

    /// Returns the base URL for Graph API requests.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.config.cloud.graph_endpoint(), GRAPH_API_VERSION)
    }

    /// Resolves a relative path (`/users`) or passes an absolute URL through.
    #[must_use]
    pub fn resolve(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("https://") || path_or_url.starts_with("http://") {
            return path_or_url.to_string();
        }
        if path_or_url.starts_with('/') {
            format!("{}{}", self.base_url(), path_or_url)
        } else {
            format!("{}/{}", self.base_url(), path_or_url)
        }
    }

    /// Builds a listing URL with `$select` and the configured `$top`.
    #[must_use]
    pub fn list_url(&self, path: &str, select: Option<&str>) -> String {
        let mut params = Vec::new();
        if let Some(select) = select {
            params.push(format!("$select={}", urlencoding::encode(select)));
        }
        if let Some(top) = self.config.page_size {
            params.push(format!("$top={top}"));
        }
        let url = self.resolve(path);
        if params.is_empty() {
            url
        } else {
            format!("{url}?{}", params.join("&"))
        }
    }

    /// Performs a GET request with bearer token injection.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::GraphApi` for non-success responses once
    /// retries are spent, `CollectorError::Http` for transport failures and
    /// `CollectorError::Cancelled` when the run is cancelled.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> CollectorResult<Value> {
        let url = self.resolve(url);
        send_with_retry(
            "graph",
            &self.tokens,
            &self.config.cloud.graph_scope(),
            &self.config.retry,
            &self.cancel,
            || self.http_client.get(&url),
            ODataError::into_collector_error,
        )
        .await
    }
}

#[async_trait]
impl PageSource for GraphClient {
    async fn fetch_page(&self, url: &str) -> CollectorResult<Page> {
        let body = self.get_json(url).await?;
        Page::from_odata(body)
    }
}
