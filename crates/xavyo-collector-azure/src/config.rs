//! Collector configuration: cloud endpoints and the throttling policy knobs.

use std::str::FromStr;
use std::time::Duration;

use crate::{CollectorError, CollectorResult};

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str =
    concat!("xavyo-azure-iam-collector/", env!("CARGO_PKG_VERSION"));

/// Resource Graph accepts at most this many subscriptions per query.
pub const RESOURCE_GRAPH_MAX_SUBSCRIPTIONS: usize = 1000;

/// Microsoft Graph refuses `$batch` envelopes with more sub-requests than this.
pub const GRAPH_BATCH_REQUEST_LIMIT: usize = 20;

/// Azure cloud environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AzureCloudEnvironment {
    /// Azure public cloud.
    #[default]
    Commercial,
    /// Azure US Government (GCC-High / DoD).
    UsGovernment,
    /// Azure China (21Vianet).
    China,
    /// Explicit endpoints, mostly useful against mock servers.
    Custom {
        login: String,
        graph: String,
        management: String,
    },
}

impl AzureCloudEnvironment {
    /// Returns the login (token issuer) endpoint.
    #[must_use]
    pub fn login_endpoint(&self) -> &str {
        match self {
            Self::Commercial => "https://login.microsoftonline.com",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Custom { login, .. } => login.trim_end_matches('/'),
        }
    }

    /// Returns the Microsoft Graph endpoint.
    #[must_use]
    pub fn graph_endpoint(&self) -> &str {
        match self {
            Self::Commercial => "https://graph.microsoft.com",
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
            Self::Custom { graph, .. } => graph.trim_end_matches('/'),
        }
    }

    /// Returns the Azure Resource Manager endpoint.
    #[must_use]
    pub fn management_endpoint(&self) -> &str {
        match self {
            Self::Commercial => "https://management.azure.com",
            Self::UsGovernment => "https://management.usgovcloudapi.net",
            Self::China => "https://management.chinacloudapi.cn",
            Self::Custom { management, .. } => management.trim_end_matches('/'),
        }
    }

    /// OAuth2 scope for Microsoft Graph.
    #[must_use]
    pub fn graph_scope(&self) -> String {
        format!("{}/.default", self.graph_endpoint())
    }

    /// OAuth2 scope for Azure Resource Manager.
    #[must_use]
    pub fn management_scope(&self) -> String {
        format!("{}/.default", self.management_endpoint())
    }
}

impl FromStr for AzureCloudEnvironment {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "commercial" | "public" | "azurecloud" => Ok(Self::Commercial),
            "usgovernment" | "usgov" | "azureusgovernment" => Ok(Self::UsGovernment),
            "china" | "azurechinacloud" => Ok(Self::China),
            other => Err(CollectorError::Config(format!(
                "unknown cloud environment '{other}'"
            ))),
        }
    }
}

/// Concurrency knobs. Both defaults come from observed throttling behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    /// Parallel independent directory listings (default: 3).
    pub directory_concurrency: usize,
    /// Parallel per-subscription workers (default: 1).
    pub subscription_workers: usize,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            directory_concurrency: 3,
            subscription_workers: 1,
        }
    }
}

/// Graph `$batch` sizing and pacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Items per batch when each item issues one sub-request (default: 15).
    pub single_fanout_batch_size: usize,
    /// Items per batch when each item issues two sub-requests (default: 7).
    pub dual_fanout_batch_size: usize,
    /// Upper bound on sub-requests per envelope (default: 20).
    pub max_requests_per_batch: usize,
    /// Pause between consecutive batch POSTs (default: 100ms).
    pub inter_batch_delay: Duration,
    /// Timeout for a single batch POST (default: 120s).
    pub http_timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            single_fanout_batch_size: 15,
            dual_fanout_batch_size: 7,
            max_requests_per_batch: GRAPH_BATCH_REQUEST_LIMIT,
            inter_batch_delay: Duration::from_millis(100),
            http_timeout: Duration::from_secs(120),
        }
    }
}

impl BatchPolicy {
    /// Items per batch for a fan-out issuing `requests_per_item` sub-requests.
    #[must_use]
    pub fn items_per_batch(&self, requests_per_item: usize) -> usize {
        let configured = if requests_per_item <= 1 {
            self.single_fanout_batch_size
        } else {
            self.dual_fanout_batch_size
        };
        let ceiling = self.max_requests_per_batch / requests_per_item.max(1);
        configured.min(ceiling).max(1)
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.single_fanout_batch_size == 0 || self.dual_fanout_batch_size == 0 {
            return Err("batch sizes must be > 0".to_string());
        }
        if self.max_requests_per_batch == 0
            || self.max_requests_per_batch > GRAPH_BATCH_REQUEST_LIMIT
        {
            return Err(format!(
                "max_requests_per_batch must be in range [1, {GRAPH_BATCH_REQUEST_LIMIT}]"
            ));
        }
        if self.dual_fanout_batch_size * 2 > self.max_requests_per_batch {
            return Err("dual_fanout_batch_size * 2 must be <= max_requests_per_batch".to_string());
        }
        if self.http_timeout < Duration::from_secs(1) {
            return Err("http_timeout must be >= 1s".to_string());
        }
        Ok(())
    }
}

/// Retry policy for the batch HTTP path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Linear step added per attempt (default: 500ms).
    pub step_delay: Duration,
    /// Lower clamp for `Retry-After` (default: 1s).
    pub retry_after_min: Duration,
    /// Upper clamp for `Retry-After` (default: 60s).
    pub retry_after_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step_delay: Duration::from_millis(500),
            retry_after_min: Duration::from_secs(1),
            retry_after_max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy optimized for testing (shorter delays).
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            step_delay: Duration::from_millis(5),
            retry_after_min: Duration::from_millis(1),
            retry_after_max: Duration::from_millis(20),
        }
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.retry_after_max < self.retry_after_min {
            return Err("retry_after_max must be >= retry_after_min".to_string());
        }
        Ok(())
    }
}

/// Complete collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub cloud: AzureCloudEnvironment,
    pub concurrency: ConcurrencyPolicy,
    pub batch: BatchPolicy,
    pub retry: RetryPolicy,
    /// Optional `$top` for directory listings.
    pub page_size: Option<u32>,
    /// Subscriptions per cross-subscription Resource Graph query.
    pub resource_graph_subscription_chunk: usize,
    pub user_agent: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cloud: AzureCloudEnvironment::default(),
            concurrency: ConcurrencyPolicy::default(),
            batch: BatchPolicy::default(),
            retry: RetryPolicy::default(),
            page_size: None,
            resource_graph_subscription_chunk: RESOURCE_GRAPH_MAX_SUBSCRIPTIONS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CollectorConfig {
    /// Starts a builder with default values.
    #[must_use]
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Config` describing the first invalid field.
    pub fn validate(&self) -> CollectorResult<()> {
        if self.concurrency.directory_concurrency == 0 {
            return Err(CollectorError::Config(
                "directory_concurrency must be > 0".to_string(),
            ));
        }
        if self.concurrency.subscription_workers == 0 {
            return Err(CollectorError::Config(
                "subscription_workers must be > 0".to_string(),
            ));
        }
        self.batch.validate().map_err(CollectorError::Config)?;
        self.retry.validate().map_err(CollectorError::Config)?;
        if self.page_size == Some(0) || self.page_size.is_some_and(|p| p > 999) {
            return Err(CollectorError::Config(
                "page_size must be in range [1, 999]".to_string(),
            ));
        }
        if self.resource_graph_subscription_chunk == 0
            || self.resource_graph_subscription_chunk > RESOURCE_GRAPH_MAX_SUBSCRIPTIONS
        {
            return Err(CollectorError::Config(format!(
                "resource_graph_subscription_chunk must be in range [1, {RESOURCE_GRAPH_MAX_SUBSCRIPTIONS}]"
            )));
        }
        if let AzureCloudEnvironment::Custom {
            login,
            graph,
            management,
        } = &self.cloud
        {
            for endpoint in [login, graph, management] {
                url::Url::parse(endpoint)?;
            }
        }
        Ok(())
    }
}

/// Builder for [`CollectorConfig`].
#[derive(Debug, Default)]
pub struct CollectorConfigBuilder {
    config: CollectorConfig,
}

impl CollectorConfigBuilder {
    #[must_use]
    pub fn cloud(mut self, cloud: AzureCloudEnvironment) -> Self {
        self.config.cloud = cloud;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn directory_concurrency(mut self, permits: usize) -> Self {
        self.config.concurrency.directory_concurrency = permits;
        self
    }

    #[must_use]
    pub fn subscription_workers(mut self, workers: usize) -> Self {
        self.config.concurrency.subscription_workers = workers;
        self
    }

    #[must_use]
    pub fn batch(mut self, batch: BatchPolicy) -> Self {
        self.config.batch = batch;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn resource_graph_subscription_chunk(mut self, chunk: usize) -> Self {
        self.config.resource_graph_subscription_chunk = chunk;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Config` if validation fails.
    pub fn build(self) -> CollectorResult<CollectorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_throttling_policy() {
        let config = CollectorConfig::default();
        assert_eq!(config.concurrency.directory_concurrency, 3);
        assert_eq!(config.concurrency.subscription_workers, 1);
        assert_eq!(config.batch.single_fanout_batch_size, 15);
        assert_eq!(config.batch.dual_fanout_batch_size, 7);
        assert_eq!(config.batch.inter_batch_delay, Duration::from_millis(100));
        assert!(config.batch.http_timeout >= Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.resource_graph_subscription_chunk, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_items_per_batch_respects_request_limit() {
        let policy = BatchPolicy::default();
        assert_eq!(policy.items_per_batch(1), 15);
        assert_eq!(policy.items_per_batch(2), 7);

        let tight = BatchPolicy {
            max_requests_per_batch: 10,
            single_fanout_batch_size: 15,
            dual_fanout_batch_size: 5,
            ..BatchPolicy::default()
        };
        assert_eq!(tight.items_per_batch(1), 10);
        assert_eq!(tight.items_per_batch(2), 5);
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        let result = CollectorConfig::builder().subscription_workers(0).build();
        assert!(matches!(result, Err(CollectorError::Config(_))));

        let result = CollectorConfig::builder().directory_concurrency(0).build();
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_oversized_batch() {
        let result = CollectorConfig::builder()
            .batch(BatchPolicy {
                max_requests_per_batch: 25,
                ..BatchPolicy::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_custom_endpoint() {
        let result = CollectorConfig::builder()
            .cloud(AzureCloudEnvironment::Custom {
                login: "not a url".to_string(),
                graph: "http://localhost".to_string(),
                management: "http://localhost".to_string(),
            })
            .build();
        assert!(matches!(result, Err(CollectorError::Url(_))));
    }

    #[test]
    fn test_cloud_endpoints() {
        let env = AzureCloudEnvironment::Commercial;
        assert_eq!(env.graph_scope(), "https://graph.microsoft.com/.default");
        assert_eq!(
            env.management_scope(),
            "https://management.azure.com/.default"
        );

        let gov = AzureCloudEnvironment::UsGovernment;
        assert_eq!(gov.management_endpoint(), "https://management.usgovcloudapi.net");

        let custom = AzureCloudEnvironment::Custom {
            login: "http://127.0.0.1:9000/".to_string(),
            graph: "http://127.0.0.1:9000/".to_string(),
            management: "http://127.0.0.1:9000".to_string(),
        };
        assert_eq!(custom.graph_endpoint(), "http://127.0.0.1:9000");
        assert_eq!(custom.management_endpoint(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_cloud_from_str() {
        assert_eq!(
            "AzureUSGovernment".parse::<AzureCloudEnvironment>().unwrap(),
            AzureCloudEnvironment::UsGovernment
        );
        assert_eq!(
            "china".parse::<AzureCloudEnvironment>().unwrap(),
            AzureCloudEnvironment::China
        );
        assert!("mars".parse::<AzureCloudEnvironment>().is_err());
    }
}
