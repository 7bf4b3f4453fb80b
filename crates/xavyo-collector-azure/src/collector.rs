//! Collection orchestrator.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::auth::TokenSource;
use crate::clients::ClientFactory;
use crate::config::CollectorConfig;
use crate::directory::DirectoryStage;
use crate::document::{CollectionDocument, CollectionMetadata};
use crate::management_groups::ManagementGroupStage;
use crate::pagination::read_all;
use crate::pim::PimStage;
use crate::resources::ResourceStage;
use crate::sink::DocumentSink;
use crate::{CollectorError, CollectorResult};

/// Subscription state that is eligible for collection.
const ENABLED_STATE: &str = "Enabled";

/// Returns true when the input asks for subscription discovery: an empty
/// list, or any entry equal to `all` ignoring case and surrounding spaces.
#[must_use]
pub fn wants_discovery(subscriptions: &[String]) -> bool {
    subscriptions.is_empty()
        || subscriptions
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case("all"))
}

/// Runs the directory, PIM, management-group and resource stages and
/// assembles one [`CollectionDocument`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use xavyo_collector_azure::{AzureCliCredential, AzureIamCollector, CollectorConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let collector = AzureIamCollector::new(
///     CollectorConfig::default(),
///     Arc::new(AzureCliCredential::new()),
/// )?;
/// let document = collector.collect(&["all".to_string()]).await?;
/// println!("{} objects", document.collection_metadata.data_summary.total_objects);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AzureIamCollector {
    clients: ClientFactory,
}

impl AzureIamCollector {
    /// Creates a collector with its own cancellation token.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Config` if the configuration is invalid.
    pub fn new(config: CollectorConfig, source: Arc<dyn TokenSource>) -> CollectorResult<Self> {
        Self::with_cancellation(config, source, CancellationToken::new())
    }

    /// Creates a collector that stops when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Config` if the configuration is invalid.
    pub fn with_cancellation(
        config: CollectorConfig,
        source: Arc<dyn TokenSource>,
        cancel: CancellationToken,
    ) -> CollectorResult<Self> {
        Ok(Self {
            clients: ClientFactory::new(config, source, cancel)?,
        })
    }

    #[must_use]
    pub fn clients(&self) -> &ClientFactory {
        &self.clients
    }

    /// Collects a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when credentials fail, the tenant id cannot be
    /// resolved, subscription discovery fails, or the run is cancelled.
    /// Failures inside a stage leave empty slots instead.
    #[instrument(skip(self, subscriptions), fields(requested = subscriptions.len()))]
    pub async fn collect(&self, subscriptions: &[String]) -> CollectorResult<CollectionDocument> {
        let started_at = Utc::now();
        let subscriptions = self.resolve_subscriptions(subscriptions).await?;
        let tenant_id = self.resolve_tenant_id().await?;
        info!(
            tenant_id = %tenant_id,
            subscriptions = subscriptions.len(),
            "Starting tenant collection"
        );

        let azure_ad = DirectoryStage::new(&self.clients).collect().await?;
        let pim = PimStage::new(&self.clients).collect().await?;
        let management_groups = ManagementGroupStage::new(&self.clients).collect().await?;
        let azure_resources = ResourceStage::new(&self.clients)
            .collect(&subscriptions)
            .await?;

        let mut document = CollectionDocument {
            collection_metadata: CollectionMetadata::new(
                tenant_id,
                started_at,
                subscriptions.len(),
            ),
            azure_ad,
            pim,
            management_groups,
            azure_resources,
        };
        let summary = document.summarize();

        info!(
            tenant_id = %document.collection_metadata.tenant_id,
            azure_ad = summary.total_azure_ad_objects,
            pim = summary.total_pim_objects,
            management_groups = summary.total_management_groups,
            azurerm = summary.total_azurerm_objects,
            total = summary.total_objects,
            "Collection summary"
        );
        Ok(document)
    }

    /// Collects a snapshot and hands it to `sink` exactly once.
    ///
    /// # Errors
    ///
    /// Returns any fatal collection error (nothing is emitted) or the sink's
    /// error.
    pub async fn run(
        &self,
        subscriptions: &[String],
        sink: &dyn DocumentSink,
    ) -> CollectorResult<()> {
        let document = self.collect(subscriptions).await?;
        sink.emit(document).await
    }

    /// Expands `all`/empty to the enabled subscriptions; otherwise keeps the
    /// given ids in order, dropping exact repeats.
    async fn resolve_subscriptions(&self, requested: &[String]) -> CollectorResult<Vec<String>> {
        if !wants_discovery(requested) {
            let mut resolved: Vec<String> = Vec::with_capacity(requested.len());
            for subscription in requested {
                if !resolved.contains(subscription) {
                    resolved.push(subscription.clone());
                }
            }
            return Ok(resolved);
        }

        let arm = self.clients.resource_manager();
        let discovered = read_all(arm, "subscriptions", &arm.subscriptions_url(), |value| {
            let id = value.get("subscriptionId").and_then(Value::as_str)?;
            let state = value.get("state").and_then(Value::as_str);
            if id.is_empty() || state != Some(ENABLED_STATE) {
                return None;
            }
            Some(id.to_string())
        })
        .await?;

        if discovered.is_empty() {
            warn!("Subscription discovery returned no enabled subscriptions");
        }
        info!(count = discovered.len(), "Discovered enabled subscriptions");
        Ok(discovered)
    }

    /// Reads the tenant id from `/organization`.
    async fn resolve_tenant_id(&self) -> CollectorResult<String> {
        let graph = self.clients.graph();
        let body = match graph.get_json(&graph.resolve("/organization")).await {
            Ok(body) => body,
            Err(e @ (CollectorError::Auth(_) | CollectorError::Cancelled)) => return Err(e),
            Err(e) => {
                return Err(CollectorError::TenantResolution(format!(
                    "organization lookup failed: {e}"
                )))
            }
        };

        body.get("value")
            .and_then(Value::as_array)
            .and_then(|orgs| orgs.first())
            .and_then(|org| org.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CollectorError::TenantResolution("organization response has no id".to_string())
            })
    }
}
