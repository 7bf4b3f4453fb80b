//! Client factory: one token cache shared by every wire client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::arm_client::ResourceManagerClient;
use crate::auth::{TokenCache, TokenSource};
use crate::batch::BatchClient;
use crate::config::{CollectorConfig, RetryPolicy};
use crate::graph_client::GraphClient;
use crate::retry::{is_retryable_status, parse_retry_after};
use crate::{CollectorError, CollectorResult};

/// Races `fut` against cancellation. Dropping the losing future aborts any
/// in-flight HTTP request it owns.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> CollectorResult<T>
where
    F: Future<Output = CollectorResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CollectorError::Cancelled),
        result = fut => result,
    }
}

/// Sleeps for `duration` unless cancelled first.
pub(crate) async fn cancellable_sleep(
    cancel: &CancellationToken,
    duration: Duration,
) -> CollectorResult<()> {
    cancellable(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

/// Sends one bearer-authenticated JSON call, retrying transport errors, 429
/// and 5xx under `policy`. `build` produces a fresh request per attempt and
/// `map_error` turns a failed response body into the API's error.
pub(crate) async fn send_with_retry<B, M>(
    api: &'static str,
    tokens: &TokenCache,
    scope: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    build: B,
    map_error: M,
) -> CollectorResult<Value>
where
    B: Fn() -> RequestBuilder,
    M: Fn(StatusCode, &str) -> CollectorError,
{
    let mut attempt: u32 = 0;

    loop {
        let token = cancellable(cancel, tokens.get_token(scope)).await?;
        let sent = cancellable(cancel, async {
            build()
                .bearer_auth(&token)
                .send()
                .await
                .map_err(CollectorError::from)
        })
        .await;

        let (failure, retry_after) = match sent {
            Ok(response) if response.status().is_success() => {
                return cancellable(cancel, async {
                    response.json::<Value>().await.map_err(CollectorError::from)
                })
                .await;
            }
            Ok(response) => {
                let status = response.status();
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body = cancellable(cancel, async {
                    Ok(response.text().await.unwrap_or_default())
                })
                .await?;
                let error = map_error(status, &body);
                if !is_retryable_status(status) {
                    debug!(api, status = %status, "Request failed");
                    return Err(error);
                }
                (error, retry_after)
            }
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => (e, None),
        };

        if !policy.should_retry(attempt) {
            return Err(failure);
        }

        let delay = policy.delay_for(attempt, retry_after);
        warn!(
            api,
            attempt = attempt + 1,
            error = %failure,
            delay_ms = delay.as_millis() as u64,
            "Request throttled or failed, retrying"
        );
        cancellable_sleep(cancel, delay).await?;
        attempt += 1;
    }
}

/// Builds and owns the Graph, Resource Manager and batch clients.
#[derive(Debug)]
pub struct ClientFactory {
    config: Arc<CollectorConfig>,
    tokens: Arc<TokenCache>,
    cancel: CancellationToken,
    graph: GraphClient,
    resource_manager: ResourceManagerClient,
    batch: BatchClient,
}

impl ClientFactory {
    /// Creates the clients for `config` on top of one credential source.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or an HTTP client
    /// cannot be created.
    pub fn new(
        config: CollectorConfig,
        source: Arc<dyn TokenSource>,
        cancel: CancellationToken,
    ) -> CollectorResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let tokens = Arc::new(TokenCache::new(source));

        let graph = GraphClient::new(config.clone(), tokens.clone(), cancel.clone())?;
        let resource_manager =
            ResourceManagerClient::new(config.clone(), tokens.clone(), cancel.clone())?;
        let batch = BatchClient::new(config.clone(), tokens.clone(), cancel.clone())?;

        Ok(Self {
            config,
            tokens,
            cancel,
            graph,
            resource_manager,
            batch,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    #[must_use]
    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    #[must_use]
    pub fn resource_manager(&self) -> &ResourceManagerClient {
        &self.resource_manager
    }

    #[must_use]
    pub fn batch(&self) -> &BatchClient {
        &self.batch
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a valid token for `scope`, going back to the credential only
    /// when the cached one is close to expiry.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Auth` if the credential fails, or
    /// `CollectorError::Cancelled`.
    pub async fn fresh_access_token(&self, scope: &str) -> CollectorResult<String> {
        cancellable(&self.cancel, self.tokens.get_token(scope)).await
    }
}
