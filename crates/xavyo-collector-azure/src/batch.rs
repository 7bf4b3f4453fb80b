//! Graph JSON batching for "members of X" fan-outs.
//!
//! N per-item lookups become ⌈N/B⌉ `POST /$batch` calls. Each sub-request id
//! is `item_<slot>_<tag>`; the dispatcher keeps a slot table from id to
//! `(parent, fan-out)` so every sub-response is re-attached without parsing
//! the id. A sub-response with a non-200 status is dropped on its own. When
//! the whole envelope fails, only the items of that batch fall back to
//! per-item paginated reads.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenCache;
use crate::clients::{cancellable, cancellable_sleep};
use crate::config::CollectorConfig;
use crate::graph_client::GraphClient;
use crate::pagination::{read_all, Identified};
use crate::retry::{is_retryable_status, parse_retry_after};
use crate::timing::CollectionTimer;
use crate::{CollectorError, CollectorResult};

/// One sub-request inside a `$batch` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    pub id: String,
    pub method: &'static str,
    pub url: String,
}

impl BatchRequest {
    #[must_use]
    pub fn get(id: String, url: String) -> Self {
        Self {
            id,
            method: "GET",
            url,
        }
    }
}

/// One sub-response from a `$batch` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SubResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<SubResponse>,
}

/// Sub-request id for the item in `slot` and the fan-out `tag`.
#[must_use]
pub fn request_id(slot: usize, tag: &str) -> String {
    format!("item_{slot}_{tag}")
}

/// One per-item lookup: a tag for the request id and the relative URL for a
/// parent id.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    pub tag: &'static str,
    pub path: fn(&str) -> String,
}

/// Raw HTTP client for `POST {graph}/v1.0/$batch`, with its own long timeout
/// and the retry policy.
#[derive(Debug)]
pub struct BatchClient {
    http_client: reqwest::Client,
    tokens: Arc<TokenCache>,
    config: Arc<CollectorConfig>,
    cancel: CancellationToken,
}

impl BatchClient {
    /// Creates the batch client.
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
            .timeout(config.batch.http_timeout)
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
    pub fn batch_url(&self) -> String {
        format!(
            "{}/{}/$batch",
            self.config.cloud.graph_endpoint(),
            crate::graph_client::GRAPH_API_VERSION
        )
    }

    /// Posts one envelope, retrying transport errors, 429 and 5xx.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::BatchEnvelope` when attempts are exhausted or
    /// the envelope is rejected with a non-retryable status,
    /// `CollectorError::Auth` if no token can be obtained, and
    /// `CollectorError::Cancelled` when the run is cancelled.
    #[instrument(skip(self, requests), fields(request_count = requests.len()))]
    pub async fn post_batch(&self, requests: &[BatchRequest]) -> CollectorResult<Vec<SubResponse>> {
        let url = self.batch_url();
        let body = json!({ "requests": requests });
        let scope = self.config.cloud.graph_scope();
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let token = cancellable(&self.cancel, self.tokens.get_token(&scope)).await?;
            let sent = cancellable(&self.cancel, async {
                self.http_client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(CollectorError::from)
            })
            .await;

            let (status, retry_after) = match sent {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    let parsed: BatchResponse = cancellable(&self.cancel, async {
                        response.json::<BatchResponse>().await.map_err(CollectorError::from)
                    })
                    .await?;
                    return Ok(parsed.responses);
                }
                Ok(response) if is_retryable_status(response.status()) => {
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                    (Some(response.status().as_u16()), retry_after)
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    debug!(status, "Batch envelope rejected");
                    return Err(CollectorError::BatchEnvelope {
                        status: Some(status),
                        attempts: attempt + 1,
                    });
                }
                Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
                Err(e) => {
                    debug!(error = %e, "Batch transport error");
                    (None, None)
                }
            };

            if !policy.should_retry(attempt) {
                return Err(CollectorError::BatchEnvelope {
                    status,
                    attempts: attempt + 1,
                });
            }

            let delay = policy.delay_for(attempt, retry_after);
            debug!(
                attempt = attempt + 1,
                status = ?status,
                delay_ms = delay.as_millis() as u64,
                "Batch request rate limited or server error, retrying"
            );
            cancellable_sleep(&self.cancel, delay).await?;
            attempt += 1;
        }
    }
}

/// Drives one dependent fan-out over its parents in batches.
pub struct BatchDispatcher<'a> {
    batch: &'a BatchClient,
    graph: &'a GraphClient,
    config: &'a CollectorConfig,
}

impl<'a> BatchDispatcher<'a> {
    #[must_use]
    pub fn new(
        batch: &'a BatchClient,
        graph: &'a GraphClient,
        config: &'a CollectorConfig,
    ) -> Self {
        Self {
            batch,
            graph,
            config,
        }
    }

    /// Runs every `fanouts` lookup for every parent and projects the returned
    /// entities with `attach(parent, fanout, entity)`.
    ///
    /// # Errors
    ///
    /// Only `CollectorError::Cancelled` escapes; every other failure is
    /// contained to its batch or item.
    pub async fn dispatch<P, T, F>(
        &self,
        collection: &str,
        parents: &[P],
        fanouts: &[FanOut],
        mut attach: F,
    ) -> CollectorResult<Vec<T>>
    where
        P: Identified + Sync,
        T: Identified + Send,
        F: FnMut(&P, &FanOut, &Value) -> Option<T> + Send,
    {
        let mut out = Vec::new();
        if parents.is_empty() || fanouts.is_empty() {
            return Ok(out);
        }

        let per_batch = self.config.batch.items_per_batch(fanouts.len());
        let batch_count = parents.len().div_ceil(per_batch);

        for (batch_index, chunk) in parents.chunks(per_batch).enumerate() {
            let timer = CollectionTimer::start(format!(
                "{collection} batch {}/{batch_count}",
                batch_index + 1
            ));
            let base_slot = batch_index * per_batch;
            let mut slots: HashMap<String, (usize, usize)> = HashMap::new();
            let mut requests = Vec::with_capacity(chunk.len() * fanouts.len());

            for (offset, parent) in chunk.iter().enumerate() {
                let slot = base_slot + offset;
                let parent_id = parent.identity();
                for (fanout_index, fanout) in fanouts.iter().enumerate() {
                    let id = request_id(slot, fanout.tag);
                    requests.push(BatchRequest::get(id.clone(), (fanout.path)(&parent_id)));
                    slots.insert(id, (slot, fanout_index));
                }
            }

            let before = out.len();
            match self.batch.post_batch(&requests).await {
                Ok(responses) => {
                    for response in responses {
                        let Some(&(slot, fanout_index)) = slots.get(&response.id) else {
                            debug!(id = %response.id, "Batch response for unknown request id");
                            continue;
                        };
                        if response.status != 200 {
                            debug!(
                                id = %response.id,
                                status = response.status,
                                "Batch response failed"
                            );
                            continue;
                        }
                        let parent = &parents[slot];
                        let fanout = &fanouts[fanout_index];
                        self.attach_sub_response(
                            collection,
                            parent,
                            fanout,
                            &response.body,
                            &mut attach,
                            &mut out,
                        )
                        .await?;
                    }
                }
                Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
                Err(e) => {
                    warn!(
                        collection = %collection,
                        batch = batch_index + 1,
                        error = %e,
                        "Batch request failed, falling back to individual requests"
                    );
                    for parent in chunk {
                        for fanout in fanouts {
                            self.read_item(collection, parent, fanout, &mut attach, &mut out)
                                .await?;
                        }
                    }
                }
            }
            timer.finish(out.len() - before);

            if batch_index + 1 < batch_count {
                cancellable_sleep(self.graph_cancel(), self.config.batch.inter_batch_delay).await?;
            }
        }

        info!(
            collection = %collection,
            parents = parents.len(),
            batches = batch_count,
            item_count = out.len(),
            "Completed batched collection"
        );
        Ok(out)
    }

    fn graph_cancel(&self) -> &CancellationToken {
        &self.batch.cancel
    }

    /// Attaches a 200 sub-response, continuing through `@odata.nextLink`.
    async fn attach_sub_response<P, T, F>(
        &self,
        collection: &str,
        parent: &P,
        fanout: &FanOut,
        body: &Value,
        attach: &mut F,
        out: &mut Vec<T>,
    ) -> CollectorResult<()>
    where
        P: Identified + Sync,
        T: Identified + Send,
        F: FnMut(&P, &FanOut, &Value) -> Option<T> + Send,
    {
        if let Some(items) = body.get("value").and_then(Value::as_array) {
            out.extend(items.iter().filter_map(|item| attach(parent, fanout, item)));
        }

        let Some(next) = body
            .get("@odata.nextLink")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
        else {
            return Ok(());
        };

        match read_all(self.graph, collection, next, |item| attach(parent, fanout, item)).await {
            Ok(more) => out.extend(more),
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    collection = %collection,
                    parent = %parent.identity(),
                    error = %e,
                    "Failed to continue batched page"
                );
            }
        }
        Ok(())
    }

    /// Per-item fallback through the paginated reader.
    async fn read_item<P, T, F>(
        &self,
        collection: &str,
        parent: &P,
        fanout: &FanOut,
        attach: &mut F,
        out: &mut Vec<T>,
    ) -> CollectorResult<()>
    where
        P: Identified + Sync,
        T: Identified + Send,
        F: FnMut(&P, &FanOut, &Value) -> Option<T> + Send,
    {
        let parent_id = parent.identity();
        let url = self.graph.resolve(&(fanout.path)(&parent_id));
        match read_all(self.graph, collection, &url, |item| attach(parent, fanout, item)).await {
            Ok(items) => out.extend(items),
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(e) => {
                warn!(
                    collection = %collection,
                    parent = %parent_id,
                    tag = fanout.tag,
                    error = %e,
                    "Failed to read item (batch fallback)"
                );
            }
        }
        Ok(())
    }
}
