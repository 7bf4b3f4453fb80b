//! Paginated reads over `nextLink`-style continuation.
//!
//! [`read_all`] follows continuation links until a page comes back without
//! one. Only the first page is allowed to fail the read: a failure while
//! turning a later page is logged and the records accumulated so far are
//! returned. Cancellation always propagates.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::model::Record;
use crate::{CollectorError, CollectorResult};

/// One page of raw entities plus the continuation link, if any.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
}

impl Page {
    /// Parses a Microsoft Graph page (`value` + `@odata.nextLink`).
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is present but not an array.
    pub fn from_odata(body: Value) -> CollectorResult<Self> {
        Self::from_body(body, "@odata.nextLink")
    }

    /// Parses a Resource Manager page (`value` + `nextLink`).
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is present but not an array.
    pub fn from_arm(body: Value) -> CollectorResult<Self> {
        Self::from_body(body, "nextLink")
    }

    fn from_body(mut body: Value, link_key: &str) -> CollectorResult<Self> {
        let next_link = body
            .get(link_key)
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
            .map(str::to_string);

        let items = match body.get_mut("value").map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(CollectorError::Json(serde::de::Error::custom(format!(
                    "expected 'value' to be an array, found {other}"
                ))))
            }
        };

        Ok(Self { items, next_link })
    }
}

/// Something that can fetch a page by URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches one page. `url` is either absolute or relative to the source's base.
    async fn fetch_page(&self, url: &str) -> CollectorResult<Page>;
}

/// Identity used to de-duplicate records within one read.
pub trait Identified {
    fn identity(&self) -> String;
}

impl Identified for Record {
    fn identity(&self) -> String {
        self.id()
    }
}

impl Identified for String {
    fn identity(&self) -> String {
        self.clone()
    }
}

/// Reads every page starting at `first_url`, projecting each raw entity.
///
/// Entities the projection rejects are skipped. When two entities share an
/// identity the later one replaces the earlier one in place.
///
/// # Errors
///
/// Returns the first page's error, or `CollectorError::Cancelled` from any page.
pub async fn read_all<S, T, P>(
    source: &S,
    collection: &str,
    first_url: &str,
    mut project: P,
) -> CollectorResult<Vec<T>>
where
    S: PageSource + ?Sized,
    T: Identified + Send,
    P: FnMut(&Value) -> Option<T> + Send,
{
    let mut records: Vec<T> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut url = first_url.to_string();
    let mut page_count = 0usize;

    loop {
        let page = match source.fetch_page(&url).await {
            Ok(page) => page,
            Err(e) if page_count == 0 || e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(
                    collection = %collection,
                    page = page_count + 1,
                    error = %e,
                    "Failed to get next page, keeping {} records",
                    records.len()
                );
                break;
            }
        };
        page_count += 1;
        debug!(
            collection = %collection,
            page = page_count,
            objects = page.items.len(),
            "Processing page"
        );

        for item in &page.items {
            let Some(record) = project(item) else {
                continue;
            };
            let identity = record.identity();
            match positions.get(&identity) {
                Some(&index) => {
                    debug!(
                        collection = %collection,
                        id = %identity,
                        "Duplicate id, keeping later record"
                    );
                    records[index] = record;
                }
                None => {
                    positions.insert(identity, records.len());
                    records.push(record);
                }
            }
        }

        match page.next_link {
            Some(next) if next == url => {
                warn!(collection = %collection, "nextLink repeats the current page, stopping");
                break;
            }
            Some(next) => url = next,
            None => break,
        }
    }

    debug!(
        collection = %collection,
        pages = page_count,
        item_count = records.len(),
        "Completed paginated read"
    );
    Ok(records)
}
