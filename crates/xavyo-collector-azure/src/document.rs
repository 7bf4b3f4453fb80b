//! The consolidated collection document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::AzureAdData;
use crate::model::Record;
use crate::pim::PimData;
use crate::resources::SubscriptionData;

/// Timestamp format used for `collection_timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataSummary {
    pub total_azure_ad_objects: usize,
    pub total_pim_objects: usize,
    pub total_management_groups: usize,
    pub total_azurerm_objects: usize,
    pub total_objects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionMetadata {
    pub tenant_id: String,
    pub collection_timestamp: String,
    pub subscriptions_processed: usize,
    pub collector_versions: BTreeMap<String, String>,
    pub data_summary: DataSummary,
}

impl CollectionMetadata {
    /// Metadata for a run started at `started_at`. The summary is filled in
    /// by [`CollectionDocument::summarize`].
    #[must_use]
    pub fn new(
        tenant_id: String,
        started_at: DateTime<Utc>,
        subscriptions_processed: usize,
    ) -> Self {
        Self {
            tenant_id,
            collection_timestamp: started_at.format(TIMESTAMP_FORMAT).to_string(),
            subscriptions_processed,
            collector_versions: collector_versions(),
            data_summary: DataSummary::default(),
        }
    }
}

fn collector_versions() -> BTreeMap<String, String> {
    [
        ("xavyo_collector", "comprehensive"),
        ("graph_collector", "completed"),
        ("pim_collector", "completed"),
        ("azurerm_collector", "completed"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// The single document handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionDocument {
    pub collection_metadata: CollectionMetadata,
    pub azure_ad: AzureAdData,
    pub pim: PimData,
    pub management_groups: Vec<Record>,
    pub azure_resources: BTreeMap<String, SubscriptionData>,
}

impl CollectionDocument {
    /// Counts every section.
    #[must_use]
    pub fn compute_summary(&self) -> DataSummary {
        let total_azure_ad_objects = self.azure_ad.total();
        let total_pim_objects = self.pim.total();
        let total_management_groups = self.management_groups.len();
        let total_azurerm_objects = self
            .azure_resources
            .values()
            .map(SubscriptionData::total)
            .sum();
        DataSummary {
            total_azure_ad_objects,
            total_pim_objects,
            total_management_groups,
            total_azurerm_objects,
            total_objects: total_azure_ad_objects
                + total_pim_objects
                + total_management_groups
                + total_azurerm_objects,
        }
    }

    /// Stores [`Self::compute_summary`] under `collection_metadata.data_summary`.
    pub fn summarize(&mut self) -> DataSummary {
        let summary = self.compute_summary();
        self.collection_metadata.data_summary = summary;
        summary
    }
}
