//! Azure tenant IAM snapshot collector for xavyo
//!
//! This crate reads an Azure tenant's identity and access posture and
//! assembles it into a single document for graph ingestion.
//!
//! # Features
//!
//! - Directory objects, role assignments, group memberships and app consent
//!   via Microsoft Graph v1.0
//! - Member fan-outs through Graph JSON batching with per-batch fallback
//! - PIM eligibility and active assignment schedules
//! - Management groups, role definitions and scope-classified role assignments
//! - Cross-subscription Resource Graph inventory and Key Vault access policies
//! - Multi-cloud support (Commercial, US Government, China, custom endpoints)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use secrecy::SecretString;
//! use xavyo_collector_azure::{AzureIamCollector, ClientSecretCredential, CollectorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::builder().build()?;
//! let credential = ClientSecretCredential::new(
//!     "your-tenant-id",
//!     "your-client-id",
//!     SecretString::new("your-client-secret".to_string()),
//!     config.cloud.clone(),
//! );
//!
//! let collector = AzureIamCollector::new(config, Arc::new(credential))?;
//! let document = collector.collect(&[]).await?;
//! println!("{}", serde_json::to_string(&document)?);
//! # Ok(())
//! # }
//! ```

mod arm_client;
mod auth;
mod batch;
mod clients;
mod collector;
mod config;
mod directory;
mod document;
mod error;
mod graph_client;
mod management_groups;
mod model;
mod pagination;
mod pim;
mod projection;
mod resources;
mod retry;
mod scope;
mod sink;
mod timing;

// Re-exports
pub use arm_client::ResourceManagerClient;
pub use auth::{
    AccessToken, AzureCliCredential, ChainedTokenSource, ClientSecretCredential,
    StaticTokenSource, TokenCache, TokenSource,
};
pub use batch::{BatchClient, BatchDispatcher, BatchRequest, FanOut, SubResponse};
pub use clients::ClientFactory;
pub use collector::{wants_discovery, AzureIamCollector};
pub use config::{
    AzureCloudEnvironment, BatchPolicy, CollectorConfig, CollectorConfigBuilder,
    ConcurrencyPolicy, RetryPolicy,
};
pub use directory::AzureAdData;
pub use document::{CollectionDocument, CollectionMetadata, DataSummary};
pub use error::{CollectorError, CollectorResult};
pub use graph_client::GraphClient;
pub use management_groups::stitch_hierarchy;
pub use model::{
    AppRoleDirection, AssignmentState, DirectoryObject, EntityKind, ManagementGroup, Record,
    ResourceRow, RmRoleAssignment,
};
pub use pagination::{read_all, Identified, Page, PageSource};
pub use pim::PimData;
pub use resources::{SubscriptionData, SubscriptionState};
pub use scope::{classify_scope, ScopeBucket, ScopeBuckets};
pub use sink::DocumentSink;
