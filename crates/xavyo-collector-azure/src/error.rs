//! Error types for the Azure IAM collector.

use thiserror::Error;

/// Result type alias using `CollectorError`.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors that can occur while collecting an Azure tenant snapshot.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential acquisition error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Microsoft Graph API error.
    #[error("Graph API error: {code} - {message}")]
    GraphApi {
        code: String,
        message: String,
        inner_error: Option<String>,
    },

    /// Azure Resource Manager (or Resource Graph) error.
    #[error("Resource Manager error ({status}): {code} - {message}")]
    ResourceManager {
        status: u16,
        code: String,
        message: String,
    },

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A `$batch` envelope failed after exhausting its attempts.
    #[error("Batch request failed with status {status:?} after {attempts} attempt(s)")]
    BatchEnvelope { status: Option<u16>, attempts: u32 },

    /// The tenant id could not be resolved from the organization endpoint.
    #[error("Tenant resolution failed: {0}")]
    TenantResolution(String),

    /// The run was cancelled by the caller.
    #[error("Collection cancelled")]
    Cancelled,

    /// The sink rejected the consolidated document.
    #[error("Sink error: {0}")]
    Sink(String),
}

impl CollectorError {
    /// Returns true for failures worth retrying: transport errors, 429 and 5xx.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            }
            Self::ResourceManager { status, .. } => *status == 429 || *status >= 500,
            Self::GraphApi { code, .. } => {
                code.starts_with("429") || code.starts_with('5') || code == "TooManyRequests"
            }
            Self::BatchEnvelope { status, .. } => {
                status.map_or(true, |s| s == 429 || s >= 500)
            }
            _ => false,
        }
    }

    /// Returns true for errors that must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth(_) | Self::TenantResolution(_) | Self::Cancelled | Self::Config(_)
        )
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
