//! Credential sources and the per-scope token cache.
//!
//! The collector needs tokens for two audiences (Microsoft Graph and Azure
//! Resource Manager). A [`TokenSource`] produces them; the [`TokenCache`]
//! owned by the client factory keeps one token per scope and only goes back
//! to the source when the cached token is within the grace period of expiry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::AzureCloudEnvironment;
use crate::{CollectorError, CollectorResult};

/// An access token together with its expiry.
#[derive(Debug)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::new(token.into()),
            expires_at,
        }
    }

    /// Returns true if the token is expired or will expire within the grace period.
    #[must_use]
    pub fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Anything that can produce an access token for a scope.
#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    /// Acquires a token for `scope` (for example `https://graph.microsoft.com/.default`).
    async fn fetch_token(&self, scope: &str) -> CollectorResult<AccessToken>;
}

/// OAuth2 token response from Entra ID.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Service principal credential using the client credentials flow.
#[derive(Debug)]
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    cloud: AzureCloudEnvironment,
    http_client: reqwest::Client,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        cloud: AzureCloudEnvironment,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            cloud,
            http_client: reqwest::Client::new(),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.cloud.login_endpoint(),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenSource for ClientSecretCredential {
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    async fn fetch_token(&self, scope: &str) -> CollectorResult<AccessToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| CollectorError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| CollectorError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(AccessToken::new(token_response.access_token, expires_at))
    }
}

/// Output of `az account get-access-token --output json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenOutput {
    access_token: String,
    /// Local time, e.g. `2024-05-01 12:34:56.000000`.
    expires_on: Option<String>,
    /// Unix timestamp; emitted by newer CLI versions.
    #[serde(rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl CliTokenOutput {
    fn expires_at(&self) -> DateTime<Utc> {
        if let Some(epoch) = self.expires_on_epoch {
            if let Some(at) = Utc.timestamp_opt(epoch, 0).single() {
                return at;
            }
        }
        self.expires_on
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
            .and_then(|naive| chrono::Local.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + Duration::minutes(10))
    }
}

/// Token source backed by the Azure CLI's logged-in account.
#[derive(Debug, Default)]
pub struct AzureCliCredential {
    tenant_id: Option<String>,
}

impl AzureCliCredential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
        }
    }
}

#[async_trait]
impl TokenSource for AzureCliCredential {
    #[instrument(skip(self))]
    async fn fetch_token(&self, scope: &str) -> CollectorResult<AccessToken> {
        let mut command = tokio::process::Command::new("az");
        command.args(["account", "get-access-token", "--scope", scope, "--output", "json"]);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant.as_str()]);
        }

        let output = command.output().await.map_err(|e| {
            CollectorError::Auth(format!("Azure CLI not available: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectorError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let parsed: CliTokenOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| CollectorError::Auth(format!("Failed to parse Azure CLI output: {e}")))?;
        let expires_at = parsed.expires_at();
        Ok(AccessToken::new(parsed.access_token, expires_at))
    }
}

/// A pre-acquired token returned for every scope.
#[derive(Debug)]
pub struct StaticTokenSource {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl StaticTokenSource {
    /// Creates a source whose token is valid for the next hour.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_expiry(token, Utc::now() + Duration::hours(1))
    }

    #[must_use]
    pub fn with_expiry(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::new(token.into()),
            expires_at,
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self, _scope: &str) -> CollectorResult<AccessToken> {
        Ok(AccessToken::new(
            self.token.expose_secret().to_string(),
            self.expires_at,
        ))
    }
}

/// Tries each source in order and returns the first token obtained.
#[derive(Debug, Default)]
pub struct ChainedTokenSource {
    sources: Vec<Arc<dyn TokenSource>>,
}

impl ChainedTokenSource {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn TokenSource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn push(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl TokenSource for ChainedTokenSource {
    async fn fetch_token(&self, scope: &str) -> CollectorResult<AccessToken> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.fetch_token(scope).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    debug!(error = %e, "Credential source failed, trying next");
                    failures.push(e.to_string());
                }
            }
        }
        Err(CollectorError::Auth(if failures.is_empty() {
            "no credential sources configured".to_string()
        } else {
            format!("all credential sources failed: {}", failures.join("; "))
        }))
    }
}

/// Caches one token per scope on top of a [`TokenSource`].
#[derive(Debug)]
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    cached: RwLock<HashMap<String, AccessToken>>,
    /// Grace period before expiry to trigger refresh (default: 5 minutes).
    grace_period: Duration,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(HashMap::new()),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token for `scope`, refreshing if necessary.
    #[instrument(skip(self))]
    pub async fn get_token(&self, scope: &str) -> CollectorResult<String> {
        {
            let cache = self.cached.read().await;
            if let Some(token) = cache.get(scope) {
                if !token.is_expired(self.grace_period) {
                    return Ok(token.token.expose_secret().to_string());
                }
            }
        }

        debug!("Refreshing access token");
        let fresh = self.source.fetch_token(scope).await?;
        if fresh.is_expired(self.grace_period) {
            warn!(
                expires_at = %fresh.expires_at,
                "Credential source returned a token inside the refresh window"
            );
        }
        let value = fresh.token.expose_secret().to_string();

        let mut cache = self.cached.write().await;
        cache.insert(scope.to_string(), fresh);
        Ok(value)
    }

    /// Invalidates every cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        self.cached.write().await.clear();
    }
}
