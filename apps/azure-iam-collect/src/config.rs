use secrecy::SecretString;
use xavyo_collector_azure::AzureCloudEnvironment;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Service principal credentials read from the environment.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Configuration for the collector harness.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Tenant to authenticate against. Required with client credentials;
    /// optional for the Azure CLI fallback.
    pub tenant_id: Option<String>,

    /// Present when both `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET` are set.
    pub client_credentials: Option<ClientCredentials>,

    pub cloud: AzureCloudEnvironment,

    /// Subscription worker count. Default: 1.
    pub subscription_workers: usize,

    /// Concurrent directory listings. Default: 3.
    pub directory_concurrency: usize,

    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let tenant_id = reader("AZURE_TENANT_ID").ok().filter(|v| !v.is_empty());
        let client_id = reader("AZURE_CLIENT_ID").ok().filter(|v| !v.is_empty());
        let client_secret = reader("AZURE_CLIENT_SECRET").ok().filter(|v| !v.is_empty());

        let client_credentials = match (client_id, client_secret) {
            (Some(client_id), Some(secret)) => {
                if tenant_id.is_none() {
                    return Err(ConfigError::MissingVar("AZURE_TENANT_ID".into()));
                }
                Some(ClientCredentials {
                    client_id,
                    client_secret: SecretString::new(secret),
                })
            }
            (Some(_), None) => return Err(ConfigError::MissingVar("AZURE_CLIENT_SECRET".into())),
            (None, Some(_)) => return Err(ConfigError::MissingVar("AZURE_CLIENT_ID".into())),
            (None, None) => None,
        };

        let cloud = reader("AZURE_CLOUD")
            .unwrap_or_default()
            .parse::<AzureCloudEnvironment>()
            .map_err(|e| ConfigError::InvalidValue("AZURE_CLOUD".into(), e.to_string()))?;

        let subscription_workers = parse_count(&reader, "COLLECTOR_SUBSCRIPTION_WORKERS", 1)?;
        let directory_concurrency = parse_count(&reader, "COLLECTOR_DIRECTORY_CONCURRENCY", 3)?;

        let log_format = match reader("COLLECTOR_LOG_FORMAT")
            .unwrap_or_else(|_| "text".to_string())
            .to_lowercase()
            .as_str()
        {
            "text" | "" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidValue(
                    "COLLECTOR_LOG_FORMAT".into(),
                    format!("expected text or json, got {other}"),
                ))
            }
        };

        Ok(Self {
            tenant_id,
            client_credentials,
            cloud,
            subscription_workers,
            directory_concurrency,
            log_format,
        })
    }
}

fn parse_count<F>(reader: &F, key: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let Ok(raw) = reader(key) else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue(key.into(), "must be at least 1".into())),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(key.into(), e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
