//! azure-iam-collect - Azure tenant IAM snapshot collector
//!
//! Collects directory objects, PIM schedules, management groups and
//! per-subscription resources and role assignments, then writes one JSON
//! document to a file or stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use xavyo_collector_azure::{
    AzureCliCredential, AzureCloudEnvironment, AzureIamCollector, ChainedTokenSource,
    ClientSecretCredential, CollectorConfig, TokenSource,
};

mod config;
mod logging;
mod sink;

use config::AppConfig;
use sink::JsonWriterSink;

/// Azure tenant IAM snapshot collector
#[derive(Parser, Debug)]
#[command(name = "azure-iam-collect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subscription id to collect. Repeat for several; omit or pass `all`
    /// to discover every enabled subscription.
    #[arg(long = "subscription", short = 's')]
    subscriptions: Vec<String>,

    /// Output file. Defaults to stdout.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Pretty-print the JSON document.
    #[arg(long)]
    pretty: bool,

    /// Log filter directive (e.g. "info,xavyo_collector_azure=debug").
    #[arg(long)]
    log_filter: Option<String>,

    /// Cloud environment: commercial, usgovernment or china. Overrides AZURE_CLOUD.
    #[arg(long)]
    cloud: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let app_config = AppConfig::from_env().context("Configuration error")?;

    logging::init_logging(
        cli.log_filter.as_deref().unwrap_or(logging::DEFAULT_FILTER),
        app_config.log_format,
    );

    let cloud = match cli.cloud.as_deref() {
        Some(cloud) => cloud
            .parse::<AzureCloudEnvironment>()
            .context("Invalid --cloud value")?,
        None => app_config.cloud.clone(),
    };

    let collector_config = CollectorConfig::builder()
        .cloud(cloud.clone())
        .subscription_workers(app_config.subscription_workers)
        .directory_concurrency(app_config.directory_concurrency)
        .build()
        .context("Invalid collector configuration")?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let collector = AzureIamCollector::with_cancellation(
        collector_config,
        credential(&app_config, cloud),
        cancel,
    )
    .context("Failed to create collector")?;

    tracing::info!(
        subscriptions = ?cli.subscriptions,
        output = ?cli.output,
        "Starting Azure IAM collection"
    );

    let sink = JsonWriterSink::new(cli.output, cli.pretty);
    collector
        .run(&cli.subscriptions, &sink)
        .await
        .context("Collection failed")?;

    Ok(())
}

/// Client secret credential when configured, then the Azure CLI login.
fn credential(config: &AppConfig, cloud: AzureCloudEnvironment) -> Arc<dyn TokenSource> {
    let mut chain = ChainedTokenSource::default();

    if let (Some(tenant_id), Some(credentials)) = (&config.tenant_id, &config.client_credentials) {
        chain = chain.push(Arc::new(ClientSecretCredential::new(
            tenant_id.clone(),
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            cloud,
        )));
    }

    let cli_credential = match &config.tenant_id {
        Some(tenant_id) => AzureCliCredential::with_tenant(tenant_id.clone()),
        None => AzureCliCredential::new(),
    };
    Arc::new(chain.push(Arc::new(cli_credential)))
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling collection");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_repeatable_subscriptions() {
        let cli = Cli::parse_from([
            "azure-iam-collect",
            "--subscription",
            "sub-1",
            "-s",
            "sub-2",
            "--pretty",
            "--output",
            "out.json",
        ]);
        assert_eq!(cli.subscriptions, vec!["sub-1", "sub-2"]);
        assert!(cli.pretty);
        assert_eq!(cli.output, Some(PathBuf::from("out.json")));
        assert!(cli.cloud.is_none());
    }

    #[test]
    fn test_cli_defaults_to_discovery() {
        let cli = Cli::parse_from(["azure-iam-collect"]);
        assert!(cli.subscriptions.is_empty());
        assert!(xavyo_collector_azure::wants_discovery(&cli.subscriptions));
    }
}
