//! Tether Operator - registers runtime extension servers declared by ExtensionConfigs

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;

use tether_common::telemetry::init_telemetry;
use tether_extension_config::{warm_up_registry, Context, KubeClientImpl};
use tether_operator::controller_runner::{build_extension_config_controllers, watch_filter_selector};
use tether_operator::startup::{crd_yaml, ensure_crds_installed};
use tether_operator::{HttpDiscoveryClient, OperatorConfig};
use tether_registry::ExtensionRegistry;

/// Tether - runtime extension registry operator
#[derive(Parser, Debug)]
#[command(name = "tether", version, about, long_about = None)]
struct Cli {
    /// Print the ExtensionConfig CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Warms up the extension registry from every existing ExtensionConfig,
    /// then reconciles ExtensionConfigs and the Secrets they inject CAs from.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(cli.config.telemetry())?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!("Tether controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let selector = watch_filter_selector(config.watch_filter.as_deref());
    if let Some(selector) = &selector {
        tracing::info!(%selector, "Watching filtered ExtensionConfigs only");
    }

    let kube = KubeClientImpl::new(client.clone()).with_label_selector(selector);
    let discovery = HttpDiscoveryClient::new(config.discovery_timeout());
    let ctx = Arc::new(
        Context::new(
            Arc::new(kube),
            Arc::new(discovery),
            Arc::new(ExtensionRegistry::new()),
        )
        .with_settings(config.controller_settings()),
    );

    // Controllers only start once the registry reflects every existing config
    warm_up_registry(&ctx, &config.warmup_retry())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to warm up extension registry: {}", e))?;

    tracing::info!("Starting controllers:");
    let controllers =
        build_extension_config_controllers(client, ctx, config.watch_filter.as_deref());

    futures::future::select_all(controllers).await;

    tracing::info!("Tether controller shutting down");
    Ok(())
}
