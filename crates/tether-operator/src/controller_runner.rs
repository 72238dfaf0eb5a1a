//! Controller runner - builds the ExtensionConfig controller futures
//!
//! Returns boxed futures that the caller composes. Building is kept separate
//! from running so the wiring stays testable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::core::PartialObjectMeta;
use kube::runtime::watcher::{Config as WatcherConfig, Event};
use kube::runtime::{metadata_watcher, Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tether_common::crd::ExtensionConfig;
use tether_common::WATCH_FILTER_LABEL;
use tether_extension_config::{
    error_policy, reconcile, reconcile_delete, secret_to_extension_configs, Context,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Label selector restricting watches to one operator instance, if configured
pub fn watch_filter_selector(watch_filter: Option<&str>) -> Option<String> {
    watch_filter
        .filter(|value| !value.is_empty())
        .map(|value| format!("{WATCH_FILTER_LABEL}={value}"))
}

/// Watcher config for ExtensionConfigs, honouring the watch filter
pub fn extension_config_watcher_config(watch_filter: Option<&str>) -> WatcherConfig {
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    match watch_filter_selector(watch_filter) {
        Some(selector) => config.labels(&selector),
        None => config,
    }
}

/// Build the ExtensionConfig controller and its deletion watcher.
///
/// Secrets are watched metadata-only and mapped to reconcile requests through
/// the context's secret index, so Secret data never sits in a cache.
pub fn build_extension_config_controllers(
    client: Client,
    ctx: Arc<Context>,
    watch_filter: Option<&str>,
) -> Vec<ControllerFuture> {
    let configs: Api<ExtensionConfig> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);
    let watcher_config = extension_config_watcher_config(watch_filter);

    let secret_changes = metadata_watcher(
        secrets,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .default_backoff()
    .touched_objects();

    let controller = Controller::new(configs.clone(), watcher_config.clone())
        .watches_stream(
            secret_changes,
            secret_to_extension_configs::<PartialObjectMeta<Secret>>(ctx.secret_index.clone()),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("ExtensionConfig"));

    tracing::info!("- ExtensionConfig controller");

    vec![
        Box::pin(controller),
        Box::pin(watch_deletions(configs, watcher_config, ctx)),
    ]
}

/// Unregister ExtensionConfigs as soon as they disappear from the API.
///
/// The controller only reconciles objects still in its cache, so deletions
/// that skip the deletion marker are picked up here.
async fn watch_deletions(api: Api<ExtensionConfig>, config: WatcherConfig, ctx: Arc<Context>) {
    metadata_watcher(api, config)
        .default_backoff()
        .for_each(|event| {
            match event {
                Ok(Event::Delete(deleted)) => reconcile_delete(&deleted.name_any(), &ctx),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "ExtensionConfig deletion watch error"),
            }
            std::future::ready(())
        })
        .await;
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
