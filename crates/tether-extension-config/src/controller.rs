//! ExtensionConfig controller implementation
//!
//! Each reconcile runs CA injection, discovery and a status patch, collecting
//! errors instead of stopping at the first one, and only then hands the
//! discovered handlers to the registry. Every cycle waits until the registry
//! has been warmed up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tether_common::crd::{
    Condition, ConditionStatus, ExtensionConfig, CA_BUNDLE_INJECTED_CONDITION,
    CA_BUNDLE_INJECTED_REASON, CA_BUNDLE_INJECTION_FAILED_REASON, DISCOVERED_CONDITION,
    DISCOVERED_REASON, NOT_DISCOVERED_REASON, NOT_PAUSED_REASON, PAUSED_CONDITION, PAUSED_REASON,
};
use tether_common::{Error, ReconcileError, FIELD_MANAGER};
use tether_registry::ExtensionRegistry;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::ca_bundle::reconcile_ca_bundle;
use crate::secret_index::SecretIndex;

/// Trait abstracting Kubernetes client operations for ExtensionConfig
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get an ExtensionConfig by name, `None` if it does not exist
    async fn get_extension_config(&self, name: &str) -> Result<Option<ExtensionConfig>, Error>;

    /// List every ExtensionConfig this controller is responsible for
    async fn list_extension_configs(&self) -> Result<Vec<ExtensionConfig>, Error>;

    /// Persist the difference between `original` and `modified`
    ///
    /// Only `spec.clientConfig.caBundle` and the status subresource are ever
    /// written; nothing is sent when neither changed.
    async fn patch_extension_config(
        &self,
        original: &ExtensionConfig,
        modified: &ExtensionConfig,
    ) -> Result<(), Error>;

    /// Read a Secret directly from the API server, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
}

/// Trait abstracting the discovery call against an extension server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Ask the server behind `config` for its handlers
    ///
    /// Returns `config` with `status.handlers` replaced by the discovered set.
    async fn discover(&self, config: ExtensionConfig) -> Result<ExtensionConfig, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    label_selector: Option<String>,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            label_selector: None,
        }
    }

    /// Restrict listing to ExtensionConfigs matching `selector`
    pub fn with_label_selector(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector;
        self
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_extension_config(&self, name: &str) -> Result<Option<ExtensionConfig>, Error> {
        let api: Api<ExtensionConfig> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(config) => Ok(Some(config)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_extension_configs(&self) -> Result<Vec<ExtensionConfig>, Error> {
        let api: Api<ExtensionConfig> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = &self.label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn patch_extension_config(
        &self,
        original: &ExtensionConfig,
        modified: &ExtensionConfig,
    ) -> Result<(), Error> {
        let changes = ConfigChanges::between(original, modified);
        if changes.is_empty() {
            return Ok(());
        }

        let api: Api<ExtensionConfig> = Api::all(self.client.clone());
        let name = modified.name_any();
        let params = PatchParams::apply(FIELD_MANAGER);

        if let Some(spec) = &changes.spec {
            api.patch(&name, &params, &Patch::Merge(spec)).await?;
        }
        if let Some(status) = &changes.status {
            api.patch_status(&name, &params, &Patch::Merge(status))
                .await?;
        }
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Merge patches needed to move an ExtensionConfig from one state to another
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ConfigChanges {
    pub spec: Option<Value>,
    pub status: Option<Value>,
}

impl ConfigChanges {
    pub(crate) fn between(original: &ExtensionConfig, modified: &ExtensionConfig) -> Self {
        let ca_bundle = &modified.spec.client_config.ca_bundle;
        let spec = (original.spec.client_config.ca_bundle != *ca_bundle).then(|| {
            serde_json::json!({
                "spec": { "clientConfig": { "caBundle": ca_bundle } }
            })
        });
        // Lists are always sent so a merge patch can empty them
        let status = (original.status != modified.status).then(|| {
            let status = modified.status.clone().unwrap_or_default();
            serde_json::json!({
                "status": {
                    "handlers": status.handlers,
                    "conditions": status.conditions,
                }
            })
        });
        Self { spec, status }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.spec.is_none() && self.status.is_none()
    }
}

/// Timing knobs for the controller
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Requeue delay while the registry is still warming up
    pub not_ready_requeue: Duration,
    /// Requeue delay after a failed cycle
    pub error_requeue: Duration,
    /// Requeue delay after a cycle that failed only with non-retryable errors
    pub permanent_error_requeue: Duration,
    /// Periodic rediscovery interval after a successful cycle
    pub resync_interval: Duration,
    /// Deadline for a single discovery call
    pub discovery_timeout: Duration,
    /// Deadline for reading the CA Secret
    pub secret_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            not_ready_requeue: Duration::from_secs(5),
            error_requeue: Duration::from_secs(15),
            permanent_error_requeue: Duration::from_secs(300),
            resync_interval: Duration::from_secs(600),
            discovery_timeout: Duration::from_secs(10),
            secret_timeout: Duration::from_secs(10),
        }
    }
}

/// Controller context containing shared state and clients
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Client used to call extension servers
    pub discovery: Arc<dyn DiscoveryClient>,
    /// Registry the discovered handlers are published to
    pub registry: Arc<ExtensionRegistry>,
    /// CA Secret to ExtensionConfig index, shared with the Secret watch
    pub secret_index: Arc<SecretIndex>,
    /// Timing knobs
    pub settings: ControllerSettings,
}

impl Context {
    /// Create a context with default settings and an empty secret index
    pub fn new(
        kube: Arc<dyn KubeClient>,
        discovery: Arc<dyn DiscoveryClient>,
        registry: Arc<ExtensionRegistry>,
    ) -> Self {
        Self {
            kube,
            discovery,
            registry,
            secret_index: Arc::new(SecretIndex::new()),
            settings: ControllerSettings::default(),
        }
    }

    /// Replace the timing knobs
    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Create a context for testing with mock clients and a fresh registry
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, discovery: Arc<dyn DiscoveryClient>) -> Self {
        Self::new(kube, discovery, Arc::new(ExtensionRegistry::new()))
    }
}

/// Reconcile an ExtensionConfig
///
/// Entry point for `kube::runtime::Controller`. The object carried by the
/// event is only used for its name; the current state is always re-read.
#[instrument(skip(config, ctx), fields(extension_config = %config.name_any()))]
pub async fn reconcile(
    config: Arc<ExtensionConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    reconcile_by_name(&config.name_any(), &ctx).await
}

/// Reconcile the ExtensionConfig called `name`
pub async fn reconcile_by_name(name: &str, ctx: &Context) -> Result<Action, ReconcileError> {
    if !ctx.registry.is_ready() {
        debug!("extension registry not warmed up yet, requeueing");
        return Ok(Action::requeue(ctx.settings.not_ready_requeue));
    }

    let Some(original) = ctx.kube.get_extension_config(name).await? else {
        debug!("ExtensionConfig no longer exists, unregistering");
        reconcile_delete(name, ctx);
        return Ok(Action::await_change());
    };

    ctx.secret_index.update(&original);

    if original.is_paused() {
        return reconcile_paused(&original, ctx).await;
    }

    if original.is_deleting() {
        reconcile_delete(name, ctx);
        return Ok(Action::await_change());
    }

    let outcome = sync_extension_config(&original, ctx).await?;
    if let Some(err) = ReconcileError::aggregate(outcome.errors) {
        return Err(err);
    }

    ctx.registry.add(&outcome.config).map_err(|e| {
        ReconcileError::Validation(format!("failed to register ExtensionConfig {name}: {e}"))
    })?;

    info!(
        handlers = outcome.config.handlers().len(),
        "ExtensionConfig registered"
    );
    Ok(Action::requeue(ctx.settings.resync_interval))
}

/// Drop every registration owned by `name`.
///
/// Best effort: failures are logged and never retried, a later `add` for a
/// recreated object of the same name replaces anything left behind.
pub fn reconcile_delete(name: &str, ctx: &Context) {
    ctx.secret_index.remove(name);

    let config = ExtensionConfig::new(name, Default::default());
    match ctx.registry.remove(&config) {
        Ok(()) => info!(extension_config = %name, "ExtensionConfig unregistered"),
        Err(e) => warn!(extension_config = %name, error = %e, "failed to unregister ExtensionConfig"),
    }
}

/// Error policy for the controller
///
/// Errors that need the object or the extension to change are retried on a
/// slower schedule than transient ones.
pub fn error_policy(
    config: Arc<ExtensionConfig>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    let retryable = error.is_retryable();
    error!(
        %error,
        retryable,
        extension_config = %config.name_any(),
        "reconciliation failed"
    );
    if retryable {
        Action::requeue(ctx.settings.error_requeue)
    } else {
        Action::requeue(ctx.settings.permanent_error_requeue)
    }
}

async fn reconcile_paused(
    original: &ExtensionConfig,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    debug!("reconciliation is paused");

    let mut paused = original.clone();
    paused.set_condition(Condition::new(
        PAUSED_CONDITION,
        ConditionStatus::True,
        PAUSED_REASON,
        "",
    ));
    if paused.status != original.status {
        ctx.kube.patch_extension_config(original, &paused).await?;
    }
    Ok(Action::await_change())
}

/// Result of one pass of injection, discovery and patch
pub(crate) struct SyncOutcome {
    /// The config as patched, carrying discovered handlers and conditions
    pub config: ExtensionConfig,
    /// Failures of individual steps; the pass kept going past each of them
    pub errors: Vec<ReconcileError>,
}

/// Inject the CA bundle, discover handlers and persist the result.
///
/// Step failures are recorded as conditions and collected in the outcome.
/// Only a deadline expiring aborts the pass early.
pub(crate) async fn sync_extension_config(
    original: &ExtensionConfig,
    ctx: &Context,
) -> Result<SyncOutcome, ReconcileError> {
    let name = original.name_any();
    let mut errors: Vec<ReconcileError> = Vec::new();
    let mut config = original.clone();

    let injected = with_deadline(
        ctx.settings.secret_timeout,
        "reading CA secret",
        &name,
        reconcile_ca_bundle(ctx.kube.as_ref(), &mut config),
    )
    .await?;
    let ca_condition = match injected {
        Ok(None) => None,
        Ok(Some(secret)) => Some(Condition::new(
            CA_BUNDLE_INJECTED_CONDITION,
            ConditionStatus::True,
            CA_BUNDLE_INJECTED_REASON,
            format!("CA bundle injected from secret {secret}"),
        )),
        Err(e) => {
            warn!(error = %e, "CA bundle injection failed");
            let condition = Condition::new(
                CA_BUNDLE_INJECTED_CONDITION,
                ConditionStatus::False,
                CA_BUNDLE_INJECTION_FAILED_REASON,
                e.to_string(),
            );
            errors.push(e.into());
            Some(condition)
        }
    };

    let (mut discovered, discovery_error) = with_deadline(
        ctx.settings.discovery_timeout,
        "discovery",
        &name,
        discover_extension_config(ctx.discovery.as_ref(), &config),
    )
    .await?;
    if let Some(e) = discovery_error {
        warn!(error = %e, "discovery failed");
        errors.push(e.into());
    }

    match ca_condition {
        Some(condition) => discovered.set_condition(condition),
        None => discovered.remove_condition(CA_BUNDLE_INJECTED_CONDITION),
    }
    discovered.set_condition(Condition::new(
        PAUSED_CONDITION,
        ConditionStatus::False,
        NOT_PAUSED_REASON,
        "",
    ));

    if let Err(e) = ctx.kube.patch_extension_config(original, &discovered).await {
        warn!(error = %e, "failed to patch ExtensionConfig");
        errors.push(e.into());
    }

    Ok(SyncOutcome {
        config: discovered,
        errors,
    })
}

/// Call discovery for `config` and record the result as a condition.
///
/// On failure the returned config keeps its previous handlers and carries a
/// False `Discovered` condition; the error is returned alongside it.
pub async fn discover_extension_config(
    discovery: &dyn DiscoveryClient,
    config: &ExtensionConfig,
) -> (ExtensionConfig, Option<Error>) {
    match discovery.discover(config.clone()).await {
        Ok(mut discovered) => {
            discovered.set_condition(Condition::new(
                DISCOVERED_CONDITION,
                ConditionStatus::True,
                DISCOVERED_REASON,
                "",
            ));
            (discovered, None)
        }
        Err(e) => {
            let mut unchanged = config.clone();
            unchanged.set_condition(Condition::new(
                DISCOVERED_CONDITION,
                ConditionStatus::False,
                NOT_DISCOVERED_REASON,
                format!("Error in discovery: {e}"),
            ));
            (unchanged, Some(e))
        }
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    step: &str,
    config: &str,
    fut: impl Future<Output = T>,
) -> Result<T, ReconcileError> {
    tokio::time::timeout(deadline, fut).await.map_err(|_| {
        ReconcileError::Internal(format!(
            "{step} for ExtensionConfig {config} timed out after {}s",
            deadline.as_secs()
        ))
    })
}
