//! Registry warm-up at operator start
//!
//! Before any reconcile is served, every existing ExtensionConfig is
//! discovered and the registry is filled in one atomic step. A single bad
//! config fails the whole attempt, which is retried until the deadline.

use kube::ResourceExt;
use tether_common::retry::{retry_with_backoff, RetryConfig};
use tether_common::{Error, ReconcileError};
use tracing::{debug, info};

use crate::controller::{sync_extension_config, Context};

/// Warm up the registry, retrying failed attempts per `retry`.
///
/// Returns the last attempt's error once the retry budget is spent; the
/// registry is then still cold.
pub async fn warm_up_registry(ctx: &Context, retry: &RetryConfig) -> Result<(), Error> {
    if ctx.registry.is_ready() {
        return Ok(());
    }

    retry_with_backoff(retry, "warm_up_registry", || warm_up_once(ctx)).await?;

    info!(
        registrations = ctx.registry.len(),
        "extension registry warmed up"
    );
    Ok(())
}

async fn warm_up_once(ctx: &Context) -> Result<(), Error> {
    let configs = ctx.kube.list_extension_configs().await?;
    ctx.secret_index.rebuild(&configs);

    let mut discovered = Vec::with_capacity(configs.len());
    let mut errors = Vec::new();

    for config in &configs {
        if config.is_deleting() {
            debug!(extension_config = %config.name_any(), "skipping ExtensionConfig being deleted");
            continue;
        }
        // Paused configs keep their last discovered handlers
        if config.is_paused() {
            discovered.push(config.clone());
            continue;
        }

        match sync_extension_config(config, ctx).await {
            Ok(outcome) => {
                errors.extend(outcome.errors);
                discovered.push(outcome.config);
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(err) = ReconcileError::aggregate(errors) {
        return Err(Error::internal_with_context("warmup", err.to_string()));
    }

    ctx.registry
        .warm_up(&discovered)
        .map_err(|e| Error::internal_with_context("warmup", e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tether_common::crd::{
        ExtensionConfig, ExtensionConfigSpec, ExtensionHandler, RequestHook,
    };
    use tether_common::{INJECT_CA_FROM_SECRET_ANNOTATION, PAUSED_ANNOTATION};

    use super::*;
    use crate::ca_bundle::SecretRef;
    use crate::controller::{MockDiscoveryClient, MockKubeClient};

    fn handler(name: &str, api_version: &str) -> ExtensionHandler {
        ExtensionHandler {
            name: name.to_string(),
            request_hook: RequestHook {
                api_version: api_version.to_string(),
                hook: "BeforeScale".to_string(),
            },
            timeout_seconds: None,
            failure_policy: None,
        }
    }

    fn config(name: &str) -> ExtensionConfig {
        ExtensionConfig::new(name, ExtensionConfigSpec::default())
    }

    fn kube_listing(configs: Vec<ExtensionConfig>) -> MockKubeClient {
        let mut mock = MockKubeClient::new();
        mock.expect_list_extension_configs()
            .returning(move || Ok(configs.clone()));
        mock.expect_patch_extension_config().returning(|_, _| Ok(()));
        mock
    }

    /// Discovery answering `<config>-h` on `api_version` for every config
    fn discovery_on(api_version: &'static str) -> MockDiscoveryClient {
        let mut mock = MockDiscoveryClient::new();
        mock.expect_discover().returning(move |mut config| {
            let name = format!("{}-h", config.name_any());
            config.set_handlers(vec![handler(&name, api_version)]);
            Ok(config)
        });
        mock
    }

    fn context(kube: MockKubeClient, discovery: MockDiscoveryClient) -> Context {
        Context::for_testing(Arc::new(kube), Arc::new(discovery))
    }

    #[tokio::test]
    async fn registers_every_existing_config() {
        let ctx = context(
            kube_listing(vec![config("a"), config("b")]),
            discovery_on("g/v1"),
        );

        warm_up_registry(&ctx, &RetryConfig::with_max_attempts(1))
            .await
            .expect("warm-up");

        assert!(ctx.registry.is_ready());
        assert_eq!(ctx.registry.get("a-h").expect("a").extension_config_name, "a");
        assert_eq!(ctx.registry.get("b-h").expect("b").extension_config_name, "b");
    }

    #[tokio::test]
    async fn one_bad_config_leaves_registry_cold() {
        let mut discovery = MockDiscoveryClient::new();
        discovery.expect_discover().returning(|mut config| {
            let api_version = if config.name_any() == "bad" {
                "g/v1/extra"
            } else {
                "g/v1"
            };
            config.set_handlers(vec![handler("h", api_version)]);
            Ok(config)
        });
        let ctx = context(kube_listing(vec![config("good"), config("bad")]), discovery);

        let err = warm_up_registry(&ctx, &RetryConfig::with_max_attempts(1))
            .await
            .expect_err("bad handler");

        assert!(err.to_string().contains("g/v1/extra"));
        assert!(!ctx.registry.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_discovery_failure_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut discovery = MockDiscoveryClient::new();
        discovery.expect_discover().returning(move |mut config| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::discovery(config.name_any(), "server starting"));
            }
            config.set_handlers(vec![handler("a-h", "g/v1")]);
            Ok(config)
        });
        let ctx = context(kube_listing(vec![config("a")]), discovery);

        warm_up_registry(&ctx, &RetryConfig::with_max_attempts(3))
            .await
            .expect("second attempt succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.registry.get("a-h").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let ctx = context(kube_listing(vec![config("a")]), {
            let mut discovery = MockDiscoveryClient::new();
            discovery
                .expect_discover()
                .returning(|config| Err(Error::discovery(config.name_any(), "unreachable")));
            discovery
        });

        let err = warm_up_registry(&ctx, &RetryConfig::with_deadline(Duration::from_secs(5)))
            .await
            .expect_err("never succeeds");

        assert!(err.to_string().contains("unreachable"));
        assert!(!ctx.registry.is_ready());
    }

    #[tokio::test]
    async fn paused_configs_keep_their_handlers_without_discovery() {
        let mut paused = config("paused");
        paused.metadata.annotations = Some(BTreeMap::from([(
            PAUSED_ANNOTATION.to_string(),
            String::new(),
        )]));
        paused.set_handlers(vec![handler("old-h", "g/v1")]);
        let mut discovery = MockDiscoveryClient::new();
        discovery.expect_discover().never();
        let ctx = context(kube_listing(vec![paused]), discovery);

        warm_up_registry(&ctx, &RetryConfig::with_max_attempts(1))
            .await
            .expect("warm-up");

        assert!(ctx.registry.get("old-h").is_ok());
    }

    #[tokio::test]
    async fn seeds_the_secret_index() {
        let mut annotated = config("a");
        annotated.metadata.annotations = Some(BTreeMap::from([(
            INJECT_CA_FROM_SECRET_ANNOTATION.to_string(),
            "ns1/cert".to_string(),
        )]));
        let mut kube = kube_listing(vec![annotated]);
        kube.expect_get_secret().returning(|_, _| {
            Ok(Some(k8s_openapi::api::core::v1::Secret {
                data: Some(BTreeMap::from([(
                    "ca.crt".to_string(),
                    k8s_openapi::ByteString(b"PEM".to_vec()),
                )])),
                ..Default::default()
            }))
        });
        let ctx = context(kube, discovery_on("g/v1"));

        warm_up_registry(&ctx, &RetryConfig::with_max_attempts(1))
            .await
            .expect("warm-up");

        assert_eq!(
            ctx.secret_index.configs_for(&SecretRef::new("ns1", "cert")),
            vec!["a"]
        );
    }

    #[tokio::test]
    async fn already_ready_registry_is_left_alone() {
        // No list expectation: listing would fail the test
        let ctx = context(MockKubeClient::new(), MockDiscoveryClient::new());
        ctx.registry.warm_up(&[]).expect("warm-up");

        warm_up_registry(&ctx, &RetryConfig::with_max_attempts(1))
            .await
            .expect("noop");
    }
}
