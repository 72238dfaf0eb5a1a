//! HTTP discovery against extension servers
//!
//! Discovery is a POST of a `DiscoveryRequest` to
//! `<endpoint>/hooks.runtime.cluster.x-k8s.io/v1alpha1/discovery`. The
//! response lists the handlers the server implements; they are written into
//! the ExtensionConfig status with the config name appended so handler names
//! stay unique across servers.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tether_common::crd::{ClientConfig, ExtensionConfig, ExtensionHandler, FailurePolicy};
use tether_common::Error;
use tether_extension_config::DiscoveryClient;
use tracing::debug;

/// API version of the hooks API discovery is part of
pub const HOOKS_API_VERSION: &str = "hooks.runtime.cluster.x-k8s.io/v1alpha1";

/// Port used for Service references that do not name one
pub const DEFAULT_SERVICE_PORT: i32 = 443;

/// Handler timeout applied when the server does not set one
pub const DEFAULT_HANDLER_TIMEOUT_SECONDS: i32 = 10;

/// Largest handler timeout a server may declare
pub const MAX_HANDLER_TIMEOUT_SECONDS: i32 = 30;

const DISCOVERY_HOOK: &str = "discovery";
const RESPONSE_SUCCESS: &str = "Success";

/// Body sent to an extension server's discovery endpoint
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    /// Always [`HOOKS_API_VERSION`]
    pub api_version: String,
    /// Always `DiscoveryRequest`
    pub kind: String,
    /// Settings from the ExtensionConfig
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl DiscoveryRequest {
    fn for_config(config: &ExtensionConfig) -> Self {
        Self {
            api_version: HOOKS_API_VERSION.to_string(),
            kind: "DiscoveryRequest".to_string(),
            settings: config.spec.settings.clone(),
        }
    }
}

/// Body returned by an extension server's discovery endpoint
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    /// `Success` or `Failure`
    #[serde(default)]
    pub status: String,
    /// Human readable detail, set on failure
    #[serde(default)]
    pub message: String,
    /// Handlers implemented by the server
    #[serde(default)]
    pub handlers: Vec<ExtensionHandler>,
}

/// [`DiscoveryClient`] calling extension servers over HTTPS
pub struct HttpDiscoveryClient {
    timeout: Duration,
}

impl HttpDiscoveryClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn http_client(&self, config: &ExtensionConfig) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);

        if let Some(ca) = &config.spec.client_config.ca_bundle {
            let cert = reqwest::Certificate::from_pem(&ca.0).map_err(|e| {
                Error::discovery_permanent(config.name_any(), format!("invalid caBundle: {e}"))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        builder.build().map_err(|e| {
            Error::discovery(
                config.name_any(),
                format!("failed to build HTTP client: {e}"),
            )
        })
    }
}

#[async_trait]
impl DiscoveryClient for HttpDiscoveryClient {
    async fn discover(&self, mut config: ExtensionConfig) -> Result<ExtensionConfig, Error> {
        let name = config.name_any();
        let url = discovery_url(&config.spec.client_config)
            .map_err(|msg| Error::discovery_permanent(&name, msg))?;
        let http = self.http_client(&config)?;

        debug!(url = %url, "calling discovery endpoint");

        let response = http
            .post(url)
            .json(&DiscoveryRequest::for_config(&config))
            .send()
            .await
            .map_err(|e| Error::discovery(&name, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::discovery(
                &name,
                format!("unexpected HTTP status {status}: {body}"),
            ));
        }

        let body: DiscoveryResponse = response
            .json()
            .await
            .map_err(|e| Error::discovery(&name, format!("invalid response body: {e}")))?;

        let handlers = handlers_from_response(&name, body)?;
        config.set_handlers(handlers);
        Ok(config)
    }
}

/// Discovery endpoint for a client config.
///
/// `url` wins over `service` when both are set. Service endpoints are
/// `https://<name>.<namespace>.svc:<port><path>`.
pub fn discovery_url(client_config: &ClientConfig) -> Result<reqwest::Url, String> {
    let base = match (&client_config.url, &client_config.service) {
        (Some(url), _) => url.trim_end_matches('/').to_string(),
        (None, Some(service)) => {
            let port = service.port.unwrap_or(DEFAULT_SERVICE_PORT);
            let path = service
                .path
                .as_deref()
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
                .map(|p| format!("/{p}"))
                .unwrap_or_default();
            format!(
                "https://{}.{}.svc:{port}{path}",
                service.name, service.namespace
            )
        }
        (None, None) => return Err("clientConfig must set either url or service".to_string()),
    };

    let raw = format!("{base}/{HOOKS_API_VERSION}/{DISCOVERY_HOOK}");
    reqwest::Url::parse(&raw).map_err(|e| format!("invalid extension URL {raw:?}: {e}"))
}

/// Validate a discovery response and turn it into status handlers.
///
/// Handler names get `.<config name>` appended; timeouts and failure
/// policies are defaulted.
pub fn handlers_from_response(
    config_name: &str,
    response: DiscoveryResponse,
) -> Result<Vec<ExtensionHandler>, Error> {
    if response.status != RESPONSE_SUCCESS {
        return Err(Error::discovery(
            config_name,
            format!(
                "server returned status {:?}: {}",
                response.status, response.message
            ),
        ));
    }

    let problems = validate_handlers(&response.handlers);
    if !problems.is_empty() {
        return Err(Error::discovery_permanent(
            config_name,
            format!("invalid discovery response: {}", problems.join(", ")),
        ));
    }

    Ok(response
        .handlers
        .into_iter()
        .map(|handler| ExtensionHandler {
            name: format!("{}.{config_name}", handler.name),
            request_hook: handler.request_hook,
            timeout_seconds: Some(
                handler
                    .timeout_seconds
                    .unwrap_or(DEFAULT_HANDLER_TIMEOUT_SECONDS),
            ),
            failure_policy: Some(handler.failure_policy.unwrap_or(FailurePolicy::Fail)),
        })
        .collect())
}

fn validate_handlers(handlers: &[ExtensionHandler]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut problems = Vec::new();
    for handler in handlers {
        if handler.name.is_empty() {
            problems.push("handler name must not be empty".to_string());
        } else if !seen.insert(handler.name.as_str()) {
            problems.push(format!("duplicate handler name {:?}", handler.name));
        }
        if let Some(timeout) = handler.timeout_seconds {
            if !(0..=MAX_HANDLER_TIMEOUT_SECONDS).contains(&timeout) {
                problems.push(format!(
                    "handler {:?} timeoutSeconds {timeout} must be between 0 and {MAX_HANDLER_TIMEOUT_SECONDS}",
                    handler.name
                ));
            }
        }
    }
    problems
}
