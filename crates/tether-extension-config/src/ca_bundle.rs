//! CA bundle injection from an annotated Secret
//!
//! An ExtensionConfig carrying the inject-ca-from-secret annotation gets its
//! `spec.clientConfig.caBundle` overwritten with the `ca.crt` entry of the
//! referenced Secret on every reconcile.

use std::fmt;

use kube::ResourceExt;
use tether_common::crd::ExtensionConfig;
use tether_common::{Error, INJECT_CA_FROM_SECRET_ANNOTATION, TLS_CA_KEY};
use tracing::debug;

use crate::controller::KubeClient;

/// Namespaced reference to a Secret
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    /// Secret namespace
    pub namespace: String,
    /// Secret name
    pub name: String,
}

impl SecretRef {
    /// Build from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `<namespace>/<name>`, splitting on the first `/`.
    ///
    /// Both halves must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (namespace, name) = raw.split_once('/')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resolve the Secret named by the inject annotation, if present.
///
/// Returns `Ok(None)` when the annotation is absent and an error when it is
/// malformed.
pub fn secret_ref_for(config: &ExtensionConfig) -> Result<Option<SecretRef>, Error> {
    let Some(raw) = config.inject_ca_from_secret() else {
        return Ok(None);
    };
    SecretRef::parse(raw).map(Some).ok_or_else(|| {
        Error::ca_bundle(
            config.name_any(),
            format!(
                "failed to parse {INJECT_CA_FROM_SECRET_ANNOTATION} annotation value \"{raw}\": expected <namespace>/<name>"
            ),
        )
    })
}

/// Overwrite `caBundle` from the annotated Secret.
///
/// Returns the Secret the bundle came from, or `None` when the config does
/// not ask for injection. The config is left untouched on error.
pub async fn reconcile_ca_bundle(
    kube: &dyn KubeClient,
    config: &mut ExtensionConfig,
) -> Result<Option<SecretRef>, Error> {
    let Some(secret_ref) = secret_ref_for(config)? else {
        return Ok(None);
    };
    let config_name = config.name_any();

    debug!(secret = %secret_ref, "injecting CA bundle from secret");

    let secret = kube
        .get_secret(&secret_ref.namespace, &secret_ref.name)
        .await
        .map_err(|e| {
            Error::ca_bundle(
                config_name.as_str(),
                format!("failed to get secret {secret_ref}: {e}"),
            )
        })?
        .ok_or_else(|| {
            Error::ca_bundle(
                config_name.as_str(),
                format!("failed to get secret {secret_ref}: not found"),
            )
        })?;

    let ca = secret
        .data
        .as_ref()
        .and_then(|data| data.get(TLS_CA_KEY))
        .ok_or_else(|| {
            Error::ca_bundle(
                config_name.as_str(),
                format!("secret {secret_ref} does not contain a \"{TLS_CA_KEY}\" entry"),
            )
        })?;

    config.spec.client_config.ca_bundle = Some(ca.clone());
    Ok(Some(secret_ref))
}
