//! Reverse index from CA Secrets to the ExtensionConfigs that inject them
//!
//! Secrets are watched metadata-only, so a Secret event carries nothing but
//! its namespace and name. The index answers "which configs reference this
//! Secret" without listing every ExtensionConfig on each event.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use tether_common::crd::ExtensionConfig;
use tracing::trace;

use crate::ca_bundle::SecretRef;

#[derive(Default)]
struct IndexState {
    by_secret: HashMap<SecretRef, BTreeSet<String>>,
    by_config: HashMap<String, SecretRef>,
}

impl IndexState {
    fn unlink(&mut self, config_name: &str) {
        let Some(previous) = self.by_config.remove(config_name) else {
            return;
        };
        if let Some(names) = self.by_secret.get_mut(&previous) {
            names.remove(config_name);
            if names.is_empty() {
                self.by_secret.remove(&previous);
            }
        }
    }

    fn link(&mut self, config_name: &str, secret: SecretRef) {
        self.by_secret
            .entry(secret.clone())
            .or_default()
            .insert(config_name.to_string());
        self.by_config.insert(config_name.to_string(), secret);
    }
}

/// Thread-safe Secret to ExtensionConfig index
#[derive(Default)]
pub struct SecretIndex {
    state: RwLock<IndexState>,
}

impl SecretIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the Secret a config currently references.
    ///
    /// A config without a well-formed inject annotation is dropped from the
    /// index.
    pub fn update(&self, config: &ExtensionConfig) {
        let name = config.name_any();
        let secret = config.inject_ca_from_secret().and_then(SecretRef::parse);

        let mut state = self.state.write();
        state.unlink(&name);
        if let Some(secret) = secret {
            trace!(extension_config = %name, %secret, "indexing CA secret");
            state.link(&name, secret);
        }
    }

    /// Forget a config
    pub fn remove(&self, config_name: &str) {
        self.state.write().unlink(config_name);
    }

    /// Replace the whole index from a full listing
    pub fn rebuild(&self, configs: &[ExtensionConfig]) {
        let mut fresh = IndexState::default();
        for config in configs {
            if let Some(secret) = config.inject_ca_from_secret().and_then(SecretRef::parse) {
                fresh.link(&config.name_any(), secret);
            }
        }
        *self.state.write() = fresh;
    }

    /// Names of configs that inject their CA from `secret`
    pub fn configs_for(&self, secret: &SecretRef) -> Vec<String> {
        self.state
            .read()
            .by_secret
            .get(secret)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of configs currently referencing a Secret
    pub fn len(&self) -> usize {
        self.state.read().by_config.len()
    }

    /// Whether no config references a Secret
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map a Secret event to reconcile requests for every config injecting it.
///
/// Generic over the watched representation so it works for both full
/// Secrets and metadata-only watches.
pub fn secret_to_extension_configs<S>(
    index: Arc<SecretIndex>,
) -> impl Fn(S) -> Vec<ObjectRef<ExtensionConfig>> + Send + Sync + Clone + 'static
where
    S: Resource,
{
    move |secret: S| {
        let Some(namespace) = secret.namespace() else {
            return Vec::new();
        };
        let secret = SecretRef::new(namespace, secret.name_any());
        index
            .configs_for(&secret)
            .iter()
            .map(|name| ObjectRef::new(name))
            .collect()
    }
}
