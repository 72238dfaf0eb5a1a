//! Readiness-gated registry of runtime extension handlers
//!
//! Writers take the lock exclusively for one in-memory critical section;
//! nothing here performs I/O. Updates for one ExtensionConfig are validated
//! into a local candidate set before the shared map is touched, so a config
//! with a malformed handler never leaves a partial set behind.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use tether_common::crd::{ClientConfig, ExtensionConfig, FailurePolicy};

use crate::catalog::{GroupVersion, GroupVersionHook};
use crate::RegistryError;

/// A handler registered from an ExtensionConfig
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionRegistration {
    /// Globally unique handler name
    pub name: String,
    /// Name of the ExtensionConfig that declared the handler
    pub extension_config_name: String,
    /// Hook the handler implements
    pub group_version_hook: GroupVersionHook,
    /// Connection details copied from the owning ExtensionConfig
    pub client_config: ClientConfig,
    /// Timeout for a single call, in seconds
    pub timeout_seconds: Option<i32>,
    /// What callers do when the handler fails
    pub failure_policy: Option<FailurePolicy>,
}

/// Lifecycle of the registry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegistryPhase {
    /// Not warmed up; only `warm_up` and `is_ready` are allowed
    #[default]
    Cold,
    /// Warmed up and serving
    Ready,
}

#[derive(Debug, Default)]
struct RegistryState {
    phase: RegistryPhase,
    items: HashMap<String, ExtensionRegistration>,
}

impl RegistryState {
    fn is_ready(&self) -> bool {
        self.phase == RegistryPhase::Ready
    }

    fn remove_owned_by(&mut self, config_name: &str) -> usize {
        let before = self.items.len();
        self.items
            .retain(|_, r| r.extension_config_name != config_name);
        before - self.items.len()
    }

    fn replace(&mut self, config_name: &str, registrations: Vec<ExtensionRegistration>) {
        self.remove_owned_by(config_name);
        for registration in registrations {
            self.items.insert(registration.name.clone(), registration);
        }
    }
}

/// In-memory index of runtime extension handlers
///
/// Created cold at startup, warmed up once with every existing
/// ExtensionConfig, then kept current by the ExtensionConfig controller.
/// Shared across the process as `Arc<ExtensionRegistry>`.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    state: RwLock<RegistryState>,
}

impl ExtensionRegistry {
    /// Create a cold registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the registry with all ExtensionConfigs known at startup.
    ///
    /// Every config is attempted; if any of them fails validation the map is
    /// reset to empty, the registry stays cold, and all errors are returned
    /// together. On success the registry becomes ready.
    pub fn warm_up(&self, configs: &[ExtensionConfig]) -> Result<(), RegistryError> {
        let mut state = self.state.write();

        if state.is_ready() {
            return Err(RegistryError::already_warmed_up());
        }

        let mut errors = Vec::new();
        for config in configs {
            match build_registrations(config) {
                Ok(registrations) => state.replace(config_name(config), registrations),
                Err(e) => errors.push(e),
            }
        }

        if let Some(err) = RegistryError::aggregate(errors) {
            state.items.clear();
            warn!(error = %err, "registry warm-up failed, registry stays cold");
            return Err(err);
        }

        state.phase = RegistryPhase::Ready;
        info!(
            extension_configs = configs.len(),
            handlers = state.items.len(),
            "registry warmed up"
        );
        Ok(())
    }

    /// Whether warm-up has completed
    pub fn is_ready(&self) -> bool {
        self.state.read().is_ready()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> RegistryPhase {
        self.state.read().phase
    }

    /// Register all handlers of `config`, replacing whatever it registered before.
    ///
    /// Previous registrations of `config` are dropped first. If any handler
    /// declares an unparseable API version none of the new handlers are
    /// inserted and the parse errors are returned together.
    pub fn add(&self, config: &ExtensionConfig) -> Result<(), RegistryError> {
        let mut state = self.state.write();

        if !state.is_ready() {
            return Err(RegistryError::not_warmed_up("Add"));
        }

        let name = config_name(config);
        let registrations = match build_registrations(config) {
            Ok(registrations) => registrations,
            Err(e) => {
                let removed = state.remove_owned_by(name);
                debug!(extension_config = %name, handlers = removed, "dropped handlers of invalid ExtensionConfig");
                return Err(e);
            }
        };
        let count = registrations.len();
        state.replace(name, registrations);

        debug!(extension_config = %name, handlers = count, "registered extension handlers");
        Ok(())
    }

    /// Remove every handler registered by `config`
    pub fn remove(&self, config: &ExtensionConfig) -> Result<(), RegistryError> {
        let mut state = self.state.write();

        if !state.is_ready() {
            return Err(RegistryError::not_warmed_up("Remove"));
        }

        let name = config_name(config);
        let removed = state.remove_owned_by(name);
        debug!(extension_config = %name, handlers = removed, "unregistered extension handlers");
        Ok(())
    }

    /// All handlers for `hook` in API `group`, across every version.
    ///
    /// Order is unspecified.
    pub fn list(&self, group: &str, hook: &str) -> Result<Vec<ExtensionRegistration>, RegistryError> {
        if group.is_empty() {
            return Err(RegistryError::InvalidArgument {
                operation: "List",
                argument: "group",
            });
        }
        if hook.is_empty() {
            return Err(RegistryError::InvalidArgument {
                operation: "List",
                argument: "hook",
            });
        }

        let state = self.state.read();
        if !state.is_ready() {
            return Err(RegistryError::not_warmed_up("List"));
        }

        Ok(state
            .items
            .values()
            .filter(|r| r.group_version_hook.matches(group, hook))
            .cloned()
            .collect())
    }

    /// The handler registered under `name`
    pub fn get(&self, name: &str) -> Result<ExtensionRegistration, RegistryError> {
        let state = self.state.read();

        if !state.is_ready() {
            return Err(RegistryError::not_warmed_up("Get"));
        }

        state
            .items
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn config_name(config: &ExtensionConfig) -> &str {
    config.metadata.name.as_deref().unwrap_or_default()
}

/// Validate every handler of `config` into registrations without touching shared state
fn build_registrations(config: &ExtensionConfig) -> Result<Vec<ExtensionRegistration>, RegistryError> {
    let name = config_name(config);
    let mut errors = Vec::new();
    let mut registrations = Vec::with_capacity(config.handlers().len());

    for handler in config.handlers() {
        let gv = match GroupVersion::parse(&handler.request_hook.api_version) {
            Ok(gv) => gv,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        registrations.push(ExtensionRegistration {
            name: handler.name.clone(),
            extension_config_name: name.to_string(),
            group_version_hook: GroupVersionHook::new(gv, handler.request_hook.hook.clone()),
            client_config: config.spec.client_config.clone(),
            timeout_seconds: handler.timeout_seconds,
            failure_policy: handler.failure_policy,
        });
    }

    match RegistryError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(registrations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::crd::{ExtensionConfigSpec, ExtensionHandler, RequestHook};

    fn handler(name: &str, api_version: &str, hook: &str) -> ExtensionHandler {
        ExtensionHandler {
            name: name.to_string(),
            request_hook: RequestHook {
                api_version: api_version.to_string(),
                hook: hook.to_string(),
            },
            timeout_seconds: Some(10),
            failure_policy: Some(FailurePolicy::Fail),
        }
    }

    fn config(name: &str, handlers: Vec<ExtensionHandler>) -> ExtensionConfig {
        let mut config = ExtensionConfig::new(name, ExtensionConfigSpec::default());
        config.spec.client_config.url = Some(format!("https://{name}.example.com"));
        config.set_handlers(handlers);
        config
    }

    fn ready(configs: &[ExtensionConfig]) -> ExtensionRegistry {
        let registry = ExtensionRegistry::new();
        registry.warm_up(configs).expect("warm-up should succeed");
        registry
    }

    #[test]
    fn new_registry_is_cold() {
        let registry = ExtensionRegistry::new();
        assert!(!registry.is_ready());
        assert_eq!(registry.phase(), RegistryPhase::Cold);
    }

    #[test]
    fn cold_registry_rejects_reads_and_writes() {
        let registry = ExtensionRegistry::new();
        let cfg = config("a", vec![handler("h1", "g/v1", "BeforeScale")]);

        assert!(registry.add(&cfg).expect_err("add").is_invalid_operation());
        assert!(registry.remove(&cfg).expect_err("remove").is_invalid_operation());
        assert!(registry
            .list("g", "BeforeScale")
            .expect_err("list")
            .is_invalid_operation());
        assert!(registry.get("h1").expect_err("get").is_invalid_operation());
    }

    #[test]
    fn warm_up_twice_is_invalid() {
        let registry = ready(&[]);
        let err = registry.warm_up(&[]).expect_err("second warm-up");
        assert_eq!(
            err.to_string(),
            "invalid operation: WarmUp cannot be called on a registry which has already been warmed up"
        );
    }

    #[test]
    fn failed_warm_up_leaves_registry_empty_and_cold() {
        let registry = ExtensionRegistry::new();
        let good = config("a", vec![handler("h1", "g/v1", "BeforeScale")]);
        let bad = config("b", vec![handler("h2", "g/v1/extra", "BeforeScale")]);

        let err = registry.warm_up(&[good, bad]).expect_err("bad config");
        assert!(err.is_validation());
        assert!(!registry.is_ready());
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_warm_up_can_be_retried() {
        let registry = ExtensionRegistry::new();
        let bad = config("b", vec![handler("h2", "a/b/c", "BeforeScale")]);
        registry.warm_up(&[bad]).expect_err("bad config");

        let good = config("a", vec![handler("h1", "g/v1", "BeforeScale")]);
        registry.warm_up(&[good]).expect("retry succeeds");
        assert!(registry.is_ready());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn warm_up_aggregates_errors_from_every_config() {
        let registry = ExtensionRegistry::new();
        let a = config("a", vec![handler("h1", "x/y/z", "BeforeScale")]);
        let b = config("b", vec![handler("h2", "p/q/r", "BeforeScale")]);

        match registry.warm_up(&[a, b]).expect_err("two bad configs") {
            RegistryError::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn add_copies_handler_and_connection_details() {
        let registry = ready(&[]);
        let cfg = config("a", vec![handler("h1", "g/v1", "BeforeScale")]);
        registry.add(&cfg).expect("add");

        let r = registry.get("h1").expect("registered");
        assert_eq!(r.extension_config_name, "a");
        assert_eq!(r.group_version_hook.group, "g");
        assert_eq!(r.group_version_hook.version, "v1");
        assert_eq!(r.group_version_hook.hook, "BeforeScale");
        assert_eq!(r.client_config.url.as_deref(), Some("https://a.example.com"));
        assert_eq!(r.timeout_seconds, Some(10));
        assert_eq!(r.failure_policy, Some(FailurePolicy::Fail));
    }

    #[test]
    fn add_replaces_previous_handlers_of_same_owner() {
        let registry = ready(&[]);
        registry
            .add(&config("a", vec![handler("h1", "g/v1", "BeforeScale")]))
            .expect("first add");
        registry
            .add(&config("a", vec![handler("h2", "g/v1", "BeforeScale")]))
            .expect("second add");

        assert!(matches!(
            registry.get("h1"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.get("h2").is_ok());
    }

    #[test]
    fn malformed_handler_drops_owner_but_not_others() {
        let registry = ready(&[]);
        registry
            .add(&config("a", vec![handler("h1", "g/v1", "BeforeScale")]))
            .expect("add a");
        registry
            .add(&config("b", vec![handler("h2", "g/v1", "BeforeScale")]))
            .expect("add b");

        let broken = config(
            "b",
            vec![
                handler("h3", "g/v1", "BeforeScale"),
                handler("h4", "g/v1/v2", "BeforeScale"),
            ],
        );
        let err = registry.add(&broken).expect_err("malformed");
        assert!(err.is_validation());

        assert!(registry.get("h1").is_ok());
        assert!(matches!(
            registry.get("h2"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.get("h3").is_err());
        assert!(registry.get("h4").is_err());
    }

    #[test]
    fn remove_without_registrations_is_noop() {
        let registry = ready(&[]);
        registry
            .remove(&config("ghost", vec![]))
            .expect("remove of unknown owner");
    }

    #[test]
    fn duplicate_name_across_owners_last_wins() {
        let registry = ready(&[]);
        registry
            .add(&config("a", vec![handler("shared", "g/v1", "BeforeScale")]))
            .expect("add a");
        registry
            .add(&config("b", vec![handler("shared", "g/v1", "AfterProvision")]))
            .expect("add b");

        let r = registry.get("shared").expect("registered");
        assert_eq!(r.extension_config_name, "b");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_rejects_empty_arguments() {
        let registry = ready(&[]);
        assert_eq!(
            registry.list("", "BeforeScale").expect_err("empty group"),
            RegistryError::InvalidArgument {
                operation: "List",
                argument: "group"
            }
        );
        assert_eq!(
            registry.list("g", "").expect_err("empty hook"),
            RegistryError::InvalidArgument {
                operation: "List",
                argument: "hook"
            }
        );
    }

    #[test]
    fn get_unknown_name_is_not_found() {
        let registry = ready(&[]);
        assert_eq!(
            registry.get("missing").expect_err("unknown"),
            RegistryError::NotFound {
                name: "missing".to_string()
            }
        );
    }
}
