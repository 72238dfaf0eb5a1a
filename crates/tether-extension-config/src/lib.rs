//! ExtensionConfig controller
//!
//! Keeps the [`ExtensionRegistry`](tether_registry::ExtensionRegistry) in
//! sync with ExtensionConfig objects:
//!
//! - warm-up fills the registry from every existing config before any
//!   reconcile runs
//! - each reconcile injects the CA bundle, runs discovery, patches status and
//!   registers the discovered handlers
//! - Secret changes requeue the configs that inject their CA from them

pub mod ca_bundle;
pub mod controller;
pub mod secret_index;
pub mod warmup;

pub use ca_bundle::{reconcile_ca_bundle, SecretRef};
pub use controller::{
    discover_extension_config, error_policy, reconcile, reconcile_by_name, reconcile_delete,
    Context, ControllerSettings, DiscoveryClient, KubeClient, KubeClientImpl,
};
pub use secret_index::{secret_to_extension_configs, SecretIndex};
pub use warmup::warm_up_registry;
