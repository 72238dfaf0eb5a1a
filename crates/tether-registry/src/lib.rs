//! Runtime extension registry
//!
//! Indexes the handlers discovered from ExtensionConfigs by handler name and
//! by (group, hook). The registry starts cold and only serves reads and
//! writes after a single successful warm-up with every pre-existing
//! ExtensionConfig.

#![deny(missing_docs)]

pub mod catalog;
mod error;
mod registry;

pub use catalog::{GroupVersion, GroupVersionHook};
pub use error::RegistryError;
pub use registry::{ExtensionRegistration, ExtensionRegistry, RegistryPhase};
