//! Custom Resource Definitions for Tether
//!
//! The operator owns a single CRD, ExtensionConfig, plus the condition types
//! shared by its status.

mod extension_config;
mod types;

pub use extension_config::{
    ClientConfig, ExtensionConfig, ExtensionConfigSpec, ExtensionConfigStatus, ExtensionHandler,
    FailurePolicy, RequestHook, ServiceReference, CA_BUNDLE_INJECTED_CONDITION,
    CA_BUNDLE_INJECTED_REASON, CA_BUNDLE_INJECTION_FAILED_REASON, DISCOVERED_CONDITION,
    DISCOVERED_REASON, NOT_DISCOVERED_REASON, NOT_PAUSED_REASON, PAUSED_CONDITION,
    PAUSED_REASON,
};
pub use types::{find_condition, remove_condition, set_condition, Condition, ConditionStatus};
