//! Tether operator: runs the ExtensionConfig controller and serves the
//! runtime extension registry

#![deny(missing_docs)]

/// Operator settings (CLI flags and environment)
pub mod config;
/// Controller wiring
pub mod controller_runner;
/// HTTP discovery client for extension servers
pub mod discovery;
/// Startup utilities (CRD install)
pub mod startup;

pub use config::OperatorConfig;
pub use discovery::HttpDiscoveryClient;
