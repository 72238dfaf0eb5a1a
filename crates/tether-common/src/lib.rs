//! Common types for Tether: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod retry;
pub mod telemetry;

pub use error::{Error, ReconcileError};

/// Field manager used for every patch the operator sends
pub const FIELD_MANAGER: &str = "tether-extension-config-controller";

/// Annotation naming the `<namespace>/<name>` Secret whose CA is injected into an ExtensionConfig
pub const INJECT_CA_FROM_SECRET_ANNOTATION: &str = "runtime.cluster.x-k8s.io/inject-ca-from-secret";

/// Data key in a Secret holding a PEM encoded CA certificate
pub const TLS_CA_KEY: &str = "ca.crt";

/// Annotation that pauses reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label used to restrict which objects this operator instance watches
pub const WATCH_FILTER_LABEL: &str = "cluster.x-k8s.io/watch-filter";
