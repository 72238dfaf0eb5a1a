//! ExtensionConfig CRD
//!
//! An ExtensionConfig declares where a runtime extension server lives and how
//! to trust it. The operator discovers the handlers the server implements and
//! records them in `status.handlers`; those handlers are what the in-memory
//! registry serves to the rest of the control plane.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Metadata, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, remove_condition, set_condition, Condition, ConditionStatus};
use crate::{INJECT_CA_FROM_SECRET_ANNOTATION, PAUSED_ANNOTATION};

/// Condition reporting the outcome of the last discovery call
pub const DISCOVERED_CONDITION: &str = "Discovered";
/// Reason used when discovery succeeded
pub const DISCOVERED_REASON: &str = "Discovered";
/// Reason used when discovery failed
pub const NOT_DISCOVERED_REASON: &str = "NotDiscovered";

/// Condition reporting the outcome of CA bundle injection
pub const CA_BUNDLE_INJECTED_CONDITION: &str = "CABundleInjected";
/// Reason used when the CA bundle was copied from the referenced Secret
pub const CA_BUNDLE_INJECTED_REASON: &str = "CABundleInjected";
/// Reason used when the CA bundle could not be injected
pub const CA_BUNDLE_INJECTION_FAILED_REASON: &str = "CABundleInjectionFailed";

/// Condition reporting whether reconciliation is paused
pub const PAUSED_CONDITION: &str = "Paused";
/// Reason used when the paused annotation is present
pub const PAUSED_REASON: &str = "Paused";
/// Reason used when the object is reconciled normally
pub const NOT_PAUSED_REASON: &str = "NotPaused";

/// ExtensionConfig registers a runtime extension server.
///
/// Example:
/// ```yaml
/// apiVersion: runtime.cluster.x-k8s.io/v1alpha1
/// kind: ExtensionConfig
/// metadata:
///   name: scaler-hooks
///   annotations:
///     runtime.cluster.x-k8s.io/inject-ca-from-secret: hooks/scaler-hooks-cert
/// spec:
///   clientConfig:
///     service:
///       namespace: hooks
///       name: scaler-hooks
///       port: 8443
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "runtime.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "ExtensionConfig",
    plural = "extensionconfigs",
    shortname = "ext",
    status = "ExtensionConfigStatus",
    printcolumn = r#"{"name":"Discovered","type":"string","jsonPath":".status.conditions[?(@.type==\"Discovered\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfigSpec {
    /// How to reach the extension server
    pub client_config: ClientConfig,

    /// Namespaces whose objects the extension is called for (all when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "label_selector_schema")]
    pub namespace_selector: Option<LabelSelector>,

    /// Opaque key/value settings passed to every handler call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Connection descriptor for an extension server
///
/// Exactly one of `url` and `service` should be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Full URL of the extension server (`https://host:port/path`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// In-cluster Service fronting the extension server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,

    /// PEM encoded CA bundle used to verify the server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "ca_bundle_schema")]
    pub ca_bundle: Option<ByteString>,
}

fn ca_bundle_schema(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        format: Some("byte".to_string()),
        metadata: Some(Box::new(Metadata {
            description: Some("Base64 encoded PEM CA bundle".to_string()),
            ..Default::default()
        })),
        ..Default::default()
    })
}

// Label selectors are validated by the API server, not by this schema
fn label_selector_schema(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into(),
        ..Default::default()
    })
}

/// Reference to a Kubernetes Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    /// Namespace of the Service
    pub namespace: String,

    /// Name of the Service
    pub name: String,

    /// URL path prefix sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Service port (defaults to 443)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// ExtensionConfig status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfigStatus {
    /// Handlers reported by the last successful discovery
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<ExtensionHandler>,

    /// Observed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A single handler implemented by an extension server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionHandler {
    /// Unique handler name
    pub name: String,

    /// Hook the handler is called for
    pub request_hook: RequestHook,

    /// Timeout for a single call, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,

    /// What callers do when the handler fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

/// Hook identified by its API version string and name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestHook {
    /// `<group>/<version>` of the hook API
    pub api_version: String,

    /// Hook name (e.g. BeforeClusterUpgrade)
    pub hook: String,
}

/// Failure handling for calls to a handler
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Errors are ignored and the caller proceeds
    Ignore,
    /// Errors fail the calling operation
    #[default]
    Fail,
}

impl ExtensionConfig {
    /// Secret reference from the CA injection annotation, if any
    pub fn inject_ca_from_secret(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(INJECT_CA_FROM_SECRET_ANNOTATION))
            .map(String::as_str)
    }

    /// Whether reconciliation is paused by annotation
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
    }

    /// Whether the object is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Handlers from the last successful discovery
    pub fn handlers(&self) -> &[ExtensionHandler] {
        self.status
            .as_ref()
            .map(|s| s.handlers.as_slice())
            .unwrap_or_default()
    }

    /// Observed conditions
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(self.conditions(), type_)
    }

    /// Whether the named condition is present and True
    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Set a condition, creating the status if needed
    pub fn set_condition(&mut self, condition: Condition) {
        let status = self.status.get_or_insert_with(Default::default);
        set_condition(&mut status.conditions, condition);
    }

    /// Drop the named condition
    pub fn remove_condition(&mut self, type_: &str) {
        if let Some(status) = self.status.as_mut() {
            remove_condition(&mut status.conditions, type_);
        }
    }

    /// Replace the discovered handlers, creating the status if needed
    pub fn set_handlers(&mut self, handlers: Vec<ExtensionHandler>) {
        self.status.get_or_insert_with(Default::default).handlers = handlers;
    }
}
