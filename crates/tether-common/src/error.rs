//! Error types for the Tether operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the ExtensionConfig they relate to so that log lines and
//! status conditions can name the offending object.

use thiserror::Error;

/// Main error type for Tether operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// CA bundle injection failed
    #[error("failed to reconcile caBundle for {config}: {message}")]
    CaBundle {
        /// Name of the ExtensionConfig being injected
        config: String,
        /// Description of what failed
        message: String,
    },

    /// Discovery call against an extension endpoint failed
    #[error("failed to discover ExtensionConfig {config}: {message}")]
    Discovery {
        /// Name of the ExtensionConfig being discovered
        config: String,
        /// Description of what failed
        message: String,
        /// Whether a later attempt may succeed
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "warmup", "controller", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a CA bundle injection error
    pub fn ca_bundle(config: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CaBundle {
            config: config.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable discovery error
    pub fn discovery(config: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Discovery {
            config: config.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a discovery error caused by an invalid extension response
    pub fn discovery_permanent(config: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Discovery {
            config: config.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Serialization errors and rejected discovery responses need the object
    /// or the extension to change first. Kubernetes 4xx errors are not
    /// retried, except conflicts and throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::CaBundle { .. } => true,
            Error::Discovery { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
            kind: None,
        }
    }
}

/// Error returned from controller reconcile functions
///
/// Carries rendered messages rather than source errors so that one cycle
/// can collect failures from unrelated steps and report them together.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API failure
    #[error("kube error: {0}")]
    Kube(String),

    /// Object or extension content is invalid; retrying soon will not help
    #[error("validation error: {0}")]
    Validation(String),

    /// Any other failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Several failures from one reconciliation cycle
    #[error("[{}]", join_messages(.0))]
    Aggregate(Vec<ReconcileError>),
}

fn join_messages(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReconcileError {
    /// Collapse collected errors into one
    ///
    /// Returns `None` when nothing failed and the single error unchanged when
    /// only one step failed.
    pub fn aggregate(mut errors: Vec<ReconcileError>) -> Option<ReconcileError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ReconcileError::Aggregate(errors)),
        }
    }

    /// Whether retrying soon may succeed
    ///
    /// An aggregate is retryable when any of its parts is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Validation(_) => false,
            ReconcileError::Aggregate(errors) => errors.iter().any(ReconcileError::is_retryable),
            ReconcileError::Kube(_) | ReconcileError::Internal(_) => true,
        }
    }
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        match e {
            e if !e.is_retryable() => ReconcileError::Validation(e.to_string()),
            Error::Kube { source } => ReconcileError::Kube(source.to_string()),
            e => ReconcileError::Internal(e.to_string()),
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(e: kube::Error) -> Self {
        ReconcileError::Kube(e.to_string())
    }
}
