//! Registry errors

use thiserror::Error;

/// Errors returned by [`ExtensionRegistry`](crate::ExtensionRegistry)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A required argument was empty
    #[error("invalid argument: when calling {operation} {argument} must not be empty")]
    InvalidArgument {
        /// Registry operation that was called
        operation: &'static str,
        /// The empty argument
        argument: &'static str,
    },

    /// The registry is in the wrong lifecycle phase for the operation
    #[error("invalid operation: {operation} cannot be called on a registry which {reason}")]
    InvalidOperation {
        /// Registry operation that was called
        operation: &'static str,
        /// Why the call is not allowed now
        reason: &'static str,
    },

    /// No handler with the given name is registered
    #[error("runtime extension with name \"{name}\" has not been registered")]
    NotFound {
        /// Requested handler name
        name: String,
    },

    /// A handler declared an unparseable API version
    #[error("failed to parse GroupVersion \"{api_version}\": unexpected GroupVersion string")]
    InvalidGroupVersion {
        /// The offending API version string
        api_version: String,
    },

    /// Several errors collected from one operation
    #[error("[{}]", join_messages(.0))]
    Aggregate(Vec<RegistryError>),
}

fn join_messages(errors: &[RegistryError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl RegistryError {
    pub(crate) fn not_warmed_up(operation: &'static str) -> Self {
        Self::InvalidOperation {
            operation,
            reason: "has not been warmed up",
        }
    }

    pub(crate) fn already_warmed_up() -> Self {
        Self::InvalidOperation {
            operation: "WarmUp",
            reason: "has already been warmed up",
        }
    }

    /// Collapse collected errors into one, `None` when there are none
    pub(crate) fn aggregate(mut errors: Vec<RegistryError>) -> Option<RegistryError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(RegistryError::Aggregate(errors)),
        }
    }

    /// Whether the error reflects a caller sequencing bug rather than bad data
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, RegistryError::InvalidOperation { .. })
    }

    /// Whether the error (or every aggregated error) is a validation failure
    pub fn is_validation(&self) -> bool {
        match self {
            RegistryError::InvalidGroupVersion { .. } => true,
            RegistryError::Aggregate(errors) => errors.iter().all(RegistryError::is_validation),
            _ => false,
        }
    }
}
