//! Unified error type for the dispatch contract
//!
//! Every failure a server, provider or transport can observe through this crate
//! is an [`RpcError`]. Per-recipient delivery failures are deliberately kept
//! out of this type (see [`crate::event::DeliveryError`]) because they are
//! never surfaced to the publisher of an event.

use serde::{Deserialize, Serialize};

/// Unified error type for all dispatch-contract operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
    /// `RpcContext::require` was called for a key with no value in this call
    #[error("Missing context value: {key}")]
    MissingContextValue {
        /// Display label of the missing key
        key: String,
    },

    /// A service definition violates the server contract (name collisions)
    #[error("Contract violation in `{service}`: {message}")]
    ContractViolation {
        /// Service whose definition is invalid
        service: String,
        /// Description of the violation
        message: String,
    },

    /// The dispatcher has no remotely callable endpoint with this name
    #[error("Unknown method `{method}` on `{service}`")]
    UnknownMethod {
        /// Service that received the call
        service: String,
        /// Endpoint name requested by the caller
        method: String,
    },

    /// Arguments did not match the endpoint signature
    #[error("Invalid arguments for `{method}`: {message}")]
    InvalidArguments {
        /// Endpoint being invoked
        method: String,
        /// Description of the mismatch
        message: String,
    },

    /// No registered provider accepted the proxy path
    #[error("Unhandled proxy path: {path}")]
    Unhandled {
        /// Proxy path nobody handles
        path: String,
    },

    /// The call was abandoned after its cancellation signal fired
    #[error("Cancelled: {method}")]
    Cancelled {
        /// Endpoint that observed cancellation
        method: String,
    },

    /// The server method itself failed
    #[error("Server failure in `{method}`: {message}")]
    ServerFailure {
        /// Endpoint that failed
        method: String,
        /// Failure reported by the server
        message: String,
    },

    /// A reply or event payload could not be represented as a dynamic value
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Invalid configuration
    #[error("Config error: {message}")]
    Config {
        /// Error message describing the invalid configuration
        message: String,
    },
}

impl RpcError {
    /// Create a missing context value error
    pub fn missing_context_value(key: impl Into<String>) -> Self {
        Self::MissingContextValue { key: key.into() }
    }

    /// Create a contract violation error
    pub fn contract_violation(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an unknown method error
    pub fn unknown_method(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create an unhandled proxy path error
    pub fn unhandled(path: impl Into<String>) -> Self {
        Self::Unhandled { path: path.into() }
    }

    /// Create a cancelled error
    pub fn cancelled(method: impl Into<String>) -> Self {
        Self::Cancelled {
            method: method.into(),
        }
    }

    /// Wrap a failure returned by a server method
    pub fn server_failure(method: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::ServerFailure {
            method: method.into(),
            message: err.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably recover locally (e.g. by using a default)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingContextValue { .. } | Self::Unhandled { .. } | Self::Cancelled { .. }
        )
    }
}

/// Standard Result type for dispatch-contract operations
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RpcError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}
