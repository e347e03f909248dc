//! Layered error definitions
//!
//! Categorized by source: input / coordination / partition / backend / config

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Input Errors =====
    /// Timestamp is non-finite, unparseable or outside the sane range
    #[error("invalid timestamp {value}: {message}")]
    InvalidTimestamp { value: String, message: String },

    // ===== Coordination Errors =====
    /// Coordination store unreachable after bounded retries
    #[error("coordination unavailable during {operation} after {attempts} attempt(s): {message}")]
    CoordinationUnavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Registration entry in the store could not be decoded
    #[error("corrupt registration at '{path}': {message}")]
    CorruptRegistration { path: String, message: String },

    // ===== Partition Errors =====
    /// Partition was closed by some producer and must not be reopened
    #[error("partition {partition} is closed")]
    PartitionClosed { partition: String },

    /// Partition window deadline has passed
    #[error("partition {partition} expired at {deadline_ms}")]
    PartitionExpired { partition: String, deadline_ms: i64 },

    // ===== Backend Errors =====
    /// Transient transport failure talking to a destination
    #[error("destination '{destination}' transport failure: {message}")]
    BackendTransport {
        destination: String,
        message: String,
    },

    /// Destination refused the batch permanently
    #[error("destination '{destination}' rejected batch: {message}")]
    BackendRejected {
        destination: String,
        message: String,
    },

    /// Destination could not be provisioned
    #[error("failed to provision destination '{destination}': {message}")]
    Provisioning {
        destination: String,
        message: String,
    },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create invalid timestamp error
    pub fn invalid_timestamp(value: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.to_string(),
            message: message.into(),
        }
    }

    /// Create coordination unavailable error
    pub fn coordination_unavailable(
        operation: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::CoordinationUnavailable {
            operation: operation.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Create backend transport error
    pub fn backend_transport(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendTransport {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create backend rejection error
    pub fn backend_rejected(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendRejected {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create provisioning error
    pub fn provisioning(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transport-level failures qualify. Structural conditions (expired or
    /// closed partitions, malformed timestamps, rejected batches) never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendTransport { .. } | Self::CoordinationUnavailable { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ContractError::backend_transport("d", "timeout").is_transient());
        assert!(!ContractError::backend_rejected("d", "bad schema").is_transient());
        assert!(!ContractError::invalid_timestamp(f64::NAN, "non-finite").is_transient());
        assert!(
            !ContractError::PartitionClosed {
                partition: "hour/0".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = ContractError::coordination_unavailable("register", 3, "connection refused");
        let text = err.to_string();
        assert!(text.contains("register"));
        assert!(text.contains("3 attempt"));
    }
}
