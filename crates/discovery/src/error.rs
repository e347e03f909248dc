//! Discovery error types

use contracts::{ContractError, PartitionKey};
use thiserror::Error;

/// Errors raised by a coordination store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store temporarily unreachable
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// Path is not a valid store path
    #[error("invalid store path '{path}'")]
    InvalidPath { path: String },

    /// IO error (directory store)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io(_))
    }
}

/// Discovery client errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Partition carries a closed tombstone
    #[error("partition {partition} is closed")]
    PartitionClosed { partition: PartitionKey },

    /// Transient store failures exhausted the retry budget
    #[error("coordination store unavailable during {operation} after {attempts} attempt(s): {source}")]
    Unavailable {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Permanent store failure
    #[error("store rejected {operation} on '{path}': {source}")]
    Store {
        operation: &'static str,
        path: String,
        #[source]
        source: StoreError,
    },

    /// Encoding or decoding failure
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl DiscoveryError {
    /// Whether the caller should treat the records as undeliverable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<DiscoveryError> for ContractError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::PartitionClosed { partition } => ContractError::PartitionClosed {
                partition: partition.to_string(),
            },
            DiscoveryError::Unavailable {
                operation,
                attempts,
                source,
            } => ContractError::coordination_unavailable(operation, attempts, source.to_string()),
            DiscoveryError::Store { .. } => ContractError::Other(err.to_string()),
            DiscoveryError::Contract(inner) => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::unavailable("down").is_transient());
        assert!(!StoreError::InvalidPath { path: "x".into() }.is_transient());
        // a node deleted by a peer between create and read is retried
        let vanished = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(StoreError::from(vanished).is_transient());
    }

    #[test]
    fn test_unavailable_maps_to_coordination_unavailable() {
        let err = DiscoveryError::Unavailable {
            operation: "register",
            attempts: 3,
            source: StoreError::unavailable("connection refused"),
        };
        let contract: ContractError = err.into();
        assert!(matches!(
            contract,
            ContractError::CoordinationUnavailable { attempts: 3, .. }
        ));
        assert!(contract.is_transient());
    }
}
