//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Backend creation error
    #[error("failed to provision destination '{destination}': {message}")]
    Provisioning {
        destination: String,
        message: String,
    },

    /// Backend parameters missing or malformed
    #[error("invalid {backend} backend parameter: {message}")]
    InvalidParams { backend: &'static str, message: String },

    /// Registration carried no destinations
    #[error("registration for {partition} has no destinations")]
    EmptyRegistration { partition: String },

    /// Backend error (from contract)
    #[error("backend error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a provisioning error
    pub fn provisioning(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn invalid_params(backend: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            backend,
            message: message.into(),
        }
    }
}

impl From<DispatcherError> for contracts::ContractError {
    fn from(err: DispatcherError) -> Self {
        match err {
            DispatcherError::Contract(inner) => inner,
            DispatcherError::Provisioning {
                destination,
                message,
            } => contracts::ContractError::provisioning(destination, message),
            other => contracts::ContractError::Other(other.to_string()),
        }
    }
}
