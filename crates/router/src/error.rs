//! Router error types

use contracts::ContractError;
use discovery::DiscoveryError;
use dispatcher::DispatcherError;
use thiserror::Error;

/// Router errors
///
/// Routine drops never surface here; they are per-record outcomes.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration rejected at open
    #[error("invalid router configuration: {0}")]
    Config(#[from] ContractError),

    /// Coordination failure
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Destination provisioning failure
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Partition window already closed
    #[error("partition {partition} has expired")]
    Expired { partition: String },

    /// Router was closed
    #[error("router is closed")]
    Closed,
}
