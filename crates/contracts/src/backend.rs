//! DestinationBackend trait - dispatch output interface
//!
//! A backend is the transport to one destination. Serialization and the wire
//! protocol live behind this trait.

use std::future::Future;

use crate::{BatchAck, ContractError, DestinationDescriptor, Record, RollupSpec};

/// Batch transport to a single destination
///
/// All backend implementations must implement this trait.
#[trait_variant::make(DestinationBackend: Send)]
pub trait LocalDestinationBackend {
    /// Backend name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Send one batch, preserving submission order
    ///
    /// # Errors
    /// `BackendTransport` for transient failures (retried by the caller),
    /// anything else is treated as permanent for this batch.
    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close backend
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Builds backends for newly confirmed destinations
///
/// Called only when a partition is opened, never on the dispatch path. The
/// rollup is handed over so a provisioner can configure the destination.
pub trait BackendProvisioner: Send + Sync + 'static {
    type Backend: DestinationBackend + 'static;

    fn provision(
        &self,
        destination: &DestinationDescriptor,
        rollup: &RollupSpec,
    ) -> impl Future<Output = Result<Self::Backend, ContractError>> + Send;
}
