//! # Dispatcher
//!
//! Delivery to destinations.
//!
//! Responsibilities:
//! - One worker task and bounded queue per destination, so a slow
//!   destination never stalls the others
//! - Handle-level retry of transient backend failures
//! - Fan-out of a partition's records to its destinations and merging of the
//!   per-record outcomes
//! - Backend provisioning from configuration

pub mod backends;
pub mod error;
pub mod handle;
pub mod merger;
pub mod metrics;
pub mod provisioner;

pub use backends::{FileBackend, LogBackend, MemoryBackend, TcpBackend, WireFormat};
pub use contracts::{DestinationBackend, Record, RecordOutcome};
pub use error::DispatcherError;
pub use handle::{DestinationHandle, PendingSend};
pub use merger::DispatchMerger;
pub use metrics::{HandleMetrics, HandleMetricsSnapshot};
pub use provisioner::{ConfigProvisioner, ConfiguredBackend, MemoryProvisioner};
