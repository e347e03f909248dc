//! # Discovery
//!
//! Coordination between independent producers.
//!
//! Responsibilities:
//! - Abstract the shared, watch-capable coordination store
//! - Idempotent registration: the first entry created for a partition key wins,
//!   later callers adopt it
//! - Eventually consistent lookup cache bounded by the refresh interval
//! - Retirement of partitions with closed tombstones
//!
//! Store layout under `{root}/{data_source}`:
//! - `partitions/{granularity}-{start_ms}`: JSON `RegistrationEntry`
//! - `closed/{granularity}-{start_ms}`: JSON `ClosedMarker`

pub mod client;
pub mod directory;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{DiscoveryClient, Registration};
pub use directory::DirectoryStore;
pub use error::{DiscoveryError, StoreError};
pub use memory::InMemoryStore;
pub use store::{CoordinationStore, CreateOutcome, StoreEvent, StoreEventKind};
