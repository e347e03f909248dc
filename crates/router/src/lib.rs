//! # Router
//!
//! Time-partitioned clustered router.
//!
//! Responsibilities:
//! - Resolve each record's timestamp to a partition key
//! - Lazily open partitions through the discovery client, converging with
//!   other producers on a single registration per key
//! - Dispatch grouped records and report per-record outcomes
//! - Retire partitions once their window deadline passes, draining in-flight
//!   sends first
//!
//! ## Usage
//!
//! ```ignore
//! use router::RouterBuilder;
//!
//! let router = RouterBuilder::new(config, store, provisioner).build().await?;
//! let result = router.propose(records).await;
//! println!("sent={} dropped={}", result.sent_count(), result.dropped_count());
//! router.close().await;
//! ```

mod destinations;
mod error;
mod partition;
mod resolver;
mod router;
mod sweep;

pub use destinations::candidate_destinations;
pub use error::RouterError;
pub use partition::{PartitionPhase, PartitionSlot};
pub use resolver::{resolve, PartitionResolver};
pub use router::{ClusteredRouter, RouterBuilder};

pub use contracts::{DispatchCounts, DispatchResult, Record, RecordOutcome};
