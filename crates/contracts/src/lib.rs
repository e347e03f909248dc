//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Record timestamps are seconds since epoch (`f64`) as extracted from the payload
//! - Partition keys, deadlines and clocks use epoch milliseconds (`i64`), UTC aligned

mod backend;
mod clock;
mod config;
mod destination;
mod error;
mod outcome;
mod partition_key;
pub mod period;
mod record;
mod rollup;
mod tuning;

pub use backend::*;
pub use clock::*;
pub use config::*;
pub use destination::*;
pub use error::*;
pub use outcome::*;
pub use partition_key::{Granularity, PartitionKey};
pub use record::*;
pub use rollup::*;
pub use tuning::*;
