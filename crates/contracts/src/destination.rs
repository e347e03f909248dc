//! Destination descriptors and coordination-store registration entries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ContractError, PartitionKey};

/// Identity of one backend ingestion endpoint for one partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    /// Globally unique destination id (e.g. firehose id)
    pub id: String,

    /// Data source the destination ingests into
    pub data_source: String,

    /// Service that runs the indexing task
    pub indexer_service: String,

    /// Partition this destination serves
    pub partition: PartitionKey,

    /// Load-sharing partition number within the bucket
    pub partition_num: u32,

    /// Replica number within the partition
    pub replicant: u32,

    /// Fingerprint of the rollup the destination was provisioned with
    pub rollup_fingerprint: u64,

    /// Creation time (epoch millis)
    pub created_at_ms: i64,

    /// Producer that proposed this destination
    pub created_by: String,
}

impl fmt::Display for DestinationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} p{} r{})",
            self.id, self.partition, self.partition_num, self.replicant
        )
    }
}

/// Local liveness view of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    /// Last send succeeded (or none attempted yet)
    Live,
    /// Last send exhausted its retries
    Failing,
    /// Handle released
    Closed,
}

impl DestinationStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Live => 0,
            Self::Failing => 1,
            Self::Closed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Live,
            1 => Self::Failing,
            _ => Self::Closed,
        }
    }
}

/// Persisted (partition key → destination set) binding.
///
/// The first entry successfully created for a key is authoritative; every
/// producer adopts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub partition: PartitionKey,
    pub destinations: Vec<DestinationDescriptor>,
    pub created_at_ms: i64,
    pub created_by: String,
}

impl RegistrationEntry {
    pub fn new(
        partition: PartitionKey,
        destinations: Vec<DestinationDescriptor>,
        created_at_ms: i64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            destinations,
            created_at_ms,
            created_by: created_by.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ContractError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ContractError> {
        serde_json::from_slice(bytes).map_err(|e| ContractError::CorruptRegistration {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Destination ids, in registration order
    pub fn destination_ids(&self) -> Vec<&str> {
        self.destinations.iter().map(|d| d.id.as_str()).collect()
    }

    /// Whether both entries bind the same destinations
    pub fn same_destinations(&self, other: &[DestinationDescriptor]) -> bool {
        self.destinations.len() == other.len()
            && self
                .destinations
                .iter()
                .zip(other)
                .all(|(a, b)| a.id == b.id)
    }
}

/// Closed-partition marker written when a partition is retired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedMarker {
    pub partition: PartitionKey,
    pub closed_at_ms: i64,
    pub closed_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Granularity;

    fn descriptor(id: &str) -> DestinationDescriptor {
        DestinationDescriptor {
            id: id.to_string(),
            data_source: "hey".into(),
            indexer_service: "druid:local:indexer".into(),
            partition: PartitionKey::containing(0, Granularity::Hour).unwrap(),
            partition_num: 0,
            replicant: 0,
            rollup_fingerprint: 1,
            created_at_ms: 0,
            created_by: "producer-a".into(),
        }
    }

    #[test]
    fn test_entry_json_round_trip_and_corruption() {
        let entry = RegistrationEntry::new(
            descriptor("a").partition,
            vec![descriptor("a")],
            10,
            "producer-a",
        );
        let bytes = entry.to_bytes().unwrap();
        assert_eq!(RegistrationEntry::from_bytes("/p", &bytes).unwrap(), entry);

        let err = RegistrationEntry::from_bytes("/p", b"{not json").unwrap_err();
        assert!(matches!(err, ContractError::CorruptRegistration { .. }));
    }

    #[test]
    fn test_same_destinations() {
        let entry = RegistrationEntry::new(
            descriptor("a").partition,
            vec![descriptor("a"), descriptor("b")],
            10,
            "producer-a",
        );
        assert!(entry.same_destinations(&[descriptor("a"), descriptor("b")]));
        assert!(!entry.same_destinations(&[descriptor("a")]));
        assert_eq!(entry.destination_ids(), vec!["a", "b"]);
    }
}
