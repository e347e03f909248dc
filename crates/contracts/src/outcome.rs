//! Dispatch outcomes
//!
//! Routine drops are values, never errors. Every proposed record ends up with
//! exactly one [`RecordOutcome`].

use serde::{Deserialize, Serialize};

/// Final outcome for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Every required destination accepted the record
    Accepted,
    /// Some, but not all, replicants accepted the record
    PartialAcceptance,
    /// Partition window closed before the record could be dispatched
    RejectedExpired,
    /// Destination failed after bounded retries
    RejectedBackendError,
    /// Coordination store unreachable; no destination could be resolved
    Undeliverable,
    /// Timestamp malformed or out of range
    InvalidTimestamp,
}

impl RecordOutcome {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }

    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::PartialAcceptance => "partial",
            Self::RejectedExpired => "expired",
            Self::RejectedBackendError => "backend_error",
            Self::Undeliverable => "undeliverable",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }

    /// Combine outcomes of the same record from several replicants
    pub fn merge_replicas(outcomes: &[RecordOutcome]) -> RecordOutcome {
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        if !outcomes.is_empty() && accepted == outcomes.len() {
            Self::Accepted
        } else if accepted > 0 {
            Self::PartialAcceptance
        } else {
            // Backend errors dominate so a dead replica is visible even when
            // another one refused the record as late.
            outcomes
                .iter()
                .copied()
                .find(|o| *o == Self::RejectedBackendError)
                .or_else(|| outcomes.first().copied())
                .unwrap_or(Self::RejectedBackendError)
        }
    }
}

/// Destination response to one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchAck {
    /// Acceptance flag per record, in submission order
    PerRecord(Vec<bool>),
    /// Aggregate accepted count
    Count(usize),
}

impl BatchAck {
    /// Expand into per-record outcomes for a batch of `len` records.
    ///
    /// With an aggregate count the first `n` records are counted as accepted;
    /// the remainder were refused by the destination as outside its window.
    pub fn into_outcomes(self, len: usize) -> Vec<RecordOutcome> {
        let flags: Vec<bool> = match self {
            Self::PerRecord(mut flags) => {
                flags.resize(len, false);
                flags
            }
            Self::Count(n) => (0..len).map(|i| i < n).collect(),
        };
        flags
            .into_iter()
            .map(|ok| {
                if ok {
                    RecordOutcome::Accepted
                } else {
                    RecordOutcome::RejectedExpired
                }
            })
            .collect()
    }

    pub fn accepted(&self) -> usize {
        match self {
            Self::PerRecord(flags) => flags.iter().filter(|f| **f).count(),
            Self::Count(n) => *n,
        }
    }
}

/// Per-cause counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub sent: u64,
    pub partial: u64,
    pub dropped_expired: u64,
    pub dropped_backend: u64,
    pub undeliverable: u64,
    pub invalid: u64,
}

impl DispatchCounts {
    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Accepted => self.sent += 1,
            RecordOutcome::PartialAcceptance => self.partial += 1,
            RecordOutcome::RejectedExpired => self.dropped_expired += 1,
            RecordOutcome::RejectedBackendError => self.dropped_backend += 1,
            RecordOutcome::Undeliverable => self.undeliverable += 1,
            RecordOutcome::InvalidTimestamp => self.invalid += 1,
        }
    }

    /// Everything that was not fully accepted
    pub fn dropped(&self) -> u64 {
        self.partial + self.dropped_expired + self.dropped_backend + self.undeliverable + self.invalid
    }

    pub fn total(&self) -> u64 {
        self.sent + self.dropped()
    }

    pub fn add(&mut self, other: &DispatchCounts) {
        self.sent += other.sent;
        self.partial += other.partial;
        self.dropped_expired += other.dropped_expired;
        self.dropped_backend += other.dropped_backend;
        self.undeliverable += other.undeliverable;
        self.invalid += other.invalid;
    }
}

/// Result of one `propose` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Outcome per proposed record, in proposal order
    pub outcomes: Vec<RecordOutcome>,
    /// Aggregate counts over `outcomes`
    pub counts: DispatchCounts,
}

impl DispatchResult {
    pub fn from_outcomes(outcomes: Vec<RecordOutcome>) -> Self {
        let mut counts = DispatchCounts::default();
        for outcome in &outcomes {
            counts.record(*outcome);
        }
        Self { outcomes, counts }
    }

    pub fn sent_count(&self) -> u64 {
        self.counts.sent
    }

    pub fn dropped_count(&self) -> u64 {
        self.counts.dropped()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecordOutcome::*;

    #[test]
    fn test_merge_replicas() {
        assert_eq!(RecordOutcome::merge_replicas(&[Accepted, Accepted]), Accepted);
        assert_eq!(
            RecordOutcome::merge_replicas(&[Accepted, RejectedBackendError]),
            PartialAcceptance
        );
        assert_eq!(
            RecordOutcome::merge_replicas(&[RejectedExpired, RejectedBackendError]),
            RejectedBackendError
        );
        assert_eq!(RecordOutcome::merge_replicas(&[RejectedExpired]), RejectedExpired);
    }

    #[test]
    fn test_count_ack_expansion() {
        let outcomes = BatchAck::Count(2).into_outcomes(3);
        assert_eq!(outcomes, vec![Accepted, Accepted, RejectedExpired]);

        let outcomes = BatchAck::PerRecord(vec![false, true]).into_outcomes(3);
        assert_eq!(outcomes, vec![RejectedExpired, Accepted, RejectedExpired]);
    }

    #[test]
    fn test_dispatch_result_counts() {
        let result = DispatchResult::from_outcomes(vec![
            Accepted,
            RejectedExpired,
            Undeliverable,
            InvalidTimestamp,
            Accepted,
        ]);
        assert_eq!(result.sent_count(), 2);
        assert_eq!(result.dropped_count(), 3);
        assert_eq!(result.counts.total(), 5);
    }
}
