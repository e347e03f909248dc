//! Router metrics
//!
//! Free functions emit to the global `metrics` recorder; the aggregator keeps
//! an in-process summary for run reports.

use contracts::{DispatchCounts, DispatchResult, RecordOutcome};
use metrics::{counter, gauge, histogram};

/// Emit per-cause record counters for one proposal
///
/// # Example
///
/// ```ignore
/// let result = router.propose(records).await;
/// record_dispatch_counts(&result.counts);
/// ```
pub fn record_dispatch_counts(counts: &DispatchCounts) {
    let by_outcome = [
        (RecordOutcome::Accepted, counts.sent),
        (RecordOutcome::PartialAcceptance, counts.partial),
        (RecordOutcome::RejectedExpired, counts.dropped_expired),
        (RecordOutcome::RejectedBackendError, counts.dropped_backend),
        (RecordOutcome::Undeliverable, counts.undeliverable),
        (RecordOutcome::InvalidTimestamp, counts.invalid),
    ];
    for (outcome, n) in by_outcome {
        if n > 0 {
            counter!("beam_router_records_total", "outcome" => outcome.as_str()).increment(n);
        }
    }
    counter!("beam_router_proposals_total").increment(1);
}

/// Records rejected before routing because no timestamp could be extracted
pub fn record_invalid_records(n: u64) {
    counter!(
        "beam_router_records_total",
        "outcome" => RecordOutcome::InvalidTimestamp.as_str()
    )
    .increment(n);
}

/// Wall time of one `propose` call
pub fn record_propose_latency_ms(latency_ms: f64) {
    histogram!("beam_router_propose_latency_ms").record(latency_ms);
}

pub fn record_partition_opened() {
    counter!("beam_router_partitions_opened_total").increment(1);
}

/// `reason`: expired, closed_remotely, superseded or shutdown
pub fn record_partition_retired(reason: &str) {
    counter!("beam_router_partitions_retired_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_live_partitions(n: usize) {
    gauge!("beam_router_live_partitions").set(n as f64);
}

pub fn record_destination_queue_depth(destination: &str, depth: u64) {
    gauge!(
        "beam_router_destination_queue_depth",
        "destination" => destination.to_string()
    )
    .set(depth as f64);
}

/// Aggregates dispatch results in memory for summaries
#[derive(Debug, Clone, Default)]
pub struct DispatchStatsAggregator {
    pub proposals: u64,
    pub counts: DispatchCounts,
    /// Records per proposal
    pub batch_stats: RunningStats,
    /// `propose` latency (ms)
    pub latency_stats: RunningStats,
}

impl DispatchStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, result: &DispatchResult, latency_ms: f64) {
        self.proposals += 1;
        self.counts.add(&result.counts);
        self.batch_stats.push(result.len() as f64);
        self.latency_stats.push(latency_ms);
    }

    pub fn summary(&self) -> DispatchSummary {
        let total = self.counts.total();
        DispatchSummary {
            proposals: self.proposals,
            counts: self.counts,
            drop_rate: if total > 0 {
                self.counts.dropped() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            batch_size: StatsSummary::from(&self.batch_stats),
            latency_ms: StatsSummary::from(&self.latency_stats),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Summary of a run
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub proposals: u64,
    pub counts: DispatchCounts,
    /// Percentage of records not fully accepted
    pub drop_rate: f64,
    pub batch_size: StatsSummary,
    pub latency_ms: StatsSummary,
}

impl std::fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Proposals: {}", self.proposals)?;
        writeln!(f, "Records: {}", self.counts.total())?;
        writeln!(f, "Accepted: {}", self.counts.sent)?;
        writeln!(
            f,
            "Dropped: {} ({:.2}%)",
            self.counts.dropped(),
            self.drop_rate
        )?;
        writeln!(f, "  partial acceptance: {}", self.counts.partial)?;
        writeln!(f, "  expired: {}", self.counts.dropped_expired)?;
        writeln!(f, "  backend error: {}", self.counts.dropped_backend)?;
        writeln!(f, "  undeliverable: {}", self.counts.undeliverable)?;
        writeln!(f, "  invalid timestamp: {}", self.counts.invalid)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;
        Ok(())
    }
}

/// Summary of a [`RunningStats`]
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
