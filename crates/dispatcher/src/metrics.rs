//! Destination handle metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single destination handle
#[derive(Debug, Default)]
pub struct HandleMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Batches acknowledged by the backend
    batches_sent: AtomicU64,
    /// Records the backend accepted
    records_accepted: AtomicU64,
    /// Records the backend refused
    records_rejected: AtomicU64,
    /// Batches that failed after exhausting retries (or permanently)
    failure_count: AtomicU64,
    /// Retried send attempts
    retry_count: AtomicU64,
    /// Requests skipped because the caller stopped waiting
    abandoned_count: AtomicU64,
}

impl HandleMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn records_accepted(&self) -> u64 {
        self.records_accepted.load(Ordering::Relaxed)
    }

    pub fn records_rejected(&self) -> u64 {
        self.records_rejected.load(Ordering::Relaxed)
    }

    /// Count one acknowledged batch
    pub fn record_ack(&self, accepted: usize, rejected: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.records_accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.records_rejected
            .fetch_add(rejected as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn inc_retry_count(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned_count(&self) -> u64 {
        self.abandoned_count.load(Ordering::Relaxed)
    }

    pub fn inc_abandoned_count(&self) {
        self.abandoned_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> HandleMetricsSnapshot {
        HandleMetricsSnapshot {
            queue_len: self.queue_len(),
            batches_sent: self.batches_sent(),
            records_accepted: self.records_accepted(),
            records_rejected: self.records_rejected(),
            failure_count: self.failure_count(),
            retry_count: self.retry_count(),
            abandoned_count: self.abandoned_count(),
        }
    }
}

/// Snapshot of handle metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleMetricsSnapshot {
    pub queue_len: usize,
    pub batches_sent: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub abandoned_count: u64,
}
