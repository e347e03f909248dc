//! Per-key partition lifecycle
//!
//! ```text
//! (absent) ──first record──▶ Opening ──destinations ready──▶ Active
//!                               │                              │
//!                               └──────── deadline passed ─────┴──▶ Expiring ──drained──▶ Expired
//! ```
//!
//! Senders hold a shared guard for the duration of a dispatch; expiry takes
//! the exclusive guard, so it waits for every in-flight send before the
//! destinations are shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use contracts::PartitionKey;
use dispatcher::DispatchMerger;
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle phase of a locally known partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionPhase {
    /// Destinations are being registered or provisioned
    Opening,
    /// Destinations ready; records flow
    Active,
    /// Deadline passed; draining in-flight sends
    Expiring,
    /// Retired; records are dropped
    Expired,
}

impl PartitionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Expiring => "expiring",
            Self::Expired => "expired",
        }
    }

    /// No further records are accepted
    pub fn is_retiring(self) -> bool {
        matches!(self, Self::Expiring | Self::Expired)
    }
}

/// Router-local state for one partition key
pub struct PartitionSlot {
    key: PartitionKey,
    deadline_ms: i64,
    created_at_ms: i64,
    phase: Mutex<PartitionPhase>,
    /// Replaced by a fresh slot after the registration diverged
    superseded: AtomicBool,
    destinations: OnceCell<DispatchMerger>,
    in_flight: RwLock<()>,
}

impl PartitionSlot {
    pub fn new(key: PartitionKey, deadline_ms: i64, created_at_ms: i64) -> Self {
        Self {
            key,
            deadline_ms,
            created_at_ms,
            phase: Mutex::new(PartitionPhase::Opening),
            superseded: AtomicBool::new(false),
            destinations: OnceCell::new(),
            in_flight: RwLock::new(()),
        }
    }

    #[inline]
    pub fn key(&self) -> PartitionKey {
        self.key
    }

    #[inline]
    pub fn deadline_ms(&self) -> i64 {
        self.deadline_ms
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn phase(&self) -> PartitionPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Records at `now_ms` fall strictly after the grace window
    #[inline]
    pub fn is_past_deadline(&self, now_ms: i64) -> bool {
        now_ms > self.deadline_ms
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    /// Opened destinations, if any
    pub fn merger(&self) -> Option<&DispatchMerger> {
        self.destinations.get()
    }

    /// Open destinations once; concurrent callers wait on the same attempt.
    ///
    /// A failed attempt leaves the slot unopened so the next caller retries.
    pub(crate) async fn open_with<F, Fut, E>(&self, open: F) -> Result<&DispatchMerger, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<DispatchMerger, E>>,
    {
        let merger = self.destinations.get_or_try_init(open).await?;
        self.transition(PartitionPhase::Opening, PartitionPhase::Active);
        Ok(merger)
    }

    /// Shared guard held while dispatching
    pub(crate) async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.in_flight.read().await
    }

    /// Exclusive guard; resolves once in-flight sends have finished
    pub(crate) async fn drain(&self) -> RwLockWriteGuard<'_, ()> {
        self.in_flight.write().await
    }

    /// Opening/Active → Expiring. Returns false if already retiring.
    pub(crate) fn begin_expiring(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if phase.is_retiring() {
            return false;
        }
        *phase = PartitionPhase::Expiring;
        true
    }

    pub(crate) fn mark_expired(&self) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = PartitionPhase::Expired;
    }

    /// Returns false if the slot was already superseded
    pub(crate) fn supersede(&self) -> bool {
        !self.superseded.swap(true, Ordering::AcqRel)
    }

    fn transition(&self, from: PartitionPhase, to: PartitionPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }
}
