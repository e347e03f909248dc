//! ClusteredRouter - time-partitioned fan-out over coordinated destinations

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    BackendProvisioner, Clock, ContractError, DestinationDescriptor, DispatchResult,
    FieldTimestamper, PartitionKey, Record, RecordOutcome, RouterConfig, SystemClock,
};
use discovery::{CoordinationStore, DiscoveryClient, DiscoveryError};
use dispatcher::{DispatchMerger, DispatcherError, HandleMetricsSnapshot};

use crate::destinations::candidate_destinations;
use crate::error::RouterError;
use crate::partition::{PartitionPhase, PartitionSlot};
use crate::resolver::PartitionResolver;
use crate::sweep;

/// Slot lookups per group before giving up on a key that keeps being replaced
const MAX_SLOT_ATTEMPTS: usize = 3;

/// Why a partition could not be opened
enum OpenFailure {
    Closed,
    Coordination(DiscoveryError),
    Provisioning(DispatcherError),
}

impl From<DiscoveryError> for OpenFailure {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::PartitionClosed { .. } => Self::Closed,
            other => Self::Coordination(other),
        }
    }
}

/// How a slot leaves the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    /// Window over: tombstone the key and remove its registration
    Expire,
    /// Another producer closed the key
    ClosedRemotely,
    /// Registration changed underneath us; a fresh slot takes over
    Supersede,
    /// Router shutdown; the registration stays for other producers
    Shutdown,
}

impl Retirement {
    fn as_str(self) -> &'static str {
        match self {
            Self::Expire => "expired",
            Self::ClosedRemotely => "closed_remotely",
            Self::Supersede => "superseded",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Builder for [`ClusteredRouter`]
pub struct RouterBuilder<S, P> {
    config: RouterConfig,
    store: S,
    provisioner: P,
    clock: Option<Arc<dyn Clock>>,
    background: bool,
}

impl<S: CoordinationStore, P: BackendProvisioner> RouterBuilder<S, P> {
    pub fn new(config: RouterConfig, store: S, provisioner: P) -> Self {
        Self {
            config,
            store,
            provisioner,
            clock: None,
            background: true,
        }
    }

    /// Time source for windows and deadlines (default: system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Do not spawn the sweep and discovery watch; the caller drives
    /// [`ClusteredRouter::tick`] instead.
    pub fn manual_sweep(mut self) -> Self {
        self.background = false;
        self
    }

    /// Validate the configuration, warm the discovery cache and start
    /// background tasks.
    pub async fn build(self) -> Result<ClusteredRouter<S, P>, RouterError> {
        let Self {
            config,
            store,
            provisioner,
            clock,
            background,
        } = self;

        config.rollup.validate(config.tuning.segment_granularity)?;
        if config.tuning.destinations_per_key() == 0 {
            return Err(ContractError::config_validation(
                "tuning",
                "partitions and replicants must be at least 1",
            )
            .into());
        }

        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let discovery = DiscoveryClient::new(
            store,
            config.data_source.clone(),
            &config.discovery,
            Arc::clone(&clock),
        );

        match discovery.refresh_all().await {
            Ok(entries) => debug!(known = entries.len(), "Discovery cache warmed"),
            Err(e) => warn!(error = %e, "Initial discovery refresh failed; continuing cold"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = ClusteredRouter {
            inner: Arc::new(RouterInner {
                resolver: PartitionResolver::from_tuning(&config.tuning),
                timestamper: FieldTimestamper::new(
                    config.timestamp.field.clone(),
                    config.timestamp.format,
                ),
                rollup_fingerprint: config.rollup.fingerprint(),
                config,
                discovery,
                provisioner,
                clock,
                partitions: DashMap::new(),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };

        if background {
            let watch_task = router.inner.discovery.spawn_watch(shutdown_rx.clone());
            let sweep_task = sweep::spawn_sweeper(
                Arc::downgrade(&router.inner),
                router.inner.config.tuning.sweep_interval,
                shutdown_rx,
            );
            let mut tasks = router.inner.tasks.lock().unwrap_or_else(|p| p.into_inner());
            tasks.push(watch_task);
            tasks.push(sweep_task);
        }

        info!(
            data_source = %router.inner.config.data_source,
            producer = %router.inner.discovery.producer_id(),
            granularity = %router.inner.config.tuning.segment_granularity,
            window_ms = router.inner.config.tuning.window_period.as_millis() as u64,
            destinations_per_key = router.inner.config.tuning.destinations_per_key(),
            background,
            "Router opened"
        );
        Ok(router)
    }
}

pub(crate) struct RouterInner<S, P> {
    config: RouterConfig,
    resolver: PartitionResolver,
    timestamper: FieldTimestamper,
    rollup_fingerprint: u64,
    discovery: DiscoveryClient<S>,
    provisioner: P,
    clock: Arc<dyn Clock>,
    partitions: DashMap<PartitionKey, Arc<PartitionSlot>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Routes records to per-bucket destinations shared with other producers
///
/// Cheap to clone; clones share partitions and background tasks.
pub struct ClusteredRouter<S, P> {
    inner: Arc<RouterInner<S, P>>,
}

impl<S, P> Clone for ClusteredRouter<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CoordinationStore, P: BackendProvisioner> ClusteredRouter<S, P> {
    /// Shorthand for `RouterBuilder::new(..).build()`
    pub async fn open(config: RouterConfig, store: S, provisioner: P) -> Result<Self, RouterError> {
        RouterBuilder::new(config, store, provisioner).build().await
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner<S, P>>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn discovery(&self) -> &DiscoveryClient<S> {
        &self.inner.discovery
    }

    pub fn provisioner(&self) -> &P {
        &self.inner.provisioner
    }

    pub fn resolver(&self) -> &PartitionResolver {
        &self.inner.resolver
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Phase of a locally known partition
    pub fn partition_phase(&self, key: PartitionKey) -> Option<PartitionPhase> {
        self.inner.partitions.get(&key).map(|slot| slot.phase())
    }

    /// Locally known partition keys, ascending
    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self.inner.partitions.iter().map(|e| *e.key()).collect();
        keys.sort();
        keys
    }

    /// Partitions with opened destinations
    pub fn live_partitions(&self) -> usize {
        self.inner
            .partitions
            .iter()
            .filter(|e| e.value().phase() == PartitionPhase::Active)
            .count()
    }

    /// Destinations currently serving `key`
    pub fn destinations(&self, key: PartitionKey) -> Option<Vec<DestinationDescriptor>> {
        let slot = self.inner.partitions.get(&key).map(|e| Arc::clone(e.value()))?;
        slot.merger().map(DispatchMerger::descriptors)
    }

    /// Per-destination counters across all open partitions
    pub fn destination_metrics(&self) -> Vec<(String, HandleMetricsSnapshot)> {
        let slots: Vec<_> = self.inner.partitions.iter().map(|e| Arc::clone(e.value())).collect();
        slots
            .iter()
            .filter_map(|slot| slot.merger().map(DispatchMerger::metrics))
            .flatten()
            .collect()
    }

    /// Route `records` and report one outcome per record, in input order.
    ///
    /// Never fails as a whole: expired, undeliverable and rejected records
    /// are reported per record. Dropping the returned future abandons
    /// unacknowledged records; they are never retried behind the caller.
    #[instrument(
        name = "router_propose",
        skip(self, records),
        fields(data_source = %self.inner.config.data_source, records = records.len())
    )]
    pub async fn propose(&self, records: Vec<Record>) -> DispatchResult {
        let started = Instant::now();
        let total = records.len();

        if self.is_closed() {
            let result = DispatchResult::from_outcomes(vec![RecordOutcome::Undeliverable; total]);
            observability::record_dispatch_counts(&result.counts);
            return result;
        }

        let now = self.inner.clock.now_ms();
        let mut outcomes = vec![RecordOutcome::Undeliverable; total];
        let mut groups: BTreeMap<PartitionKey, (Vec<usize>, Vec<Record>)> = BTreeMap::new();

        for (index, record) in records.into_iter().enumerate() {
            match self.inner.resolver.resolve_at(record.timestamp(), now) {
                Ok(key) => {
                    let group = groups.entry(key).or_default();
                    group.0.push(index);
                    group.1.push(record);
                }
                Err(e) => {
                    debug!(index, error = %e, "Dropping record with invalid timestamp");
                    outcomes[index] = RecordOutcome::InvalidTimestamp;
                }
            }
        }

        if groups.len() == 1 {
            if let Some((key, (indices, group))) = groups.pop_first() {
                let group_outcomes = self.propose_group(key, group, now).await;
                place(&mut outcomes, &indices, group_outcomes);
            }
        } else {
            let mut tasks = JoinSet::new();
            for (key, (indices, group)) in groups {
                let router = self.clone();
                tasks.spawn(async move { (indices, router.propose_group(key, group, now).await) });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((indices, group_outcomes)) => place(&mut outcomes, &indices, group_outcomes),
                    Err(e) => error!(error = %e, "Partition dispatch task failed"),
                }
            }
        }

        let result = DispatchResult::from_outcomes(outcomes);
        observability::record_dispatch_counts(&result.counts);
        observability::record_propose_latency_ms(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            sent = result.counts.sent,
            dropped = result.dropped_count(),
            "Proposal complete"
        );
        result
    }

    /// Admit raw payloads using the configured timestamp field, then route.
    ///
    /// Payloads whose timestamp cannot be extracted are reported as
    /// `InvalidTimestamp` at their position.
    pub async fn propose_payloads(&self, payloads: Vec<Value>) -> DispatchResult {
        let mut positions = Vec::with_capacity(payloads.len());
        let mut records = Vec::with_capacity(payloads.len());
        let total = payloads.len();

        for (index, payload) in payloads.into_iter().enumerate() {
            match Record::from_payload(payload, &self.inner.timestamper) {
                Ok(record) => {
                    positions.push(index);
                    records.push(record);
                }
                Err(e) => debug!(index, error = %e, "Payload has no usable timestamp"),
            }
        }

        let routed = self.propose(records).await;
        let mut outcomes = vec![RecordOutcome::InvalidTimestamp; total];
        place(&mut outcomes, &positions, routed.outcomes);

        let result = DispatchResult::from_outcomes(outcomes);
        let extraction_failures = (total - positions.len()) as u64;
        if extraction_failures > 0 {
            observability::record_invalid_records(extraction_failures);
        }
        result
    }

    /// Make sure destinations for `key` exist, registering them if needed
    ///
    /// # Errors
    /// - `Expired` if the window has passed or the key was closed
    /// - `Discovery` / `Dispatcher` when opening failed
    pub async fn ensure_partition(
        &self,
        key: PartitionKey,
    ) -> Result<Vec<DestinationDescriptor>, RouterError> {
        if self.is_closed() {
            return Err(RouterError::Closed);
        }
        let now = self.inner.clock.now_ms();
        let deadline = key.window_deadline_ms(self.inner.config.tuning.window_period);
        if now > deadline {
            return Err(RouterError::Expired {
                partition: key.to_string(),
            });
        }

        let slot = self.slot_for(key, deadline, now);
        let guard = slot.enter().await;
        // close() only sees slots inserted before it set the flag
        if self.is_closed() {
            return Err(RouterError::Closed);
        }
        if slot.phase().is_retiring() {
            return Err(RouterError::Expired {
                partition: key.to_string(),
            });
        }

        match slot.open_with(|| self.open_partition(key)).await {
            Ok(merger) => Ok(merger.descriptors()),
            Err(OpenFailure::Closed) => {
                drop(guard);
                self.retire(&slot, Retirement::ClosedRemotely).await;
                Err(RouterError::Expired {
                    partition: key.to_string(),
                })
            }
            Err(OpenFailure::Coordination(e)) => Err(e.into()),
            Err(OpenFailure::Provisioning(e)) => Err(e.into()),
        }
    }

    /// Retire every partition whose deadline is before `now_ms`.
    ///
    /// Each one is drained, tombstoned in the store and its destinations shut
    /// down. Returns the number retired.
    #[instrument(name = "router_evict_expired", skip(self))]
    pub async fn evict_expired(&self, now_ms: i64) -> usize {
        let expired: Vec<Arc<PartitionSlot>> = self
            .inner
            .partitions
            .iter()
            .filter(|e| e.value().is_past_deadline(now_ms))
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut retired = 0;
        for slot in expired {
            if self.retire(&slot, Retirement::Expire).await {
                retired += 1;
            }
        }
        if retired > 0 {
            info!(retired, remaining = self.inner.partitions.len(), "Expired partitions retired");
        }
        observability::record_live_partitions(self.live_partitions());
        retired
    }

    /// One sweep iteration: expire, prune old tombstones, reconcile with the
    /// store, warm ahead
    pub async fn tick(&self) {
        if self.is_closed() {
            return;
        }
        let now = self.inner.clock.now_ms();
        self.evict_expired(now).await;
        if let Err(e) = self.inner.discovery.prune_tombstones().await {
            debug!(error = %e, "Tombstone pruning skipped");
        }
        self.reconcile().await;
        self.warm(now).await;
    }

    /// Stop background tasks and shut down every destination handle after
    /// draining. Registrations are left for other producers.
    #[instrument(name = "router_close", skip(self))]
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<_> = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let slots: Vec<_> = self.inner.partitions.iter().map(|e| Arc::clone(e.value())).collect();
        for slot in &slots {
            self.retire(slot, Retirement::Shutdown).await;
        }
        observability::record_live_partitions(0);
        info!(data_source = %self.inner.config.data_source, partitions = slots.len(), "Router closed");
    }
}

impl<S: CoordinationStore, P: BackendProvisioner> ClusteredRouter<S, P> {
    async fn propose_group(&self, key: PartitionKey, records: Vec<Record>, now: i64) -> Vec<RecordOutcome> {
        let count = records.len();
        let deadline = key.window_deadline_ms(self.inner.config.tuning.window_period);
        if now > deadline {
            debug!(partition = %key, records = count, "Window closed; dropping records");
            return vec![RecordOutcome::RejectedExpired; count];
        }

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let slot = self.slot_for(key, deadline, now);
            let guard = slot.enter().await;

            // close() only sees slots inserted before it set the flag
            if self.is_closed() {
                return vec![RecordOutcome::Undeliverable; count];
            }
            if slot.phase().is_retiring() {
                if slot.is_superseded() {
                    continue;
                }
                return vec![RecordOutcome::RejectedExpired; count];
            }
            if slot.is_superseded() {
                continue;
            }

            return match slot.open_with(|| self.open_partition(key)).await {
                Ok(merger) => merger.dispatch(records).await,
                Err(OpenFailure::Closed) => {
                    drop(guard);
                    self.retire(&slot, Retirement::ClosedRemotely).await;
                    vec![RecordOutcome::RejectedExpired; count]
                }
                Err(OpenFailure::Coordination(e)) => {
                    warn!(partition = %key, error = %e, "Coordination unavailable; records undeliverable");
                    vec![RecordOutcome::Undeliverable; count]
                }
                Err(OpenFailure::Provisioning(e)) => {
                    warn!(partition = %key, error = %e, "Destinations could not be provisioned");
                    vec![RecordOutcome::RejectedBackendError; count]
                }
            };
        }

        warn!(partition = %key, "Partition kept changing owner; records undeliverable");
        vec![RecordOutcome::Undeliverable; count]
    }

    fn slot_for(&self, key: PartitionKey, deadline: i64, now: i64) -> Arc<PartitionSlot> {
        let entry = self
            .inner
            .partitions
            .entry(key)
            .or_insert_with(|| Arc::new(PartitionSlot::new(key, deadline, now)));
        Arc::clone(entry.value())
    }

    /// Adopt the store's registration for `key`, or register our candidates
    #[instrument(
        name = "router_open_partition",
        skip(self),
        fields(partition = %key)
    )]
    async fn open_partition(&self, key: PartitionKey) -> Result<DispatchMerger, OpenFailure> {
        let discovery = &self.inner.discovery;
        if discovery.is_closed(key).await? {
            return Err(OpenFailure::Closed);
        }

        let entry = match discovery.lookup(key).await? {
            Some(entry) => entry,
            None => {
                let candidates = candidate_destinations(
                    &self.inner.config,
                    key,
                    self.inner.rollup_fingerprint,
                    self.inner.clock.now_ms(),
                    discovery.producer_id(),
                );
                discovery.register(key, candidates).await?.into_entry()
            }
        };

        if entry
            .destinations
            .iter()
            .any(|d| d.rollup_fingerprint != self.inner.rollup_fingerprint)
        {
            warn!(
                partition = %key,
                created_by = %entry.created_by,
                "Adopted destinations were provisioned with a different rollup"
            );
        }

        let backend = &self.inner.config.backend;
        let merger = DispatchMerger::open(
            &self.inner.provisioner,
            &entry,
            &self.inner.config.rollup,
            backend.queue_capacity,
            &backend.retry,
        )
        .await
        .map_err(OpenFailure::Provisioning)?;

        observability::record_partition_opened();
        info!(
            partition = %key,
            destinations = merger.len(),
            created_by = %entry.created_by,
            "Partition active"
        );
        Ok(merger)
    }

    /// Drain and shut down `slot`. Returns false if it was already retiring.
    async fn retire(&self, slot: &Arc<PartitionSlot>, how: Retirement) -> bool {
        let key = slot.key();
        if how == Retirement::Supersede {
            if slot.is_superseded() || slot.phase().is_retiring() {
                return false;
            }
            // Install the replacement first so senders bouncing off the old
            // slot find it
            self.inner
                .partitions
                .insert(key, Arc::new(PartitionSlot::new(key, slot.deadline_ms(), self.now_ms())));
            slot.supersede();
        }
        if !slot.begin_expiring() {
            return false;
        }

        let _drained = slot.drain().await;

        if let Some(merger) = slot.merger() {
            if how == Retirement::Expire {
                match self.inner.discovery.deregister(key, &merger.descriptors()).await {
                    Ok(removed) => debug!(partition = %key, removed, "Registration retired"),
                    Err(e) => warn!(partition = %key, error = %e, "Failed to retire registration"),
                }
            }
            merger.shutdown().await;
        }
        slot.mark_expired();

        if how != Retirement::Supersede {
            self.inner
                .partitions
                .remove_if(&key, |_, current| Arc::ptr_eq(current, slot));
        }

        observability::record_partition_retired(how.as_str());
        debug!(partition = %key, reason = how.as_str(), "Partition retired");
        true
    }

    /// Compare active partitions against the store and retire local state
    /// that no longer matches it.
    async fn reconcile(&self) {
        let active: Vec<Arc<PartitionSlot>> = self
            .inner
            .partitions
            .iter()
            .filter(|e| e.value().phase() == PartitionPhase::Active)
            .map(|e| Arc::clone(e.value()))
            .collect();

        for slot in active {
            let key = slot.key();
            let Some(local) = slot.merger().map(DispatchMerger::descriptors) else {
                continue;
            };

            match self.inner.discovery.is_closed(key).await {
                Ok(true) => {
                    info!(partition = %key, "Partition closed by another producer");
                    self.retire(&slot, Retirement::ClosedRemotely).await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(partition = %key, error = %e, "Reconcile skipped");
                    continue;
                }
            }

            match self.inner.discovery.lookup(key).await {
                Ok(Some(entry)) if entry.same_destinations(&local) => {}
                Ok(found) => {
                    warn!(
                        partition = %key,
                        registered = ?found.as_ref().map(|e| e.destination_ids()),
                        "Local destinations diverged from the store; reopening"
                    );
                    self.retire(&slot, Retirement::Supersede).await;
                }
                Err(e) => debug!(partition = %key, error = %e, "Reconcile skipped"),
            }
        }
    }

    /// Open the bucket `warming_period` ahead of the clock before records
    /// arrive for it.
    async fn warm(&self, now: i64) {
        let warming = self.inner.config.tuning.warming_period;
        if warming.is_zero() {
            return;
        }
        let ahead = now.saturating_add(warming.as_millis().min(i64::MAX as u128) as i64);
        let Some(key) = self.inner.resolver.key_at(ahead) else {
            return;
        };
        if self.inner.partitions.contains_key(&key) {
            return;
        }
        match self.ensure_partition(key).await {
            Ok(destinations) => debug!(partition = %key, destinations = destinations.len(), "Warmed partition"),
            Err(e) => warn!(partition = %key, error = %e, "Warming failed"),
        }
    }
}

fn place(outcomes: &mut [RecordOutcome], indices: &[usize], group: Vec<RecordOutcome>) {
    for (&index, outcome) in indices.iter().zip(group) {
        outcomes[index] = outcome;
    }
}
