//! DiscoveryClient - registration, lookup and retirement of partition
//! destinations through a shared coordination store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use contracts::{
    ClosedMarker, Clock, DestinationDescriptor, DiscoveryConfig, PartitionKey, RegistrationEntry,
    RetryPolicy,
};

use crate::error::{DiscoveryError, StoreError};
use crate::store::{CoordinationStore, CreateOutcome, StoreEvent, StoreEventKind};

/// Confirmed registration for a partition key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Our candidate was stored
    Created(RegistrationEntry),
    /// Another registration already existed and was adopted
    Adopted(RegistrationEntry),
}

impl Registration {
    pub fn entry(&self) -> &RegistrationEntry {
        match self {
            Self::Created(entry) | Self::Adopted(entry) => entry,
        }
    }

    pub fn into_entry(self) -> RegistrationEntry {
        match self {
            Self::Created(entry) | Self::Adopted(entry) => entry,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

struct CachedEntry {
    entry: RegistrationEntry,
    fetched_at: Instant,
}

struct ClientInner<S> {
    store: S,
    data_source: String,
    partitions_path: String,
    closed_path: String,
    producer_id: String,
    retry: RetryPolicy,
    refresh_interval: Duration,
    tombstone_retention: Duration,
    cache: DashMap<PartitionKey, CachedEntry>,
    closed: DashSet<PartitionKey>,
    clock: Arc<dyn Clock>,
}

/// Coordination client for one data source
///
/// Cheap to clone; clones share the lookup cache.
pub struct DiscoveryClient<S> {
    inner: Arc<ClientInner<S>>,
}

impl<S> Clone for DiscoveryClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CoordinationStore> DiscoveryClient<S> {
    pub fn new(
        store: S,
        data_source: impl Into<String>,
        config: &DiscoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let data_source = data_source.into();
        let base = format!("{}/{}", config.root_path.trim_end_matches('/'), data_source);
        let producer_id = config
            .producer_id
            .clone()
            .unwrap_or_else(default_producer_id);

        Self {
            inner: Arc::new(ClientInner {
                store,
                partitions_path: format!("{base}/partitions"),
                closed_path: format!("{base}/closed"),
                data_source,
                producer_id,
                retry: config.retry.clone(),
                refresh_interval: config.refresh_interval,
                tombstone_retention: config.tombstone_retention,
                cache: DashMap::new(),
                closed: DashSet::new(),
                clock,
            }),
        }
    }

    pub fn data_source(&self) -> &str {
        &self.inner.data_source
    }

    /// Identity recorded on registrations and tombstones
    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Store path of the registration entry for `key`
    pub fn partition_path(&self, key: PartitionKey) -> String {
        format!("{}/{}", self.inner.partitions_path, key.node_name())
    }

    /// Store path of the closed tombstone for `key`
    pub fn closed_path(&self, key: PartitionKey) -> String {
        format!("{}/{}", self.inner.closed_path, key.node_name())
    }

    /// Number of cached registrations
    pub fn cached_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of tombstones known locally
    pub fn closed_len(&self) -> usize {
        self.inner.closed.len()
    }

    /// A tombstone is kept until `tombstone_retention` after its bucket ends.
    /// Records for the key are expired long before then.
    fn tombstone_is_stale(&self, key: PartitionKey, now_ms: i64) -> bool {
        let retention_ms = self.inner.tombstone_retention.as_millis().min(i64::MAX as u128) as i64;
        now_ms > key.end_ms().saturating_add(retention_ms)
    }

    /// Register `candidates` for `key`, or adopt the registration that won.
    ///
    /// # Errors
    /// - `PartitionClosed` if the key carries a tombstone
    /// - `Unavailable` once transient store failures exhaust the retry policy
    #[instrument(
        name = "discovery_register",
        skip(self, candidates),
        fields(data_source = %self.inner.data_source, partition = %key, candidates = candidates.len())
    )]
    pub async fn register(
        &self,
        key: PartitionKey,
        candidates: Vec<DestinationDescriptor>,
    ) -> Result<Registration, DiscoveryError> {
        if self.is_closed(key).await? {
            return Err(DiscoveryError::PartitionClosed { partition: key });
        }

        let path = self.partition_path(key);
        let candidate = RegistrationEntry::new(
            key,
            candidates,
            self.inner.clock.now_ms(),
            self.inner.producer_id.clone(),
        );
        let bytes = candidate.to_bytes()?;

        let store = &self.inner.store;
        let outcome = self
            .with_retry("register", &path, || store.create(&path, bytes.clone()))
            .await?;

        let registration = match outcome {
            CreateOutcome::Created => Registration::Created(candidate),
            CreateOutcome::AlreadyExists(existing) => {
                Registration::Adopted(self.decode_entry(key, &path, &existing)?)
            }
        };

        // A tombstone written concurrently wins over the registration
        if self.fetch_closed(key).await? {
            if registration.is_created() {
                self.with_retry("register", &path, || store.delete(&path)).await?;
            }
            return Err(DiscoveryError::PartitionClosed { partition: key });
        }

        if registration.is_created() {
            metrics::counter!("beam_router_registrations_total", "result" => "created").increment(1);
            info!(
                partition = %key,
                destinations = ?registration.entry().destination_ids(),
                "Registered partition"
            );
        } else {
            metrics::counter!("beam_router_registrations_total", "result" => "adopted").increment(1);
            debug!(
                partition = %key,
                created_by = %registration.entry().created_by,
                "Adopted existing registration"
            );
        }

        self.cache_entry(registration.entry().clone());
        Ok(registration)
    }

    /// Confirmed destinations for `key`, served from cache while fresh
    #[instrument(
        name = "discovery_lookup",
        skip(self),
        fields(data_source = %self.inner.data_source, partition = %key)
    )]
    pub async fn lookup(&self, key: PartitionKey) -> Result<Option<RegistrationEntry>, DiscoveryError> {
        let ttl = self.inner.refresh_interval;
        let cached = self
            .inner
            .cache
            .get(&key)
            .and_then(|c| (c.fetched_at.elapsed() < ttl).then(|| c.entry.clone()));
        if cached.is_some() {
            return Ok(cached);
        }

        let path = self.partition_path(key);
        let store = &self.inner.store;
        match self.with_retry("lookup", &path, || store.get(&path)).await? {
            Some(bytes) => {
                let entry = self.decode_entry(key, &path, &bytes)?;
                self.cache_entry(entry.clone());
                Ok(Some(entry))
            }
            None => {
                self.inner.cache.remove(&key);
                Ok(None)
            }
        }
    }

    /// Retire `key`: write the closed tombstone, then delete the registration
    /// if it still binds `destinations`.
    ///
    /// Returns whether the registration entry was deleted.
    #[instrument(
        name = "discovery_deregister",
        skip(self, destinations),
        fields(data_source = %self.inner.data_source, partition = %key)
    )]
    pub async fn deregister(
        &self,
        key: PartitionKey,
        destinations: &[DestinationDescriptor],
    ) -> Result<bool, DiscoveryError> {
        let marker = ClosedMarker {
            partition: key,
            closed_at_ms: self.inner.clock.now_ms(),
            closed_by: self.inner.producer_id.clone(),
        };
        let marker_bytes = serde_json::to_vec(&marker).map_err(contracts::ContractError::from)?;

        let store = &self.inner.store;
        let closed_path = self.closed_path(key);
        self.with_retry("deregister", &closed_path, || {
            store.create(&closed_path, marker_bytes.clone())
        })
            .await?;
        self.inner.closed.insert(key);
        self.inner.cache.remove(&key);

        let path = self.partition_path(key);
        let removed = match self.with_retry("deregister", &path, || store.get(&path)).await? {
            Some(bytes) => {
                let current = self.decode_entry(key, &path, &bytes)?;
                if current.same_destinations(destinations) {
                    self.with_retry("deregister", &path, || store.delete(&path)).await?
                } else {
                    warn!(
                        partition = %key,
                        current = ?current.destination_ids(),
                        "Registration changed owner; leaving it in place"
                    );
                    false
                }
            }
            None => false,
        };

        metrics::counter!("beam_router_deregistrations_total").increment(1);
        debug!(partition = %key, removed, "Deregistered partition");
        Ok(removed)
    }

    /// Whether `key` carries a closed tombstone
    pub async fn is_closed(&self, key: PartitionKey) -> Result<bool, DiscoveryError> {
        if self.inner.closed.contains(&key) {
            return Ok(true);
        }
        self.fetch_closed(key).await
    }

    /// Reload every registration from the store, replacing the cache
    #[instrument(
        name = "discovery_refresh_all",
        skip(self),
        fields(data_source = %self.inner.data_source)
    )]
    pub async fn refresh_all(&self) -> Result<Vec<RegistrationEntry>, DiscoveryError> {
        let store = &self.inner.store;

        let closed_parent = self.inner.closed_path.as_str();
        let closed = self
            .with_retry("refresh", closed_parent, || store.children(closed_parent))
            .await?;
        let now_ms = self.inner.clock.now_ms();
        for key in closed.iter().filter_map(|n| PartitionKey::from_node_name(n)) {
            if !self.tombstone_is_stale(key, now_ms) {
                self.inner.closed.insert(key);
            }
        }

        let parent = self.inner.partitions_path.as_str();
        let names = self.with_retry("refresh", parent, || store.children(parent)).await?;

        let mut entries = Vec::with_capacity(names.len());
        for name in &names {
            let Some(key) = PartitionKey::from_node_name(name) else {
                warn!(node = %name, "Skipping unrecognised registration node");
                continue;
            };
            let path = self.partition_path(key);
            let Some(bytes) = self.with_retry("refresh", &path, || store.get(&path)).await? else {
                continue;
            };
            match self.decode_entry(key, &path, &bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(node = %name, error = %e, "Skipping corrupt registration"),
            }
        }

        let now = Instant::now();
        self.inner
            .cache
            .retain(|key, _| entries.iter().any(|e| e.partition == *key));
        for entry in &entries {
            self.inner.cache.insert(
                entry.partition,
                CachedEntry {
                    entry: entry.clone(),
                    fetched_at: now,
                },
            );
        }
        entries.sort_by_key(|e| e.partition);
        Ok(entries)
    }

    /// Forget tombstones past their retention and delete their nodes.
    ///
    /// Returns the number of nodes deleted from the store.
    #[instrument(
        name = "discovery_prune_tombstones",
        skip(self),
        fields(data_source = %self.inner.data_source)
    )]
    pub async fn prune_tombstones(&self) -> Result<usize, DiscoveryError> {
        let now_ms = self.inner.clock.now_ms();
        self.inner
            .closed
            .retain(|key| !self.tombstone_is_stale(*key, now_ms));

        let store = &self.inner.store;
        let parent = self.inner.closed_path.as_str();
        let names = self.with_retry("prune", parent, || store.children(parent)).await?;

        let mut deleted = 0;
        for name in &names {
            let Some(key) = PartitionKey::from_node_name(name) else {
                continue;
            };
            if !self.tombstone_is_stale(key, now_ms) {
                continue;
            }
            let path = self.closed_path(key);
            if self.with_retry("prune", &path, || store.delete(&path)).await? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            metrics::counter!("beam_router_tombstones_pruned_total").increment(deleted as u64);
            debug!(deleted, remaining = self.inner.closed.len(), "Pruned tombstones");
        }
        Ok(deleted)
    }

    /// Apply store change notifications to the cache until `shutdown` flips
    pub fn spawn_watch(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let client = self.clone();
        let mut events = self.inner.store.watch();

        tokio::spawn(async move {
            debug!(data_source = %client.inner.data_source, "Discovery watch started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = events.recv() => match event {
                        Ok(event) => client.apply_event(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Discovery watch lagged; dropping cache");
                            client.inner.cache.clear();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!(data_source = %client.inner.data_source, "Discovery watch stopped");
        })
    }

    /// Registrations are immutable once created, so only deletions and
    /// tombstones affect the cache.
    fn apply_event(&self, event: &StoreEvent) {
        let Some((parent, name)) = event.split() else {
            return;
        };
        let Some(key) = PartitionKey::from_node_name(name) else {
            return;
        };

        if parent == self.inner.partitions_path {
            if event.kind == StoreEventKind::Deleted {
                self.inner.cache.remove(&key);
            }
        } else if parent == self.inner.closed_path {
            match event.kind {
                StoreEventKind::Created => {
                    self.inner.closed.insert(key);
                    self.inner.cache.remove(&key);
                }
                StoreEventKind::Deleted => {
                    self.inner.closed.remove(&key);
                }
            }
        }
    }

    async fn fetch_closed(&self, key: PartitionKey) -> Result<bool, DiscoveryError> {
        let path = self.closed_path(key);
        let store = &self.inner.store;
        let closed = self
            .with_retry("closed_check", &path, || store.get(&path))
            .await?
            .is_some();
        if closed {
            self.inner.closed.insert(key);
        }
        Ok(closed)
    }

    fn decode_entry(
        &self,
        key: PartitionKey,
        path: &str,
        bytes: &[u8],
    ) -> Result<RegistrationEntry, DiscoveryError> {
        let entry = RegistrationEntry::from_bytes(path, bytes)?;
        if entry.partition != key {
            return Err(contracts::ContractError::CorruptRegistration {
                path: path.to_string(),
                message: format!("entry is for partition {}", entry.partition),
            }
            .into());
        }
        Ok(entry)
    }

    fn cache_entry(&self, entry: RegistrationEntry) {
        self.inner.cache.insert(
            entry.partition,
            CachedEntry {
                entry,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Run a store call, retrying transient failures with exponential backoff
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        path: &str,
        mut call: F,
    ) -> Result<T, DiscoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let retry = &self.inner.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry.allows_retry(attempt) => {
                    let delay = retry.delay_for(attempt);
                    metrics::counter!("beam_router_coordination_retries_total", "operation" => operation)
                        .increment(1);
                    warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Store call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    metrics::counter!("beam_router_coordination_unavailable_total", "operation" => operation)
                        .increment(1);
                    return Err(DiscoveryError::Unavailable {
                        operation,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    return Err(DiscoveryError::Store {
                        operation,
                        path: path.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

fn default_producer_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}-{}", std::process::id())
}
