//! # Integration Tests
//!
//! Cross-crate scenarios for the router.
//!
//! Covers:
//! - Config file to routed records
//! - Multi-producer coordination over shared stores
//! - Window expiry, draining and retirement
//! - Resolver properties over randomised timestamps

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ManualClock, PartitionKey, Record, RetryPolicy, RouterConfig};
    use discovery::CoordinationStore;
    use dispatcher::MemoryProvisioner;
    use router::{ClusteredRouter, RouterBuilder};
    use serde_json::json;

    pub const NOON_MS: i64 = 1_709_294_400_000; // 2024-03-01T12:00:00Z
    pub const MINUTE_MS: i64 = 60_000;

    const CONFIG: &str = r#"
data_source = "wikipedia"

[discovery]
root_path = "/druid/discovery"

[location]
indexer_service = "druid:local:indexer"
destination_pattern = "druid:local:firehose:%s"

[rollup]
query_granularity = "minute"
[rollup.dimensions]
mode = "specific"
dimensions = ["page", "language"]
[[rollup.aggregators]]
type = "count"
name = "cnt"

[tuning]
segment_granularity = "hour"
window_period = "10m"

[backend]
kind = "memory"
"#;

    pub fn config(producer: &str) -> RouterConfig {
        let mut config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        config.discovery.producer_id = Some(producer.to_string());
        config.discovery.retry = RetryPolicy::immediate(3);
        config.backend.retry = RetryPolicy::immediate(3);
        config
    }

    pub async fn router<S: CoordinationStore>(
        config: RouterConfig,
        store: S,
        provisioner: MemoryProvisioner,
        clock: &ManualClock,
    ) -> ClusteredRouter<S, MemoryProvisioner> {
        RouterBuilder::new(config, store, provisioner)
            .clock(Arc::new(clock.clone()))
            .manual_sweep()
            .build()
            .await
            .unwrap()
    }

    pub fn record_at(ms: i64) -> Record {
        Record::new(ms as f64 / 1000.0, json!({"page": "Rust", "language": "en", "at": ms}))
    }

    pub fn key_at(ms: i64) -> PartitionKey {
        PartitionKey::containing(ms, contracts::Granularity::Hour).unwrap()
    }

    pub fn deadline_of(key: PartitionKey) -> i64 {
        key.window_deadline_ms(Duration::from_secs(600))
    }
}

#[cfg(test)]
mod contract_tests {
    use super::support::config;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BackendKind, Granularity};
    use std::time::Duration;

    #[test]
    fn test_config_survives_toml_round_trip() {
        let original = config("producer-a");
        let rendered = ConfigLoader::to_toml(&original).unwrap();
        let reloaded = ConfigLoader::load_from_str(&rendered, ConfigFormat::Toml).unwrap();

        assert_eq!(reloaded.data_source, "wikipedia");
        assert_eq!(reloaded.tuning.segment_granularity, Granularity::Hour);
        assert_eq!(reloaded.tuning.window_period, Duration::from_secs(600));
        assert_eq!(reloaded.backend.kind, BackendKind::Memory);
        assert_eq!(reloaded.rollup, original.rollup);
    }
}

#[cfg(test)]
mod window_tests {
    use super::support::*;
    use contracts::{ManualClock, RecordOutcome};
    use discovery::InMemoryStore;
    use dispatcher::MemoryProvisioner;
    use std::time::Duration;

    /// Hour buckets, 10 minute window: a 12:05 record is still routed at
    /// 13:05 and dropped at 13:15.
    #[tokio::test]
    async fn test_late_record_accepted_then_dropped() {
        let clock = ManualClock::new(NOON_MS + 65 * MINUTE_MS);
        let provisioner = MemoryProvisioner::new();
        let router = router(config("producer-a"), InMemoryStore::new(), provisioner.clone(), &clock).await;

        let late = record_at(NOON_MS + 5 * MINUTE_MS);
        let result = router.propose(vec![late.clone()]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::Accepted]);

        clock.set(NOON_MS + 75 * MINUTE_MS);
        let result = router.propose(vec![late]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::RejectedExpired]);
        assert_eq!(provisioner.total_records(), 1);
        router.close().await;
    }

    #[tokio::test]
    async fn test_eviction_drains_in_flight_dispatch() {
        let clock = ManualClock::new(NOON_MS + 30 * MINUTE_MS);
        let store = InMemoryStore::new();
        let provisioner = MemoryProvisioner::new();
        let router = router(config("producer-a"), store.clone(), provisioner.clone(), &clock).await;

        let key = key_at(NOON_MS);
        let destinations = router.ensure_partition(key).await.unwrap();
        let backend = provisioner.backend(&destinations[0].id).unwrap();
        backend.set_delay(Duration::from_millis(300));

        let sender = router.clone();
        let in_flight = tokio::spawn(async move {
            sender.propose(vec![record_at(NOON_MS + 31 * MINUTE_MS)]).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let deadline = deadline_of(key);
        clock.set(deadline + 1);
        let retired = router.evict_expired(deadline + 1).await;
        assert_eq!(retired, 1);

        // the dispatch that started before eviction was delivered
        let result = in_flight.await.unwrap();
        assert_eq!(result.outcomes, vec![RecordOutcome::Accepted]);
        assert_eq!(backend.records().len(), 1);
        assert!(backend.is_closed());
        assert!(router.discovery().is_closed(key).await.unwrap());

        let result = router.propose(vec![record_at(NOON_MS + 32 * MINUTE_MS)]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::RejectedExpired]);
        assert_eq!(backend.records().len(), 1);
        router.close().await;
    }

    #[tokio::test]
    async fn test_transient_failures_recovered_without_duplicates() {
        let clock = ManualClock::new(NOON_MS);
        let store = InMemoryStore::new();
        let provisioner = MemoryProvisioner::new();
        let router = router(config("producer-a"), store.clone(), provisioner.clone(), &clock).await;

        store.fail_next(1);
        provisioner.fail_first_sends(1);

        let result = router.propose(vec![record_at(NOON_MS + 1_000)]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::Accepted]);
        assert_eq!(store.create_count(), 1);

        let backends = provisioner.backends();
        assert_eq!(backends.len(), 1);
        let (_, backend) = &backends[0];
        assert_eq!(backend.send_attempts(), 2);
        assert_eq!(backend.records().len(), 1);
        router.close().await;
    }
}

#[cfg(test)]
mod coordination_tests {
    use super::support::*;
    use contracts::{ManualClock, RecordOutcome, SystemClock};
    use discovery::{DirectoryStore, DiscoveryClient, InMemoryStore, Registration};
    use dispatcher::MemoryProvisioner;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_producers_share_one_registration() {
        let clock = ManualClock::new(NOON_MS);
        let store = InMemoryStore::new();
        store.set_latency(Duration::from_millis(20));
        let provisioner = MemoryProvisioner::new();

        let a = router(config("producer-a"), store.clone(), provisioner.clone(), &clock).await;
        let b = router(config("producer-b"), store.clone(), provisioner.clone(), &clock).await;

        let batch = |offset: i64| -> Vec<contracts::Record> {
            (0..10).map(|i| record_at(NOON_MS + offset + i * 1_000)).collect()
        };
        let (ra, rb) = tokio::join!(a.propose(batch(0)), b.propose(batch(60_000)));
        assert_eq!(ra.counts.sent, 10);
        assert_eq!(rb.counts.sent, 10);

        let key = key_at(NOON_MS);
        assert_eq!(store.create_count(), 1);
        assert_eq!(a.destinations(key), b.destinations(key));
        assert_eq!(provisioner.total_records(), 20);

        let owner_a = a.discovery().lookup(key).await.unwrap().unwrap().created_by;
        let owner_b = b.discovery().lookup(key).await.unwrap().unwrap().created_by;
        assert_eq!(owner_a, owner_b);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_proposes_open_partition_once() {
        let clock = ManualClock::new(NOON_MS);
        let store = InMemoryStore::new();
        store.set_latency(Duration::from_millis(10));
        let provisioner = MemoryProvisioner::new();
        let router = router(config("producer-a"), store.clone(), provisioner.clone(), &clock).await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                router.propose(vec![record_at(NOON_MS + i * 1_000)]).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().outcomes, vec![RecordOutcome::Accepted]);
        }

        assert_eq!(store.create_count(), 1);
        assert_eq!(provisioner.provisioned_count(), 1);
        assert_eq!(provisioner.total_records(), 8);
        router.close().await;
    }

    #[tokio::test]
    async fn test_discovery_clients_converge_on_first_registration() {
        let store = InMemoryStore::new();
        let a_config = config("producer-a");
        let b_config = config("producer-b");
        let a = DiscoveryClient::new(store.clone(), "wikipedia", &a_config.discovery, Arc::new(SystemClock));
        let b = DiscoveryClient::new(store.clone(), "wikipedia", &b_config.discovery, Arc::new(SystemClock));

        let key = key_at(NOON_MS);
        let first = router::candidate_destinations(&a_config, key, 1, NOON_MS, "producer-a");
        let mut second = router::candidate_destinations(&b_config, key, 2, NOON_MS, "producer-b");
        second[0].id.push_str("-b");

        let created = a.register(key, first.clone()).await.unwrap();
        assert!(created.is_created());

        match b.register(key, second).await.unwrap() {
            Registration::Adopted(entry) => {
                assert!(entry.same_destinations(&first));
                assert_eq!(entry.created_by, "producer-a");
            }
            Registration::Created(_) => panic!("second producer must adopt"),
        }

        let seen = b.lookup(key).await.unwrap().unwrap();
        assert!(seen.same_destinations(&first));
    }

    #[tokio::test]
    async fn test_directory_store_shared_by_two_routers() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(NOON_MS);
        let pa = MemoryProvisioner::new();
        let pb = MemoryProvisioner::new();

        let a = router(config("producer-a"), DirectoryStore::new(dir.path()), pa.clone(), &clock).await;
        let b = router(config("producer-b"), DirectoryStore::new(dir.path()), pb.clone(), &clock).await;

        let (ra, rb) = tokio::join!(
            a.propose(vec![record_at(NOON_MS + 1_000)]),
            b.propose(vec![record_at(NOON_MS + 2_000)])
        );
        assert_eq!(ra.outcomes, vec![RecordOutcome::Accepted]);
        assert_eq!(rb.outcomes, vec![RecordOutcome::Accepted]);

        let key = key_at(NOON_MS);
        let owner_a = a.discovery().lookup(key).await.unwrap().unwrap();
        let owner_b = b.discovery().lookup(key).await.unwrap().unwrap();
        assert_eq!(owner_a.created_by, owner_b.created_by);
        assert_eq!(owner_a.destination_ids(), owner_b.destination_ids());

        let registrations = std::fs::read_dir(dir.path().join("druid/discovery/wikipedia/partitions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(registrations, 1);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_restarted_producer_adopts_existing_registration() {
        let clock = ManualClock::new(NOON_MS);
        let store = InMemoryStore::new();

        let first = router(config("producer-a"), store.clone(), MemoryProvisioner::new(), &clock).await;
        first.propose(vec![record_at(NOON_MS)]).await;
        let key = key_at(NOON_MS);
        let before = first.destinations(key).unwrap();
        first.close().await;

        let second = router(config("producer-a"), store.clone(), MemoryProvisioner::new(), &clock).await;
        let result = second.propose(vec![record_at(NOON_MS + 1_000)]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::Accepted]);
        assert_eq!(second.destinations(key).unwrap(), before);
        assert_eq!(store.create_count(), 1);
        second.close().await;
    }

    #[tokio::test]
    async fn test_partition_closed_by_peer_is_retired() {
        let clock = ManualClock::new(NOON_MS + 20 * MINUTE_MS);
        let store = InMemoryStore::new();
        let a = router(config("producer-a"), store.clone(), MemoryProvisioner::new(), &clock).await;
        let b = router(config("producer-b"), store.clone(), MemoryProvisioner::new(), &clock).await;

        let key = key_at(NOON_MS);
        a.propose(vec![record_at(NOON_MS)]).await;
        b.propose(vec![record_at(NOON_MS)]).await;
        assert_eq!(b.live_partitions(), 1);

        // producer a's clock runs ahead and retires the bucket
        assert_eq!(a.evict_expired(deadline_of(key) + 1).await, 1);

        b.tick().await;
        assert_eq!(b.partition_phase(key), None);
        let result = b.propose(vec![record_at(NOON_MS + 2_000)]).await;
        assert_eq!(result.outcomes, vec![RecordOutcome::RejectedExpired]);

        a.close().await;
        b.close().await;
    }
}

#[cfg(test)]
mod resolver_tests {
    use contracts::{Granularity, PartitionKey, TimestampRange};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use router::resolve;

    const GRANULARITIES: [Granularity; 12] = [
        Granularity::Second,
        Granularity::Minute,
        Granularity::FiveMinute,
        Granularity::TenMinute,
        Granularity::FifteenMinute,
        Granularity::ThirtyMinute,
        Granularity::Hour,
        Granularity::SixHour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    #[test]
    fn test_every_granularity_buckets_contain_their_timestamps() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = TimestampRange::default();

        for granularity in GRANULARITIES {
            for _ in 0..200 {
                let ms: i64 = rng.random_range(0..4_102_444_800_000); // up to 2100
                let key = resolve(ms as f64 / 1000.0, granularity, &range).unwrap();
                assert!(key.contains(ms), "{granularity} bucket {key} misses {ms}");
                assert_eq!(PartitionKey::containing(key.start_ms(), granularity), Some(key));
                let next = key.next().unwrap();
                assert_eq!(next.start_ms(), key.end_ms());
            }
        }
    }

    #[test]
    fn test_out_of_range_rejected_for_every_granularity() {
        let range = TimestampRange {
            min_seconds: 1_000_000.0,
            max_seconds: 2_000_000.0,
        };
        for granularity in GRANULARITIES {
            assert!(resolve(999_999.0, granularity, &range).is_err());
            assert!(resolve(2_000_001.0, granularity, &range).is_err());
            assert!(resolve(f64::INFINITY, granularity, &range).is_err());
            assert!(resolve(1_500_000.0, granularity, &range).is_ok());
        }
    }
}
