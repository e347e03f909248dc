//! `info` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use contracts::{
    Clock, DestinationDescriptor, PartitionKey, RegistrationEntry, RouterConfig, StoreKind,
    SystemClock,
};
use discovery::{CoordinationStore, DirectoryStore, DiscoveryClient, InMemoryStore};

use super::load_config;
use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    data_source: String,
    tuning: TuningInfo,
    discovery: DiscoveryInfo,
    backend: BackendInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_bucket: Option<BucketInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    registrations: Option<Vec<RegistrationInfo>>,
}

#[derive(Serialize)]
struct TuningInfo {
    segment_granularity: String,
    window_period_ms: u64,
    warming_period_ms: u64,
    partitions: u32,
    replicants: u32,
}

#[derive(Serialize)]
struct DiscoveryInfo {
    store: String,
    root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<String>,
    refresh_interval_ms: u64,
}

#[derive(Serialize)]
struct BackendInfo {
    kind: String,
    queue_capacity: usize,
    max_attempts: u32,
}

#[derive(Serialize)]
struct BucketInfo {
    interval: String,
    deadline_ms: i64,
    destinations: Vec<String>,
}

#[derive(Serialize)]
struct RegistrationInfo {
    interval: String,
    created_by: String,
    created_at_ms: i64,
    destinations: Vec<String>,
}

/// Execute the `info` command
pub async fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let current_bucket = if args.destinations {
        Some(preview_bucket(&config)?)
    } else {
        None
    };

    let registrations = if args.registrations {
        Some(load_registrations(&config).await?)
    } else {
        None
    };

    let info = build_config_info(&config, current_bucket, registrations);
    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

/// Destinations this producer would propose for the bucket containing now
fn preview_bucket(config: &RouterConfig) -> Result<BucketInfo> {
    let now = SystemClock.now_ms();
    let key = PartitionKey::containing(now, config.tuning.segment_granularity)
        .context("Current time cannot be bucketed")?;
    let producer = config
        .discovery
        .producer_id
        .clone()
        .unwrap_or_else(|| "beamctl-info".to_string());
    let destinations: Vec<DestinationDescriptor> =
        router::candidate_destinations(config, key, config.rollup.fingerprint(), now, &producer);

    Ok(BucketInfo {
        interval: key.to_string(),
        deadline_ms: key.window_deadline_ms(config.tuning.window_period),
        destinations: destinations.into_iter().map(|d| d.id).collect(),
    })
}

async fn load_registrations(config: &RouterConfig) -> Result<Vec<RegistrationInfo>> {
    let entries = match config.discovery.store {
        StoreKind::Memory => {
            warn!("Memory store is process-local; no registrations are visible from here");
            list_registrations(InMemoryStore::new(), config).await?
        }
        StoreKind::Directory => {
            let dir = config
                .discovery
                .directory
                .clone()
                .ok_or_else(|| CliError::store("<unset>", "discovery.directory is required"))?;
            if !dir.exists() {
                return Err(CliError::store(&dir, "directory does not exist").into());
            }
            list_registrations(DirectoryStore::new(dir), config).await?
        }
    };

    Ok(entries
        .into_iter()
        .map(|entry| RegistrationInfo {
            interval: entry.partition.to_string(),
            created_by: entry.created_by.clone(),
            created_at_ms: entry.created_at_ms,
            destinations: entry.destination_ids().into_iter().map(String::from).collect(),
        })
        .collect())
}

async fn list_registrations<S: CoordinationStore>(
    store: S,
    config: &RouterConfig,
) -> Result<Vec<RegistrationEntry>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = DiscoveryClient::new(store, config.data_source.clone(), &config.discovery, clock);
    client
        .refresh_all()
        .await
        .context("Failed to read registrations from the coordination store")
}

fn build_config_info(
    config: &RouterConfig,
    current_bucket: Option<BucketInfo>,
    registrations: Option<Vec<RegistrationInfo>>,
) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", config.version),
        data_source: config.data_source.clone(),
        tuning: TuningInfo {
            segment_granularity: config.tuning.segment_granularity.to_string(),
            window_period_ms: config.tuning.window_period.as_millis() as u64,
            warming_period_ms: config.tuning.warming_period.as_millis() as u64,
            partitions: config.tuning.partitions,
            replicants: config.tuning.replicants,
        },
        discovery: DiscoveryInfo {
            store: format!("{:?}", config.discovery.store),
            root_path: config.discovery.root_path.clone(),
            directory: config
                .discovery
                .directory
                .as_ref()
                .map(|d| d.display().to_string()),
            refresh_interval_ms: config.discovery.refresh_interval.as_millis() as u64,
        },
        backend: BackendInfo {
            kind: format!("{:?}", config.backend.kind),
            queue_capacity: config.backend.queue_capacity,
            max_attempts: config.backend.retry.max_attempts,
        },
        current_bucket,
        registrations,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Router Configuration ===\n");
    println!("Version: {}", info.version);
    println!("Data source: {}", info.data_source);

    println!("\nTuning:");
    println!("  Segment granularity: {}", info.tuning.segment_granularity);
    println!("  Window period: {} ms", info.tuning.window_period_ms);
    println!("  Warming period: {} ms", info.tuning.warming_period_ms);
    println!(
        "  Partitions x replicants: {} x {}",
        info.tuning.partitions, info.tuning.replicants
    );

    println!("\nDiscovery:");
    println!("  Store: {}", info.discovery.store);
    println!("  Root path: {}", info.discovery.root_path);
    if let Some(ref dir) = info.discovery.directory {
        println!("  Directory: {}", dir);
    }
    println!("  Refresh interval: {} ms", info.discovery.refresh_interval_ms);

    println!("\nBackend:");
    println!("  Kind: {}", info.backend.kind);
    println!("  Queue capacity: {}", info.backend.queue_capacity);
    println!("  Max attempts: {}", info.backend.max_attempts);

    if let Some(ref bucket) = info.current_bucket {
        println!("\nCurrent bucket {}:", bucket.interval);
        println!("  Deadline: {}", bucket.deadline_ms);
        for id in &bucket.destinations {
            println!("  - {}", id);
        }
    }

    if let Some(ref registrations) = info.registrations {
        println!("\nRegistrations ({}):", registrations.len());
        for reg in registrations {
            println!(
                "  {} by {} -> {}",
                reg.interval,
                reg.created_by,
                reg.destinations.join(", ")
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    const CONFIG: &str = r#"
data_source = "hey"

[discovery]
root_path = "/test/discovery"
producer_id = "info-test"

[location]
indexer_service = "druid:local:indexer"
destination_pattern = "druid:local:firehose:%s"

[rollup]
[rollup.dimensions]
mode = "schemaless"
[[rollup.aggregators]]
type = "count"
name = "cnt"

[tuning]
partitions = 2
replicants = 2
"#;

    #[test]
    fn test_preview_bucket_lists_every_destination() {
        let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let bucket = preview_bucket(&config).unwrap();
        assert_eq!(bucket.destinations.len(), 4);
        assert!(bucket.destinations.iter().all(|id| id.starts_with("druid:local:firehose:hey-")));
        assert!(bucket.destinations[3].ends_with("-0001-0001"));
    }

    #[tokio::test]
    async fn test_registrations_from_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        config.discovery.store = StoreKind::Directory;
        config.discovery.directory = Some(dir.path().to_path_buf());

        let registrations = load_registrations(&config).await.unwrap();
        assert!(registrations.is_empty());

        let info = build_config_info(&config, None, Some(registrations));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["tuning"]["partitions"], 2);
        assert!(json.get("current_bucket").is_none());
    }
}
