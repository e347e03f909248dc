//! Candidate destination naming

use contracts::{DestinationDescriptor, PartitionKey, RouterConfig};

/// Destinations this producer proposes for `key`: one per
/// (partition, replicant) pair.
///
/// Ids are derived from the data source and bucket start, so two producers
/// proposing the same key propose identical ids.
pub fn candidate_destinations(
    config: &RouterConfig,
    key: PartitionKey,
    rollup_fingerprint: u64,
    now_ms: i64,
    producer_id: &str,
) -> Vec<DestinationDescriptor> {
    let tuning = &config.tuning;
    let bucket = key.compact_start();
    let mut out = Vec::with_capacity(tuning.destinations_per_key());

    for partition_num in 0..tuning.partitions {
        for replicant in 0..tuning.replicants {
            let suffix = format!(
                "{}-{}-{:04}-{:04}",
                config.data_source, bucket, partition_num, replicant
            );
            out.push(DestinationDescriptor {
                id: config.location.destination_id(&suffix),
                data_source: config.data_source.clone(),
                indexer_service: config.location.indexer_service.clone(),
                partition: key,
                partition_num,
                replicant,
                rollup_fingerprint,
                created_at_ms: now_ms,
                created_by: producer_id.to_string(),
            });
        }
    }
    out
}
