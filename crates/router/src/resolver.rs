//! Timestamp → partition key resolution

use std::time::Duration;

use contracts::{ContractError, Granularity, PartitionKey, RouterTuning, TimestampRange};

/// Resolve `timestamp` (seconds since epoch) to the key of the bucket
/// containing it.
///
/// Sub-millisecond precision is floored away before bucketing, so every
/// instant in `[start, end)` of a bucket yields the same key.
pub fn resolve(
    timestamp: f64,
    granularity: Granularity,
    range: &TimestampRange,
) -> Result<PartitionKey, ContractError> {
    if !timestamp.is_finite() {
        return Err(ContractError::invalid_timestamp(timestamp, "timestamp is not finite"));
    }
    if !range.contains(timestamp) {
        return Err(ContractError::invalid_timestamp(
            timestamp,
            format!(
                "outside accepted range [{}, {}]",
                range.min_seconds, range.max_seconds
            ),
        ));
    }

    let millis = (timestamp * 1000.0).floor();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return Err(ContractError::invalid_timestamp(timestamp, "overflows epoch millis"));
    }

    PartitionKey::containing(millis as i64, granularity).ok_or_else(|| {
        ContractError::invalid_timestamp(timestamp, format!("cannot be bucketed at {granularity}"))
    })
}

/// Resolver bound to one router's granularity and sane range
///
/// Besides the fixed range, timestamps more than `future_limit` ahead of the
/// clock are rejected, so a producer with a broken clock cannot open
/// partitions that never expire.
#[derive(Debug, Clone, Copy)]
pub struct PartitionResolver {
    granularity: Granularity,
    range: TimestampRange,
    future_limit: Duration,
}

impl PartitionResolver {
    pub fn new(granularity: Granularity, range: TimestampRange) -> Self {
        Self {
            granularity,
            range,
            future_limit: Duration::MAX,
        }
    }

    /// Window plus warming period: the furthest ahead a record can still be
    /// meant for a bucket this router would open.
    pub fn from_tuning(tuning: &RouterTuning) -> Self {
        Self::new(tuning.segment_granularity, tuning.timestamp_range)
            .with_future_limit(tuning.window_period.saturating_add(tuning.warming_period))
    }

    pub fn with_future_limit(mut self, limit: Duration) -> Self {
        self.future_limit = limit;
        self
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn future_limit(&self) -> Duration {
        self.future_limit
    }

    #[inline]
    pub fn resolve(&self, timestamp: f64) -> Result<PartitionKey, ContractError> {
        resolve(timestamp, self.granularity, &self.range)
    }

    /// Resolve `timestamp` as seen at `now_ms`, rejecting it when it lies
    /// beyond the future limit.
    pub fn resolve_at(&self, timestamp: f64, now_ms: i64) -> Result<PartitionKey, ContractError> {
        let key = self.resolve(timestamp)?;
        let limit_ms = self.future_limit.as_millis().min(i64::MAX as u128) as i64;
        let latest_ms = now_ms.saturating_add(limit_ms);
        if (timestamp * 1000.0).floor() > latest_ms as f64 {
            return Err(ContractError::invalid_timestamp(
                timestamp,
                format!("more than {} ahead of the clock", humantime::format_duration(self.future_limit)),
            ));
        }
        Ok(key)
    }

    /// Key of the bucket containing `now_ms`
    pub fn key_at(&self, now_ms: i64) -> Option<PartitionKey> {
        PartitionKey::containing(now_ms, self.granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const NOON: f64 = 1_709_294_400.0; // 2024-03-01T12:00:00Z

    fn hourly() -> PartitionResolver {
        PartitionResolver::new(Granularity::Hour, TimestampRange::default())
    }

    #[test]
    fn test_resolve_truncates_to_bucket_start() {
        let key = hourly().resolve(NOON + 5.0 * 60.0).unwrap();
        assert_eq!(key.start_ms(), (NOON * 1000.0) as i64);
        assert_eq!(key.end_ms(), ((NOON + 3600.0) * 1000.0) as i64);
    }

    #[test]
    fn test_bucket_edges() {
        let resolver = hourly();
        let start = resolver.resolve(NOON).unwrap();
        let last = resolver.resolve(NOON + 3599.999).unwrap();
        let next = resolver.resolve(NOON + 3600.0).unwrap();
        assert_eq!(start, last);
        assert_eq!(start.next(), Some(next));
    }

    #[test]
    fn test_rejects_non_finite() {
        let resolver = hourly();
        for ts in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                resolver.resolve(ts),
                Err(ContractError::InvalidTimestamp { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_out_of_range() {
        let resolver = PartitionResolver::new(
            Granularity::Hour,
            TimestampRange {
                min_seconds: NOON,
                max_seconds: NOON + 86_400.0,
            },
        );
        assert!(resolver.resolve(NOON - 1.0).is_err());
        assert!(resolver.resolve(NOON + 86_401.0).is_err());
        assert!(resolver.resolve(NOON + 10.0).is_ok());
    }

    #[test]
    fn test_rejects_timestamps_ahead_of_future_limit() {
        let tuning = RouterTuning {
            window_period: Duration::from_secs(600),
            warming_period: Duration::from_secs(300),
            ..Default::default()
        };
        let resolver = PartitionResolver::from_tuning(&tuning);
        let now_ms = (NOON * 1000.0) as i64;
        assert_eq!(resolver.future_limit(), Duration::from_secs(900));

        assert!(resolver.resolve_at(NOON + 900.0, now_ms).is_ok());
        assert!(matches!(
            resolver.resolve_at(NOON + 901.0, now_ms),
            Err(ContractError::InvalidTimestamp { .. })
        ));
        // 1000 years ahead is inside the fixed range but not the clock horizon
        let far = NOON + 1000.0 * 365.0 * 86_400.0;
        assert!(resolver.resolve(far).is_ok());
        assert!(resolver.resolve_at(far, now_ms).is_err());
        // late records are not limited here
        assert!(resolver.resolve_at(NOON - 86_400.0, now_ms).is_ok());
    }

    #[test]
    fn test_same_bucket_resolves_identically() {
        let mut rng = StdRng::seed_from_u64(7);
        let resolver = PartitionResolver::new(Granularity::FifteenMinute, TimestampRange::default());
        for _ in 0..500 {
            let base = rng.random_range(0.0..4_000_000_000.0_f64);
            let key = resolver.resolve(base).unwrap();
            let start = key.start_ms() as f64 / 1000.0;
            let end = key.end_ms() as f64 / 1000.0;
            let inside = rng.random_range(start..end);
            assert_eq!(resolver.resolve(inside).unwrap(), key);
            assert!(key.contains((inside * 1000.0).floor() as i64));
        }
    }

    #[test]
    fn test_resolution_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(11);
        let resolver = hourly();
        for _ in 0..500 {
            let a = rng.random_range(0.0..4_000_000_000.0_f64);
            let b = rng.random_range(0.0..4_000_000_000.0_f64);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            assert!(resolver.resolve(lo).unwrap() <= resolver.resolve(hi).unwrap());
        }
    }
}
