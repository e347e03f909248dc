//! Config validation
//!
//! Rules:
//! - field ranges declared with `validator` derives (partitions, replicants, retries, ...)
//! - destination pattern contains `%s`
//! - window period and sweep interval > 0
//! - timestamp range min < max
//! - rollup is well formed for the segment granularity
//! - directory store has a directory
//! - tombstones outlive the window period
//! - tcp backend has an address

use contracts::{BackendKind, ContractError, RouterConfig, StoreKind};
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Validate a RouterConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &RouterConfig) -> Result<(), ContractError> {
    validate_declared_ranges(config)?;
    validate_location(config)?;
    validate_discovery(config)?;
    validate_tuning(config)?;
    config.rollup.validate(config.tuning.segment_granularity)?;
    validate_backend(config)?;
    Ok(())
}

/// Derived `validator` rules
fn validate_declared_ranges(config: &RouterConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_error("", &errors)
            .unwrap_or_else(|| ("<config>".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

fn first_error(prefix: &str, errors: &ValidationErrors) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        let found = match kind {
            ValidationErrorsKind::Field(errs) => errs.first().map(|e| (path, describe(e))),
            ValidationErrorsKind::Struct(inner) => first_error(&path, inner),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(idx, inner)| first_error(&format!("{path}[{idx}]"), inner)),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

fn describe(error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }
    match error.params.get("value") {
        Some(value) => format!("failed '{}' check, got {}", error.code, value),
        None => format!("failed '{}' check", error.code),
    }
}

fn validate_location(config: &RouterConfig) -> Result<(), ContractError> {
    if !config.location.destination_pattern.contains("%s") {
        return Err(ContractError::config_validation(
            "location.destination_pattern",
            format!(
                "pattern '{}' must contain '%s'",
                config.location.destination_pattern
            ),
        ));
    }
    Ok(())
}

fn validate_discovery(config: &RouterConfig) -> Result<(), ContractError> {
    let discovery = &config.discovery;

    if !discovery.root_path.starts_with('/') || discovery.root_path.ends_with('/') {
        return Err(ContractError::config_validation(
            "discovery.root_path",
            format!(
                "root_path '{}' must start with '/' and not end with '/'",
                discovery.root_path
            ),
        ));
    }

    if discovery.store == StoreKind::Directory && discovery.directory.is_none() {
        return Err(ContractError::config_validation(
            "discovery.directory",
            "directory store requires a directory",
        ));
    }

    if discovery.refresh_interval.is_zero() {
        return Err(ContractError::config_validation(
            "discovery.refresh_interval",
            "refresh_interval must be > 0",
        ));
    }

    if discovery.tombstone_retention < config.tuning.window_period {
        return Err(ContractError::config_validation(
            "discovery.tombstone_retention",
            "tombstone_retention must be at least the window period",
        ));
    }

    Ok(())
}

fn validate_tuning(config: &RouterConfig) -> Result<(), ContractError> {
    let tuning = &config.tuning;

    if tuning.window_period.is_zero() {
        return Err(ContractError::config_validation(
            "tuning.window_period",
            "window_period must be > 0",
        ));
    }

    if tuning.sweep_interval.is_zero() {
        return Err(ContractError::config_validation(
            "tuning.sweep_interval",
            "sweep_interval must be > 0",
        ));
    }

    let range = &tuning.timestamp_range;
    if !(range.min_seconds.is_finite() && range.max_seconds.is_finite())
        || range.min_seconds >= range.max_seconds
    {
        return Err(ContractError::config_validation(
            "tuning.timestamp_range",
            format!(
                "min_seconds ({}) must be < max_seconds ({})",
                range.min_seconds, range.max_seconds
            ),
        ));
    }

    if tuning.warming_period > tuning.segment_granularity.max_duration() {
        return Err(ContractError::config_validation(
            "tuning.warming_period",
            format!(
                "warming_period must not exceed one {} bucket",
                tuning.segment_granularity
            ),
        ));
    }

    Ok(())
}

fn validate_backend(config: &RouterConfig) -> Result<(), ContractError> {
    if config.backend.kind == BackendKind::Tcp && !config.backend.params.contains_key("addr") {
        return Err(ContractError::config_validation(
            "backend.params.addr",
            "tcp backend requires an 'addr' parameter",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        Aggregator, BackendConfig, ConfigVersion, DimensionSpec, DiscoveryConfig, LocationConfig,
        QueryGranularity, RollupSpec, RouterTuning, TimestampConfig,
    };
    use std::time::Duration;

    fn minimal_config() -> RouterConfig {
        RouterConfig {
            version: ConfigVersion::V1,
            data_source: "hey".into(),
            discovery: DiscoveryConfig::default(),
            location: LocationConfig {
                indexer_service: "druid:local:indexer".into(),
                destination_pattern: "druid:local:firehose:%s".into(),
            },
            rollup: RollupSpec::new(
                DimensionSpec::specific(["column"]),
                vec![Aggregator::count("cnt")],
                QueryGranularity::Minute,
            ),
            tuning: RouterTuning::default(),
            timestamp: TimestampConfig::default(),
            backend: BackendConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = minimal_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_data_source() {
        let mut config = minimal_config();
        config.data_source = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("data_source"), "got: {err}");
    }

    #[test]
    fn test_zero_replicants_reports_nested_path() {
        let mut config = minimal_config();
        config.tuning.replicants = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("tuning.replicants"), "got: {err}");
    }

    #[test]
    fn test_pattern_without_placeholder() {
        let mut config = minimal_config();
        config.location.destination_pattern = "druid:local:firehose".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("must contain '%s'"), "got: {err}");
    }

    #[test]
    fn test_zero_window_period() {
        let mut config = minimal_config();
        config.tuning.window_period = Duration::ZERO;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("window_period"), "got: {err}");
    }

    #[test]
    fn test_inverted_timestamp_range() {
        let mut config = minimal_config();
        config.tuning.timestamp_range.min_seconds = 10.0;
        config.tuning.timestamp_range.max_seconds = 5.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("min_seconds"), "got: {err}");
    }

    #[test]
    fn test_directory_store_requires_path() {
        let mut config = minimal_config();
        config.discovery.store = StoreKind::Directory;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("directory"), "got: {err}");
    }

    #[test]
    fn test_tombstone_retention_covers_window() {
        let mut config = minimal_config();
        config.discovery.tombstone_retention = Duration::from_secs(60);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("tombstone_retention"), "got: {err}");

        config.discovery.tombstone_retention = config.tuning.window_period;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_tcp_backend_requires_addr() {
        let mut config = minimal_config();
        config.backend.kind = BackendKind::Tcp;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("addr"), "got: {err}");
    }

    #[test]
    fn test_rollup_checked_against_segment() {
        let mut config = minimal_config();
        config.rollup.query_granularity = QueryGranularity::Day;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("query_granularity"), "got: {err}");
    }
}
