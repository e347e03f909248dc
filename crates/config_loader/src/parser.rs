//! Config parsing
//!
//! TOML (preferred) and JSON.

use contracts::{ContractError, RouterConfig};

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML config
pub fn parse_toml(content: &str) -> Result<RouterConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON config
pub fn parse_json(content: &str) -> Result<RouterConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse by format
pub fn parse(content: &str, format: ConfigFormat) -> Result<RouterConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DimensionSpec, Granularity, QueryGranularity};
    use std::time::Duration;

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
data_source = "hey"

[discovery]
root_path = "/test/discovery"

[location]
indexer_service = "druid:local:indexer"
destination_pattern = "druid:local:firehose:%s"

[rollup]
query_granularity = "minute"
[rollup.dimensions]
mode = "specific"
dimensions = ["column"]
[[rollup.aggregators]]
type = "count"
name = "cnt"

[tuning]
segment_granularity = "hour"
window_period = "PT10M"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.data_source, "hey");
        assert_eq!(config.discovery.root_path, "/test/discovery");
        assert_eq!(config.tuning.segment_granularity, Granularity::Hour);
        assert_eq!(config.tuning.window_period, Duration::from_secs(600));
        assert_eq!(config.rollup.query_granularity, QueryGranularity::Minute);
        assert!(matches!(
            config.rollup.dimensions,
            DimensionSpec::Specific { .. }
        ));
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "data_source": "hey",
            "discovery": {},
            "location": {
                "indexer_service": "druid:local:indexer",
                "destination_pattern": "druid:local:firehose:%s"
            },
            "rollup": {
                "dimensions": { "mode": "schemaless", "exclusions": ["column"] },
                "aggregators": [{ "type": "count", "name": "cnt" }]
            }
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert!(!config.rollup.dimensions.includes("column"));
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_period() {
        let content = r#"
data_source = "hey"
[discovery]
[location]
indexer_service = "i"
destination_pattern = "f:%s"
[rollup]
[rollup.dimensions]
mode = "schemaless"
[[rollup.aggregators]]
type = "count"
name = "cnt"
[tuning]
window_period = "P1M"
"#;
        assert!(matches!(
            parse_toml(content),
            Err(ContractError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
