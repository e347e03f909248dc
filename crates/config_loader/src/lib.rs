//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Produce a `RouterConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("router.toml")).unwrap();
//! println!("Data source: {}", config.data_source);
//! ```

mod parser;
mod validator;

pub use contracts::RouterConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<RouterConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<RouterConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Validate an in-memory configuration
    pub fn validate(config: &RouterConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize RouterConfig to TOML string
    pub fn to_toml(config: &RouterConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize RouterConfig to JSON string
    pub fn to_json(config: &RouterConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(content: &str, format: ConfigFormat) -> Result<RouterConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
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
replicants = 2
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.data_source, "hey");
        assert_eq!(config.tuning.replicants, 2);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config.data_source, config2.data_source);
        assert_eq!(config.rollup, config2.rollup);
        assert_eq!(config.tuning, config2.tuning);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config.location.destination_pattern, config2.location.destination_pattern);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MINIMAL_TOML.replace("replicants = 2", "partitions = 0");
        let result = ConfigLoader::load_from_str(&content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("partitions"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.data_source, "hey");

        let unknown = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(unknown.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }
}
