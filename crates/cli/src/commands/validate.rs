//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{BackendKind, RouterConfig, StoreKind};

use super::load_config;
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    data_source: String,
    segment_granularity: String,
    window_period_ms: u64,
    destinations_per_bucket: usize,
    store: String,
    backend: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_config(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    data_source: config.data_source.clone(),
                    segment_granularity: config.tuning.segment_granularity.to_string(),
                    window_period_ms: config.tuning.window_period.as_millis() as u64,
                    destinations_per_bucket: config.tuning.destinations_per_key(),
                    store: format!("{:?}", config.discovery.store),
                    backend: format!("{:?}", config.backend.kind),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues worth pointing out
fn collect_warnings(config: &RouterConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.discovery.store == StoreKind::Memory {
        warnings.push(
            "discovery.store = \"memory\" is process-local; producers in other processes will not converge"
                .to_string(),
        );
    }

    match config.backend.kind {
        BackendKind::Log => {
            warnings.push("backend.kind = \"log\" only logs batches; nothing is delivered".to_string())
        }
        BackendKind::Memory => warnings
            .push("backend.kind = \"memory\" keeps records in process memory only".to_string()),
        BackendKind::File | BackendKind::Tcp => {}
    }

    let tuning = &config.tuning;
    let bucket = tuning.segment_granularity.max_duration();
    if tuning.window_period >= bucket {
        warnings.push(format!(
            "tuning.window_period ({:?}) is not shorter than one {} bucket; many partitions stay open at once",
            tuning.window_period, tuning.segment_granularity
        ));
    }
    if tuning.warming_period > bucket {
        warnings.push("tuning.warming_period exceeds one bucket; only the next bucket is warmed".to_string());
    }
    if tuning.sweep_interval > tuning.window_period {
        warnings.push(
            "tuning.sweep_interval is longer than the window period; expired partitions linger".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Data source: {}", summary.data_source);
            println!("  Segment granularity: {}", summary.segment_granularity);
            println!("  Window period: {} ms", summary.window_period_ms);
            println!("  Destinations per bucket: {}", summary.destinations_per_bucket);
            println!("  Store: {}", summary.store);
            println!("  Backend: {}", summary.backend);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    const CONFIG: &str = r#"
data_source = "hey"

[discovery]
root_path = "/test/discovery"

[location]
indexer_service = "druid:local:indexer"
destination_pattern = "druid:local:firehose:%s"

[rollup]
[rollup.dimensions]
mode = "schemaless"
[[rollup.aggregators]]
type = "count"
name = "cnt"
"#;

    #[test]
    fn test_valid_config_with_warnings() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid, "{:?}", result.error);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("process-local")));
        assert_eq!(result.summary.unwrap().data_source, "hey");
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: PathBuf::from("/definitely/not/here.toml"),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("not found"));
    }
}
