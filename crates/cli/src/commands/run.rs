//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use contracts::RouterConfig;

use super::load_config;
use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(ref producer_id) = args.producer_id {
        info!(producer_id = %producer_id, "Overriding producer id from CLI");
        config.discovery.producer_id = Some(producer_id.clone());
    }

    info!(
        data_source = %config.data_source,
        granularity = %config.tuning.segment_granularity,
        partitions = config.tuning.partitions,
        replicants = config.tuning.replicants,
        backend = ?config.backend.kind,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }

    let pipeline = Pipeline::new(PipelineConfig {
        router: config,
        input: args.input.clone(),
        batch_size: args.batch_size,
        linger: Duration::from_millis(args.linger_ms),
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    });

    let timeout = (args.timeout != 0).then(|| Duration::from_secs(args.timeout));
    let stop = async move {
        tokio::select! {
            _ = shutdown_signal() => warn!("Received shutdown signal, closing router..."),
            _ = sleep_or_forever(timeout) => warn!("Timeout reached, closing router..."),
        }
    };

    let stats = pipeline.run(stop).await.context("Pipeline execution failed")?;

    info!(
        lines = stats.lines_read,
        sent = stats.dispatch.counts.sent,
        dropped = stats.dispatch.counts.dropped(),
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline completed"
    );
    stats.print_summary();

    info!("beamctl finished");
    Ok(())
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &RouterConfig) {
    let tuning = &config.tuning;
    println!("\n=== Configuration Summary ===\n");
    println!("Data source: {}", config.data_source);
    println!("\nWindowing:");
    println!("  Segment granularity: {}", tuning.segment_granularity);
    println!("  Window period: {:?}", tuning.window_period);
    println!("  Warming period: {:?}", tuning.warming_period);
    println!(
        "  Destinations per bucket: {} partition(s) x {} replicant(s)",
        tuning.partitions, tuning.replicants
    );
    println!("\nDiscovery:");
    println!("  Store: {:?}", config.discovery.store);
    println!("  Root path: {}", config.discovery.root_path);
    if let Some(ref dir) = config.discovery.directory {
        println!("  Directory: {}", dir.display());
    }
    println!("\nBackend: {:?}", config.backend.kind);
    for (key, value) in &config.backend.params {
        println!("  {key} = {value}");
    }
    println!();
}
