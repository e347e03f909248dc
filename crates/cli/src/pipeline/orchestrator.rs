//! Pipeline orchestrator - feeds newline-delimited JSON into a router.
//!
//! Lines are batched up to `batch_size` or until `linger` passes without new
//! input, then proposed. The router is always closed before returning, also
//! when the run is interrupted.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use contracts::{BackendProvisioner, RouterConfig, StoreKind};
use discovery::{CoordinationStore, DirectoryStore, InMemoryStore};
use dispatcher::ConfigProvisioner;
use router::ClusteredRouter;

use super::PipelineStats;
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Router configuration
    pub router: RouterConfig,

    /// NDJSON input file (None = stdin)
    pub input: Option<PathBuf>,

    /// Records per proposal
    pub batch_size: usize,

    /// Idle time after which a partial batch is proposed
    pub linger: Duration,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the input ends or `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let provisioner =
            ConfigProvisioner::new(self.config.router.backend.clone()).map_err(CliError::from)?;

        let stats = match self.config.router.discovery.store {
            StoreKind::Memory => {
                info!("Using process-local coordination store");
                self.run_with(InMemoryStore::new(), provisioner, shutdown).await?
            }
            StoreKind::Directory => {
                let dir = self
                    .config
                    .router
                    .discovery
                    .directory
                    .clone()
                    .ok_or_else(|| CliError::store("<unset>", "discovery.directory is required"))?;
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| CliError::store(&dir, e.to_string()))?;
                info!(directory = %dir.display(), "Using shared directory coordination store");
                self.run_with(DirectoryStore::new(dir), provisioner, shutdown).await?
            }
        };

        Ok(stats)
    }

    async fn run_with<S, P, F>(&self, store: S, provisioner: P, shutdown: F) -> Result<PipelineStats>
    where
        S: CoordinationStore,
        P: BackendProvisioner,
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();

        let router = ClusteredRouter::open(self.config.router.clone(), store, provisioner)
            .await
            .map_err(CliError::from)?;

        info!(
            data_source = %router.config().data_source,
            producer = %router.discovery().producer_id(),
            "Router open"
        );

        let pumped = match self.open_input().await {
            Ok((reader, source_name)) => self.pump(&router, reader, &source_name, shutdown).await,
            Err(e) => Err(e),
        };

        info!("Closing router...");
        router.close().await;

        let mut stats = pumped?;
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            throughput = format!("{:.2}", stats.throughput()),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }

    async fn open_input(&self) -> Result<(Box<dyn AsyncBufRead + Unpin + Send>, String), CliError> {
        match &self.config.input {
            Some(path) => {
                let name = path.display().to_string();
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| CliError::input(&name, e))?;
                Ok((Box::new(BufReader::new(file)), name))
            }
            None => Ok((Box::new(BufReader::new(tokio::io::stdin())), "<stdin>".to_string())),
        }
    }

    async fn pump<S, P, F>(
        &self,
        router: &ClusteredRouter<S, P>,
        reader: Box<dyn AsyncBufRead + Unpin + Send>,
        source_name: &str,
        shutdown: F,
    ) -> Result<PipelineStats, CliError>
    where
        S: CoordinationStore,
        P: BackendProvisioner,
        F: Future<Output = ()>,
    {
        let mut stats = PipelineStats::default();
        let mut lines = reader.lines();
        let mut batch: Vec<Value> = Vec::with_capacity(self.config.batch_size);
        let mut linger_deadline: Option<tokio::time::Instant> = None;
        let mut shutdown = std::pin::pin!(shutdown);

        info!(source = %source_name, batch_size = self.config.batch_size, "Reading input");

        loop {
            let linger = async {
                match linger_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    stats.interrupted = true;
                    break;
                }
                _ = linger => {
                    linger_deadline = None;
                    self.flush(router, &mut batch, &mut stats).await;
                }
                line = lines.next_line() => {
                    let Some(line) = line.map_err(|e| CliError::input(source_name, e))? else {
                        debug!("End of input");
                        break;
                    };
                    stats.lines_read += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(payload) => batch.push(payload),
                        Err(e) => {
                            stats.parse_errors += 1;
                            warn!(line = stats.lines_read, error = %e, "Skipping unparseable line");
                            continue;
                        }
                    }

                    if batch.len() >= self.config.batch_size {
                        linger_deadline = None;
                        self.flush(router, &mut batch, &mut stats).await;
                    } else if linger_deadline.is_none() {
                        linger_deadline = Some(tokio::time::Instant::now() + self.config.linger);
                    }
                }
            }
        }

        self.flush(router, &mut batch, &mut stats).await;
        Ok(stats)
    }

    async fn flush<S, P>(
        &self,
        router: &ClusteredRouter<S, P>,
        batch: &mut Vec<Value>,
        stats: &mut PipelineStats,
    ) where
        S: CoordinationStore,
        P: BackendProvisioner,
    {
        if batch.is_empty() {
            return;
        }

        let payloads = std::mem::take(batch);
        let started = Instant::now();
        let result = router.propose_payloads(payloads).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        stats.dispatch.update(&result, latency_ms);

        for (destination, snapshot) in router.destination_metrics() {
            observability::record_destination_queue_depth(&destination, snapshot.queue_len as u64);
        }

        info!(
            records = result.len(),
            sent = result.counts.sent,
            dropped = result.dropped_count(),
            latency_ms = format!("{:.2}", latency_ms),
            "Batch proposed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};
    use serde_json::json;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    const CONFIG: &str = r#"
data_source = "pipeline"

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

[backend]
kind = "memory"
"#;

    fn now_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
    }

    fn pipeline(input: PathBuf, batch_size: usize) -> Pipeline {
        Pipeline::new(PipelineConfig {
            router: ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap(),
            input: Some(input),
            batch_size,
            linger: Duration::from_secs(10),
            metrics_port: None,
        })
    }

    #[tokio::test]
    async fn test_routes_file_input() {
        let now = now_ms();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..3 {
            writeln!(file, "{}", json!({"timestamp": now, "page": i})).unwrap();
        }
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", json!({"page": "no timestamp"})).unwrap();
        writeln!(file, "{}", json!({"timestamp": now - 2 * 86_400_000, "page": "old"})).unwrap();

        let stats = pipeline(file.path().to_path_buf(), 2)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.lines_read, 7);
        assert_eq!(stats.parse_errors, 1);
        assert!(!stats.interrupted);
        let summary = stats.dispatch.summary();
        assert_eq!(summary.counts.sent, 3);
        assert_eq!(summary.counts.invalid, 1);
        assert_eq!(summary.counts.dropped_expired, 1);
        assert_eq!(summary.proposals, 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_run() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let stats = pipeline(file.path().to_path_buf(), 10)
            .run(async {})
            .await
            .unwrap();
        assert_eq!(stats.lines_read, 0);
        assert_eq!(stats.dispatch.proposals, 0);
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let result = pipeline(PathBuf::from("/definitely/not/here.ndjson"), 10)
            .run(std::future::pending())
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read input"));
    }
}
