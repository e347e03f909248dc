//! TcpBackend - length-prefixed batches over a persistent TCP connection
//!
//! Request: 4-byte big-endian body length, then the body (JSON or bincode).
//! Reply: 4-byte big-endian count of accepted records (the leading records of
//! the batch).

use contracts::{BatchAck, ContractError, DestinationBackend, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// Serialization format for the request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON (human-readable, larger)
    #[default]
    Json,
    /// Bincode (binary, compact)
    Bincode,
}

/// Configuration for TcpBackend
#[derive(Debug, Clone)]
pub struct TcpBackendConfig {
    /// Target address (`host:port`)
    pub addr: String,
    /// Serialization format
    pub format: WireFormat,
    /// Connect/round-trip timeout
    pub timeout: Duration,
    /// Largest body accepted for one batch
    pub max_frame_size: usize,
}

impl TcpBackendConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?
            .clone();

        let format = match params.get("format").map(String::as_str) {
            Some("bincode") => WireFormat::Bincode,
            Some("json") | None => WireFormat::Json,
            Some(other) => return Err(format!("unknown format '{}'", other)),
        };

        let timeout = match params.get("timeout_ms") {
            Some(raw) => Duration::from_millis(
                raw.parse()
                    .map_err(|e| format!("invalid timeout_ms '{}': {}", raw, e))?,
            ),
            None => Duration::from_secs(5),
        };

        let max_frame_size = params
            .get("max_frame_size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(16 * 1024 * 1024);

        Ok(Self {
            addr,
            format,
            timeout,
            max_frame_size,
        })
    }
}

/// Batch body
#[derive(Debug, Serialize, Deserialize)]
pub struct WireBatch {
    pub destination: String,
    pub records: Vec<WireRecord>,
}

/// One record on the wire; payload is carried as JSON text so the body stays
/// self-describing under bincode too
#[derive(Debug, Serialize, Deserialize)]
pub struct WireRecord {
    pub timestamp: f64,
    pub payload: String,
}

/// Backend that ships batches to a TCP endpoint
pub struct TcpBackend {
    name: String,
    config: TcpBackendConfig,
    stream: Option<TcpStream>,
}

impl TcpBackend {
    /// Create a new TcpBackend; the connection is opened on first send
    pub fn new(name: impl Into<String>, config: TcpBackendConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stream: None,
        }
    }

    /// Create from params (for the provisioner)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = TcpBackendConfig::from_params(params)
            .map_err(|e| ContractError::provisioning(&name, e))?;
        Ok(Self::new(name, config))
    }

    fn encode_batch(&self, records: &[Record]) -> Result<Vec<u8>, ContractError> {
        let batch = WireBatch {
            destination: self.name.clone(),
            records: records
                .iter()
                .map(|r| WireRecord {
                    timestamp: r.timestamp(),
                    payload: r.payload().to_string(),
                })
                .collect(),
        };

        let body = match self.config.format {
            WireFormat::Json => serde_json::to_vec(&batch)?,
            WireFormat::Bincode => bincode::serialize(&batch)
                .map_err(|e| ContractError::backend_rejected(&self.name, format!("bincode error: {}", e)))?,
        };

        if body.len() > self.config.max_frame_size {
            return Err(ContractError::backend_rejected(
                &self.name,
                format!("batch of {} bytes exceeds {}", body.len(), self.config.max_frame_size),
            ));
        }
        Ok(body)
    }

    async fn connect(&mut self) -> Result<&mut TcpStream, ContractError> {
        if self.stream.is_none() {
            let stream = tokio::time::timeout(self.config.timeout, TcpStream::connect(&self.config.addr))
                .await
                .map_err(|_| ContractError::backend_transport(&self.name, "connect timed out"))?
                .map_err(|e| ContractError::backend_transport(&self.name, e.to_string()))?;
            stream.set_nodelay(true).ok();
            debug!(destination = %self.name, addr = %self.config.addr, "TcpBackend connected");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| ContractError::backend_transport(&self.name, "not connected"))
    }

    async fn round_trip(&mut self, body: &[u8]) -> Result<u32, ContractError> {
        let timeout = self.config.timeout;
        let name = self.name.clone();
        let stream = self.connect().await?;

        let exchange = async {
            stream.write_u32(body.len() as u32).await?;
            stream.write_all(body).await?;
            stream.flush().await?;
            stream.read_u32().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(accepted)) => Ok(accepted),
            Ok(Err(e)) => {
                self.stream = None;
                Err(ContractError::backend_transport(name, e.to_string()))
            }
            Err(_) => {
                self.stream = None;
                Err(ContractError::backend_transport(name, "round trip timed out"))
            }
        }
    }
}

impl DestinationBackend for TcpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "tcp_backend_send",
        skip(self, records),
        fields(destination = %self.name, records = records.len())
    )]
    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError> {
        let body = self.encode_batch(records)?;
        let accepted = self.round_trip(&body).await? as usize;
        if accepted > records.len() {
            warn!(
                destination = %self.name,
                accepted,
                sent = records.len(),
                "Destination acknowledged more records than sent"
            );
        }
        Ok(BatchAck::Count(accepted.min(records.len())))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().await?;
        }
        Ok(())
    }

    #[instrument(name = "tcp_backend_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!(destination = %self.name, error = %e, "TCP shutdown failed");
            }
        }
        debug!(destination = %self.name, "TcpBackend closed");
        Ok(())
    }
}
