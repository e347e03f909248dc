//! FileBackend - appends records as newline-delimited JSON, one file per destination

use contracts::{BatchAck, ContractError, DestinationBackend, Record};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, instrument};

/// Configuration for FileBackend
#[derive(Debug, Clone)]
pub struct FileBackendConfig {
    /// Base output directory
    pub base_path: PathBuf,
}

impl FileBackendConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

#[derive(Serialize)]
struct Line<'a> {
    destination: &'a str,
    timestamp: f64,
    payload: &'a serde_json::Value,
}

/// Backend that writes records to disk
pub struct FileBackend {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileBackend {
    /// Create a new FileBackend writing to `{base_path}/{name}.ndjson`
    pub fn new(name: impl Into<String>, config: FileBackendConfig) -> std::io::Result<Self> {
        let name = name.into();
        fs::create_dir_all(&config.base_path)?;
        let path = config
            .base_path
            .join(format!("{}.ndjson", sanitize_file_name(&name)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!(destination = %name, path = %path.display(), "FileBackend opened");
        Ok(Self {
            name,
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Create from params map (for the provisioner)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileBackendConfig::from_params(params))
    }

    /// Output file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_batch(&mut self, records: &[Record]) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("backend closed"))?;
        for record in records {
            let line = Line {
                destination: &self.name,
                timestamp: record.timestamp(),
                payload: record.payload(),
            };
            serde_json::to_writer(&mut *writer, &line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn persist_batch(&mut self, records: &[Record]) -> Result<(), ContractError> {
        self.write_batch(records).map_err(|e| {
            error!(destination = %self.name, error = %e, "Write failed");
            ContractError::backend_transport(&self.name, e.to_string())
        })
    }
}

impl DestinationBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_backend_send",
        skip(self, records),
        fields(destination = %self.name, records = records.len())
    )]
    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError> {
        self.persist_batch(records)?;
        Ok(BatchAck::Count(records.len()))
    }

    #[instrument(name = "file_backend_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    #[instrument(name = "file_backend_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        debug!(destination = %self.name, "FileBackend closed");
        Ok(())
    }
}

/// Keep destination ids usable as file names
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
