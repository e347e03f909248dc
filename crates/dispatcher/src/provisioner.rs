//! Backend provisioning
//!
//! Turns a confirmed destination descriptor into a backend. Runs only when a
//! partition is opened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use contracts::{
    BackendConfig, BackendKind, BackendProvisioner, BatchAck, ContractError, DestinationBackend,
    DestinationDescriptor, Record, RollupSpec,
};

use crate::backends::{FileBackend, LogBackend, MemoryBackend, TcpBackend};
use crate::error::DispatcherError;

/// Backend selected by configuration
pub enum ConfiguredBackend {
    Log(LogBackend),
    File(FileBackend),
    Tcp(TcpBackend),
    Memory(MemoryBackend),
}

impl DestinationBackend for ConfiguredBackend {
    fn name(&self) -> &str {
        match self {
            Self::Log(b) => b.name(),
            Self::File(b) => b.name(),
            Self::Tcp(b) => b.name(),
            Self::Memory(b) => b.name(),
        }
    }

    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError> {
        match self {
            Self::Log(b) => b.send(records).await,
            Self::File(b) => b.send(records).await,
            Self::Tcp(b) => b.send(records).await,
            Self::Memory(b) => b.send(records).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            Self::Log(b) => b.flush().await,
            Self::File(b) => b.flush().await,
            Self::Tcp(b) => b.flush().await,
            Self::Memory(b) => b.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            Self::Log(b) => b.close().await,
            Self::File(b) => b.close().await,
            Self::Tcp(b) => b.close().await,
            Self::Memory(b) => b.close().await,
        }
    }
}

/// Provisioner driven by `[backend]` configuration
pub struct ConfigProvisioner {
    config: BackendConfig,
    memory: MemoryProvisioner,
}

impl ConfigProvisioner {
    /// Check kind-specific parameters up front
    pub fn new(config: BackendConfig) -> Result<Self, DispatcherError> {
        if config.kind == BackendKind::Tcp {
            crate::backends::TcpBackendConfig::from_params(&config.params)
                .map_err(|e| DispatcherError::invalid_params("tcp", e))?;
        }
        Ok(Self {
            config,
            memory: MemoryProvisioner::new(),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Backends created for `kind = "memory"`
    pub fn memory(&self) -> &MemoryProvisioner {
        &self.memory
    }
}

impl BackendProvisioner for ConfigProvisioner {
    type Backend = ConfiguredBackend;

    #[instrument(
        name = "config_provisioner_provision",
        skip(self, destination, rollup),
        fields(destination = %destination.id, kind = ?self.config.kind)
    )]
    async fn provision(
        &self,
        destination: &DestinationDescriptor,
        rollup: &RollupSpec,
    ) -> Result<ConfiguredBackend, ContractError> {
        let name = destination.id.as_str();
        let params = &self.config.params;

        let backend = match self.config.kind {
            BackendKind::Log => ConfiguredBackend::Log(LogBackend::new(name)),
            BackendKind::File => ConfiguredBackend::File(
                FileBackend::from_params(name, params)
                    .map_err(|e| ContractError::provisioning(name, e.to_string()))?,
            ),
            BackendKind::Tcp => ConfiguredBackend::Tcp(TcpBackend::from_params(name, params)?),
            BackendKind::Memory => {
                ConfiguredBackend::Memory(self.memory.provision(destination, rollup).await?)
            }
        };
        debug!(destination = %name, aggregators = rollup.aggregators.len(), "Backend provisioned");
        Ok(backend)
    }
}

/// Provisioner of in-memory destinations, keeping every backend reachable by
/// destination id for inspection
#[derive(Clone, Default)]
pub struct MemoryProvisioner {
    backends: Arc<Mutex<HashMap<String, MemoryBackend>>>,
    provisioned: Arc<AtomicUsize>,
    /// Transient failures scripted into each new backend
    fail_first_sends: Arc<AtomicUsize>,
}

impl MemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `n` transient failures into every backend provisioned from now on
    pub fn fail_first_sends(&self, n: usize) {
        self.fail_first_sends.store(n, Ordering::SeqCst);
    }

    /// Number of `provision` calls
    pub fn provisioned_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    /// Backend for `destination_id`, if provisioned
    pub fn backend(&self, destination_id: &str) -> Option<MemoryBackend> {
        self.lock().get(destination_id).cloned()
    }

    /// Every provisioned backend, by destination id
    pub fn backends(&self) -> Vec<(String, MemoryBackend)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, b)| (id.clone(), b.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Records delivered across all backends
    pub fn total_records(&self) -> usize {
        self.lock().values().map(|b| b.records().len()).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryBackend>> {
        self.backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BackendProvisioner for MemoryProvisioner {
    type Backend = MemoryBackend;

    async fn provision(
        &self,
        destination: &DestinationDescriptor,
        _rollup: &RollupSpec,
    ) -> Result<MemoryBackend, ContractError> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        // Partitions re-opened by another producer reuse the same destination
        let backend = self
            .lock()
            .entry(destination.id.clone())
            .or_insert_with(|| {
                let backend = MemoryBackend::new(&destination.id);
                backend.fail_next(self.fail_first_sends.load(Ordering::SeqCst));
                backend
            })
            .clone();
        Ok(backend)
    }
}
