//! LogBackend - logs batch summaries via tracing and accepts everything

use contracts::{BatchAck, ContractError, DestinationBackend, Record};
use tracing::{info, instrument};

/// Backend that logs batch summaries for debugging
pub struct LogBackend {
    name: String,
    batches: u64,
}

impl LogBackend {
    /// Create a new LogBackend with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: 0,
        }
    }

    fn log_batch_summary(&self, records: &[Record]) {
        let first = records.first().map(Record::timestamp);
        let last = records.last().map(Record::timestamp);

        info!(
            destination = %self.name,
            batch = self.batches,
            records = records.len(),
            first_ts = ?first,
            last_ts = ?last,
            "Batch received"
        );
    }
}

impl DestinationBackend for LogBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_backend_send",
        skip(self, records),
        fields(destination = %self.name, records = records.len())
    )]
    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError> {
        self.batches += 1;
        self.log_batch_summary(records);
        Ok(BatchAck::Count(records.len()))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_backend_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(destination = %self.name, batches = self.batches, "LogBackend closed");
        Ok(())
    }
}
