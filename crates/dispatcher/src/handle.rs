//! DestinationHandle - one destination behind an isolated queue and worker task

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{
    DestinationBackend, DestinationDescriptor, DestinationStatus, Record, RecordOutcome,
    RetryPolicy,
};

use crate::metrics::HandleMetrics;

struct SendRequest {
    records: Arc<[Record]>,
    reply: oneshot::Sender<Vec<RecordOutcome>>,
}

enum HandleCommand {
    Send(SendRequest),
    /// Drain everything queued before it, then close the backend
    Close,
}

/// Handle to a running destination worker
pub struct DestinationHandle {
    /// Destination identity
    descriptor: DestinationDescriptor,
    /// Channel to the worker
    tx: mpsc::Sender<HandleCommand>,
    /// Shared metrics
    metrics: Arc<HandleMetrics>,
    /// Local liveness view
    status: Arc<AtomicU8>,
    /// Worker task handle, taken on shutdown
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

/// A batch accepted into a destination queue, awaiting its outcomes
pub struct PendingSend {
    len: usize,
    reply: Option<oneshot::Receiver<Vec<RecordOutcome>>>,
}

impl PendingSend {
    /// Wait for the per-record outcomes
    ///
    /// A worker that went away counts every record as a backend error.
    pub async fn outcomes(self) -> Vec<RecordOutcome> {
        match self.reply {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| vec![RecordOutcome::RejectedBackendError; self.len]),
            None => vec![RecordOutcome::RejectedBackendError; self.len],
        }
    }
}

impl DestinationHandle {
    /// Create a new DestinationHandle and spawn the worker task
    pub fn spawn<B: DestinationBackend + 'static>(
        descriptor: DestinationDescriptor,
        backend: B,
        queue_capacity: usize,
        retry: RetryPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(HandleMetrics::new());
        let status = Arc::new(AtomicU8::new(DestinationStatus::Live.as_u8()));

        let worker = DestinationWorker {
            backend,
            retry,
            metrics: Arc::clone(&metrics),
            status: Arc::clone(&status),
            destination: descriptor.id.clone(),
        };
        let worker_handle = tokio::spawn(worker.run(rx));

        Self {
            descriptor,
            tx,
            metrics,
            status,
            worker_handle: Mutex::new(Some(worker_handle)),
        }
    }

    pub fn descriptor(&self) -> &DestinationDescriptor {
        &self.descriptor
    }

    /// Destination id
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<HandleMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> DestinationStatus {
        DestinationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Queue a batch, waiting for queue space if the destination is behind
    pub async fn submit(&self, records: Arc<[Record]>) -> PendingSend {
        let len = records.len();
        if len == 0 {
            return PendingSend { len, reply: None };
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = HandleCommand::Send(SendRequest {
            records,
            reply: reply_tx,
        });
        if self.tx.send(request).await.is_err() {
            error!(destination = %self.descriptor.id, "Destination worker closed");
            return PendingSend { len, reply: None };
        }
        self.metrics
            .set_queue_len(self.tx.max_capacity() - self.tx.capacity());

        PendingSend {
            len,
            reply: Some(reply_rx),
        }
    }

    /// Send a batch and wait for its per-record outcomes, in submission order
    #[instrument(
        name = "destination_handle_send",
        skip(self, records),
        fields(destination = %self.descriptor.id, records = records.len())
    )]
    pub async fn send(&self, records: Arc<[Record]>) -> Vec<RecordOutcome> {
        self.submit(records).await.outcomes().await
    }

    /// Drain queued batches, then flush and close the backend
    ///
    /// Idempotent; later sends report backend errors.
    #[instrument(name = "destination_handle_shutdown", skip(self), fields(destination = %self.descriptor.id))]
    pub async fn shutdown(&self) {
        let worker = self
            .worker_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };

        if self.tx.send(HandleCommand::Close).await.is_err() {
            debug!(destination = %self.descriptor.id, "Worker already stopped");
        }
        if let Err(e) = worker.await {
            error!(destination = %self.descriptor.id, error = ?e, "Worker task panicked");
        }
        self.status
            .store(DestinationStatus::Closed.as_u8(), Ordering::Release);
        debug!(destination = %self.descriptor.id, "DestinationHandle shutdown complete");
    }
}

struct DestinationWorker<B> {
    backend: B,
    retry: RetryPolicy,
    metrics: Arc<HandleMetrics>,
    status: Arc<AtomicU8>,
    destination: String,
}

impl<B: DestinationBackend> DestinationWorker<B> {
    /// Consume batches in order until closed
    #[instrument(name = "destination_worker_loop", skip(self, rx), fields(destination = %self.destination))]
    async fn run(mut self, mut rx: mpsc::Receiver<HandleCommand>) {
        debug!(destination = %self.destination, "Destination worker started");

        while let Some(command) = rx.recv().await {
            self.metrics.set_queue_len(rx.len());
            match command {
                HandleCommand::Send(request) => self.process(request).await,
                HandleCommand::Close => break,
            }
        }

        // Batches queued behind the close request still go out
        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let HandleCommand::Send(request) = command {
                self.process(request).await;
            }
        }

        // Cleanup
        if let Err(e) = self.backend.flush().await {
            error!(destination = %self.destination, error = %e, "Flush failed on shutdown");
        }
        if let Err(e) = self.backend.close().await {
            error!(destination = %self.destination, error = %e, "Close failed on shutdown");
        }

        debug!(destination = %self.destination, "Destination worker stopped");
    }

    async fn process(&mut self, request: SendRequest) {
        if request.reply.is_closed() {
            // Caller stopped waiting; it already counts these records as undeliverable
            self.metrics.inc_abandoned_count();
            return;
        }
        let outcomes = self.send_with_retry(&request.records).await;
        // Caller may have timed out meanwhile
        let _ = request.reply.send(outcomes);
    }

    async fn send_with_retry(&mut self, records: &[Record]) -> Vec<RecordOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.send(records).await {
                Ok(ack) => {
                    let accepted = ack.accepted().min(records.len());
                    self.metrics
                        .record_ack(accepted, records.len() - accepted);
                    self.set_status(DestinationStatus::Live);
                    return ack.into_outcomes(records.len());
                }
                Err(e) if e.is_transient() && self.retry.allows_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    self.metrics.inc_retry_count();
                    metrics::counter!("beam_router_backend_retries_total").increment(1);
                    warn!(
                        destination = %self.destination,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.metrics.inc_failure_count();
                    self.set_status(DestinationStatus::Failing);
                    error!(
                        destination = %self.destination,
                        attempts = attempt,
                        records = records.len(),
                        error = %e,
                        "Send failed"
                    );
                    return vec![RecordOutcome::RejectedBackendError; records.len()];
                }
            }
        }
    }

    fn set_status(&self, status: DestinationStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }
}
