//! MemoryBackend - in-process destination with scripted responses
//!
//! Clones share state, so a test can keep one clone for inspection while the
//! handle worker owns the other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use contracts::{BatchAck, ContractError, DestinationBackend, Record};
use tracing::debug;

/// Scripted response for an upcoming send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scripted {
    /// Fail with a transient transport error
    Transient,
    /// Fail with a permanent rejection
    Reject,
    /// Accept only the first `n` records
    AcceptOnly(usize),
}

#[derive(Default)]
struct State {
    script: VecDeque<Scripted>,
    batches: Vec<Vec<Record>>,
    delay: Duration,
}

struct Shared {
    name: String,
    state: Mutex<State>,
    send_attempts: AtomicU64,
    closed: AtomicBool,
}

/// In-memory destination
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State::default()),
                send_attempts: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Fail the next `n` send attempts with a transient error
    pub fn fail_next(&self, n: usize) {
        self.script(Scripted::Transient, n);
    }

    /// Reject the next `n` send attempts permanently
    pub fn reject_next(&self, n: usize) {
        self.script(Scripted::Reject, n);
    }

    /// Accept only the first `n` records of the next batch
    pub fn accept_only_next(&self, n: usize) {
        self.script(Scripted::AcceptOnly(n), 1);
    }

    /// Delay every send attempt
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Batches stored so far, in arrival order
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.lock().batches.clone()
    }

    /// All stored records, in arrival order
    pub fn records(&self) -> Vec<Record> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    /// Send attempts, including failed ones
    pub fn send_attempts(&self) -> u64 {
        self.shared.send_attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn script(&self, response: Scripted, n: usize) {
        let mut state = self.lock();
        for _ in 0..n {
            state.script.push_back(response);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DestinationBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn send(&mut self, records: &[Record]) -> Result<BatchAck, ContractError> {
        self.shared.send_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.is_closed() {
            return Err(ContractError::backend_rejected(&self.shared.name, "backend closed"));
        }

        let mut state = self.lock();
        let accepted = match state.script.pop_front() {
            Some(Scripted::Transient) => {
                debug!(destination = %self.shared.name, "Scripted transient failure");
                return Err(ContractError::backend_transport(
                    &self.shared.name,
                    "scripted transient failure",
                ));
            }
            Some(Scripted::Reject) => {
                return Err(ContractError::backend_rejected(
                    &self.shared.name,
                    "scripted rejection",
                ));
            }
            Some(Scripted::AcceptOnly(n)) => n.min(records.len()),
            None => records.len(),
        };
        state.batches.push(records[..accepted].to_vec());
        Ok(BatchAck::Count(accepted))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
