//! Coordination store abstraction
//!
//! A path-namespaced key/value registry shared by every producer. Paths are
//! absolute, `/`-separated, and never end with `/`.

use std::future::Future;

use tokio::sync::broadcast;

use crate::error::StoreError;

/// Result of an atomic create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This call created the node
    Created,
    /// The node already existed; carries its current data
    AlreadyExists(Vec<u8>),
}

/// Kind of child-node change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Created,
    Deleted,
}

/// Child-node change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    /// Full path of the node that changed
    pub path: String,
}

impl StoreEvent {
    pub fn created(path: impl Into<String>) -> Self {
        Self {
            kind: StoreEventKind::Created,
            path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: StoreEventKind::Deleted,
            path: path.into(),
        }
    }

    /// Parent path and node name
    pub fn split(&self) -> Option<(&str, &str)> {
        self.path.rsplit_once('/')
    }
}

/// Shared coordination store
///
/// `create` is the only conflict-resolution primitive: it must be atomic
/// across every producer sharing the store.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Create `path` with `data` unless it already exists
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<CreateOutcome, StoreError>> + Send;

    /// Read a node
    fn get(&self, path: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Names of the direct children of `parent` (empty if absent)
    fn children(&self, parent: &str) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Delete a node; `false` if it did not exist
    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Subscribe to child-node changes
    fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Check that a path is absolute and normalized
pub(crate) fn check_path(path: &str) -> Result<(), StoreError> {
    let valid = path.len() > 1
        && path.starts_with('/')
        && !path.ends_with('/')
        && !path.contains("//")
        && !path.split('/').any(|seg| seg == "." || seg == "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_path() {
        assert!(check_path("/beam/hey/partitions/hour-0").is_ok());
        assert!(check_path("relative").is_err());
        assert!(check_path("/trailing/").is_err());
        assert!(check_path("/a//b").is_err());
        assert!(check_path("/a/../b").is_err());
        assert!(check_path("/").is_err());
    }

    #[test]
    fn test_event_split() {
        let event = StoreEvent::created("/beam/hey/partitions/hour-0");
        assert_eq!(event.split(), Some(("/beam/hey/partitions", "hour-0")));
    }
}
