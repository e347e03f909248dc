//! Directory-backed coordination store
//!
//! Nodes are files below a base directory shared by all producers (local disk
//! or a network mount). `create` writes a private temp file and hard-links it
//! into place, which fails atomically if the target exists.
//!
//! Watches only see writes made through this process; changes made by other
//! producers become visible through lookups once cached entries age out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::store::{check_path, CoordinationStore, CreateOutcome, StoreEvent};

const EVENT_CAPACITY: usize = 1024;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Coordination store rooted at a directory
pub struct DirectoryStore {
    base: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl DirectoryStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            base: base.into(),
            events,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        check_path(path)?;
        Ok(self.base.join(path.trim_start_matches('/')))
    }

    fn temp_path(target: &Path) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }

    fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

impl CoordinationStore for DirectoryStore {
    #[instrument(name = "directory_store_create", skip(self, data), fields(path = %path))]
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<CreateOutcome, StoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = Self::temp_path(&target);
        fs::write(&temp, &data).await?;
        let linked = fs::hard_link(&temp, &target).await;
        if let Err(e) = fs::remove_file(&temp).await {
            warn!(temp = %temp.display(), error = %e, "Failed to remove temp node");
        }

        match linked {
            Ok(()) => {
                debug!(path, "Node created");
                self.notify(StoreEvent::created(path));
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = fs::read(&target).await?;
                Ok(CreateOutcome::AlreadyExists(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn children(&self, parent: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.resolve(parent)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    #[instrument(name = "directory_store_delete", skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                self.notify(StoreEvent::deleted(path));
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
