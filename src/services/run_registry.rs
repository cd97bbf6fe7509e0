//! Run registry: durable per-task records in one JSON file.
//!
//! Every write replaces the whole file atomically. During a dispatch all
//! writes go through one [`RegistryWriter`], which applies them in order on
//! the blocking pool, so async tasks never touch the file themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::errors::RegistryError;
use crate::domain::models::TaskRecord;
use crate::infrastructure::fs::write_json_atomic;

/// File name of the registry inside the state directory.
pub const REGISTRY_FILE: &str = "registry.json";

pub type RegistryMap = BTreeMap<String, TaskRecord>;

#[derive(Debug, Clone)]
pub struct RunRegistry {
    path: PathBuf,
}

impl RunRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry stored as `registry.json` under `state_dir`.
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(REGISTRY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing or unreadable file yields an empty map.
    pub fn read(&self) -> RegistryMap {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RegistryMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read run registry");
                return RegistryMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Run registry is corrupt, treating as empty");
                RegistryMap::new()
            }
        }
    }

    /// Replace the registry contents.
    pub fn write(&self, records: &RegistryMap) -> Result<(), RegistryError> {
        write_json_atomic(&self.path, records).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), count = records.len(), "Run registry written");
        Ok(())
    }

    /// Insert or replace one record.
    pub fn upsert(&self, record: &TaskRecord) -> Result<(), RegistryError> {
        let mut map = self.read();
        map.insert(record.task_id.clone(), record.clone());
        self.write(&map)
    }

    /// Insert or replace several records in one write.
    pub fn bulk_upsert<'a>(
        &self,
        records: impl IntoIterator<Item = &'a TaskRecord>,
    ) -> Result<(), RegistryError> {
        let mut map = self.read();
        for record in records {
            map.insert(record.task_id.clone(), record.clone());
        }
        self.write(&map)
    }
}

enum WriterCommand {
    Upsert(Vec<TaskRecord>),
    Flush(oneshot::Sender<()>),
}

/// Background writer owning all registry I/O of one dispatch.
///
/// [`RegistryWriter::upsert`] only queues; a single task drains the queue,
/// coalesces what has piled up and writes it with one
/// [`RunRegistry::bulk_upsert`] on the blocking pool.
#[derive(Debug, Clone)]
pub struct RegistryWriter {
    registry: RunRegistry,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl RegistryWriter {
    /// Start the writer task on the current runtime.
    pub fn spawn(registry: RunRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(registry.clone(), rx));
        Self { registry, tx }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Queue records for persistence.
    pub fn upsert(&self, records: Vec<TaskRecord>) {
        if records.is_empty() {
            return;
        }
        if self.tx.send(WriterCommand::Upsert(records)).is_err() {
            warn!(path = %self.registry.path().display(), "Registry writer stopped; records not persisted");
        }
    }

    /// Wait until everything queued so far is on disk (or failed to get there).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(done_tx)).is_err() || done_rx.await.is_err() {
            warn!(path = %self.registry.path().display(), "Registry writer stopped before flush");
        }
    }
}

async fn run_writer(registry: RunRegistry, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(first) = rx.recv().await {
        let mut pending = Vec::new();
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(command) = next {
            match command {
                WriterCommand::Upsert(records) => pending.extend(records),
                WriterCommand::Flush(done) => waiters.push(done),
            }
            next = rx.try_recv().ok();
        }

        if !pending.is_empty() {
            let target = registry.clone();
            match tokio::task::spawn_blocking(move || target.bulk_upsert(&pending)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to persist task records"),
                Err(e) => warn!(error = %e, "Registry write panicked"),
            }
        }
        for done in waiters {
            if done.send(()).is_err() {
                debug!("Registry flush waiter went away");
            }
        }
    }
}
