use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::draft::unix_now;
use crate::engine::AnswerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Autosave,
    Submit,
}

/// A server write captured while offline, replayed in order on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub kind: QueueKind,
    pub attempt_id: String,
    pub answers: AnswerMap,
    pub time_spent_seconds: i32,
    pub created_at: u64,
}

impl QueueEntry {
    pub fn new(kind: QueueKind, attempt_id: &str, answers: AnswerMap, time_spent_seconds: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            attempt_id: attempt_id.to_string(),
            answers,
            time_spent_seconds,
            created_at: unix_now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// FIFO store. `list` returns entries oldest first.
pub trait QueueStore: Send + Sync {
    fn append(&self, entry: &QueueEntry) -> Result<(), QueueError>;
    fn list(&self) -> Result<Vec<QueueEntry>, QueueError>;
    fn remove(&self, entry_id: &str) -> Result<(), QueueError>;
}

#[derive(Default)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn append(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        self.lock().push(entry.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(self.lock().clone())
    }

    fn remove(&self, entry_id: &str) -> Result<(), QueueError> {
        self.lock().retain(|entry| entry.id != entry_id);
        Ok(())
    }
}

/// Whole queue in one JSON file. Queues stay short (a handful of writes per
/// offline window), so rewriting the file per mutation is fine.
pub struct FileQueueStore {
    path: PathBuf,
    entries: Mutex<Vec<QueueEntry>>,
}

impl FileQueueStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        fs::write(&self.path, serde_json::to_vec(entries)?)?;
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn append(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let mut entries = self.lock();
        entries.push(entry.clone());
        self.persist(&entries)
    }

    fn list(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(self.lock().clone())
    }

    fn remove(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut entries = self.lock();
        entries.retain(|entry| entry.id != entry_id);
        self.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: QueueKind, attempt_id: &str) -> QueueEntry {
        QueueEntry::new(kind, attempt_id, AnswerMap::new(), 30)
    }

    #[test]
    fn memory_queue_preserves_insertion_order() {
        let store = MemoryQueueStore::new();
        let first = entry(QueueKind::Autosave, "a-1");
        let second = entry(QueueKind::Submit, "a-1");
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![first.clone(), second.clone()]);

        store.remove(&first.id).unwrap();
        assert_eq!(store.list().unwrap(), vec![second]);
    }

    #[test]
    fn file_queue_survives_reopen() {
        let path = std::env::temp_dir().join(format!("cbt-queue-{}.json", Uuid::new_v4()));
        let first = entry(QueueKind::Autosave, "a-1");
        let second = entry(QueueKind::Submit, "a-1");
        {
            let store = FileQueueStore::open(&path).unwrap();
            store.append(&first).unwrap();
            store.append(&second).unwrap();
        }
        let store = FileQueueStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap(), vec![first, second.clone()]);

        store.remove(&second.id).unwrap();
        let store = FileQueueStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        fs::remove_file(path).unwrap();
    }
}
