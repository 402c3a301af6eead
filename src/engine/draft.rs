use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::transport::Question;
use crate::engine::AnswerMap;

/// Bump when the draft layout changes. A store carrying a different version
/// is wiped on open instead of being half-read.
const DRAFT_SCHEMA_VERSION: u32 = 2;

const META_FILE: &str = "meta.json";

/// Locally persisted snapshot of an attempt in progress. Survives process
/// restarts so an interrupted session resumes with its answers and clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDraft {
    pub answers: AnswerMap,
    pub time_left_seconds: u64,
    #[serde(default)]
    pub loaded_questions: Vec<Question>,
    #[serde(default)]
    pub has_more_questions: bool,
    pub updated_at: u64,
}

impl LocalDraft {
    pub fn new(answers: AnswerMap, time_left_seconds: u64) -> Self {
        Self {
            answers,
            time_left_seconds,
            loaded_questions: Vec::new(),
            has_more_questions: false,
            updated_at: unix_now(),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("draft storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("draft serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Keyed by attempt id.
pub trait DraftStore: Send + Sync {
    fn load(&self, attempt_id: &str) -> Result<Option<LocalDraft>, DraftError>;
    fn save(&self, attempt_id: &str, draft: &LocalDraft) -> Result<(), DraftError>;
    fn delete(&self, attempt_id: &str) -> Result<(), DraftError>;
}

#[derive(Default)]
pub struct MemoryDraftStore {
    drafts: Mutex<HashMap<String, LocalDraft>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalDraft>> {
        match self.drafts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DraftStore for MemoryDraftStore {
    fn load(&self, attempt_id: &str) -> Result<Option<LocalDraft>, DraftError> {
        Ok(self.lock().get(attempt_id).cloned())
    }

    fn save(&self, attempt_id: &str, draft: &LocalDraft) -> Result<(), DraftError> {
        self.lock().insert(attempt_id.to_string(), draft.clone());
        Ok(())
    }

    fn delete(&self, attempt_id: &str) -> Result<(), DraftError> {
        self.lock().remove(attempt_id);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    schema_version: u32,
}

/// One JSON file per attempt under a dedicated directory. The directory
/// carries a schema-version marker; a mismatch wipes every draft rather than
/// attempting migration.
pub struct FileDraftStore {
    root: PathBuf,
}

impl FileDraftStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DraftError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let meta_path = root.join(META_FILE);
        let current = fs::read(&meta_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<StoreMeta>(&bytes).ok());
        match current {
            Some(meta) if meta.schema_version == DRAFT_SCHEMA_VERSION => {}
            _ => {
                for entry in fs::read_dir(&root)? {
                    let path = entry?.path();
                    if path.is_file() {
                        fs::remove_file(path)?;
                    }
                }
                let meta = StoreMeta {
                    schema_version: DRAFT_SCHEMA_VERSION,
                };
                fs::write(&meta_path, serde_json::to_vec(&meta)?)?;
            }
        }
        Ok(Self { root })
    }

    fn path_for(&self, attempt_id: &str) -> PathBuf {
        // Attempt ids are uuids or "local-" uuids; anything else is reduced
        // to a filename-safe form.
        let safe: String = attempt_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

impl DraftStore for FileDraftStore {
    fn load(&self, attempt_id: &str) -> Result<Option<LocalDraft>, DraftError> {
        let path = self.path_for(attempt_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, attempt_id: &str, draft: &LocalDraft) -> Result<(), DraftError> {
        // Write to a sibling temp file and rename so a crash mid-write never
        // leaves a truncated draft at the final path.
        let path = self.path_for(attempt_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(draft)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, attempt_id: &str) -> Result<(), DraftError> {
        let path = self.path_for(attempt_id);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("cbt-drafts-{}", Uuid::new_v4()))
    }

    fn draft_with_answer(key: &str, value: &str) -> LocalDraft {
        let mut answers = AnswerMap::new();
        answers.insert(key.to_string(), value.to_string());
        LocalDraft::new(answers, 540)
    }

    #[test]
    fn file_store_round_trips_a_draft() {
        let dir = scratch_dir();
        let store = FileDraftStore::open(&dir).unwrap();
        let draft = draft_with_answer("q1", "B");
        store.save("attempt-1", &draft).unwrap();

        let loaded = store.load("attempt-1").unwrap().unwrap();
        assert_eq!(loaded, draft);

        // The save leaves only the final file and the schema marker behind.
        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["attempt-1.json", META_FILE]);

        store.delete("attempt-1").unwrap();
        assert!(store.load("attempt-1").unwrap().is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn reopening_with_matching_schema_keeps_drafts() {
        let dir = scratch_dir();
        {
            let store = FileDraftStore::open(&dir).unwrap();
            store.save("attempt-1", &draft_with_answer("q1", "A")).unwrap();
        }
        let store = FileDraftStore::open(&dir).unwrap();
        assert!(store.load("attempt-1").unwrap().is_some());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn schema_version_mismatch_wipes_the_store() {
        let dir = scratch_dir();
        {
            let store = FileDraftStore::open(&dir).unwrap();
            store.save("attempt-1", &draft_with_answer("q1", "A")).unwrap();
        }
        fs::write(
            dir.join(META_FILE),
            serde_json::to_vec(&StoreMeta { schema_version: 1 }).unwrap(),
        )
        .unwrap();

        let store = FileDraftStore::open(&dir).unwrap();
        assert!(store.load("attempt-1").unwrap().is_none());

        // The marker is rewritten so the wipe happens once.
        let meta: StoreMeta =
            serde_json::from_slice(&fs::read(dir.join(META_FILE)).unwrap()).unwrap();
        assert_eq!(meta.schema_version, DRAFT_SCHEMA_VERSION);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_draft_reads_as_none() {
        let dir = scratch_dir();
        let store = FileDraftStore::open(&dir).unwrap();
        assert!(store.load("nope").unwrap().is_none());
        store.delete("nope").unwrap();
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn memory_store_round_trips_a_draft() {
        let store = MemoryDraftStore::new();
        let draft = draft_with_answer("q2", "C");
        store.save("a", &draft).unwrap();
        assert_eq!(store.load("a").unwrap(), Some(draft));
        store.delete("a").unwrap();
        assert_eq!(store.load("a").unwrap(), None);
    }
}
