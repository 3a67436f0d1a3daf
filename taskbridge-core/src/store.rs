//! Task store — the authoritative in-memory record set plus its persistence.
//!
//! One record per remote id. Persisted as a single JSON document at
//! `<home>/.taskbridge/store.json` with the same atomic `.tmp` + rename
//! pattern as the config. The store is the unit of crash recovery: anything
//! not yet saved is re-derived by the next cycle's scans, never replayed
//! from a log.
//!
//! # API pattern
//!
//! Persistence functions have two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{PendingChange, SyncCursor, TaskId, TaskRecord};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// The full managed record set, keyed by remote id, plus the sync cursor.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    cursor: Option<SyncCursor>,
    records: HashMap<TaskId, TaskRecord>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cursor for the next incremental pull; wildcard before the first
    /// successful pull.
    pub fn cursor(&self) -> SyncCursor {
        self.cursor.clone().unwrap_or_else(SyncCursor::initial)
    }

    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.cursor = Some(cursor);
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.records.contains_key(id)
    }

    /// Insert or replace the record under its own id.
    pub fn upsert(&mut self, record: TaskRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<TaskRecord> {
        self.records.remove(id)
    }

    /// Records whose last reconciled location is `document`, sorted by id
    /// for deterministic iteration.
    pub fn by_document(&self, document: &Path) -> Vec<&TaskRecord> {
        let mut records: Vec<&TaskRecord> = self
            .records
            .values()
            .filter(|r| r.document == document)
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Records with a nonempty pending-change log, sorted by id.
    pub fn with_pending(&self) -> Vec<&TaskRecord> {
        let mut records: Vec<&TaskRecord> = self
            .records
            .values()
            .filter(|r| r.has_pending())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Append a pending change to a record's log. Returns false when the id
    /// is unknown.
    pub fn push_pending(&mut self, id: &TaskId, change: PendingChange) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.pending.push(change);
                true
            }
            None => false,
        }
    }

    pub fn clear_pending(&mut self, id: &TaskId) {
        if let Some(record) = self.records.get_mut(id) {
            record.pending.clear();
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// On-disk store payload.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<SyncCursor>,
    records: Vec<TaskRecord>,
}

/// `<home>/.taskbridge/store.json` — pure, no I/O.
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".taskbridge").join("store.json")
}

/// Load the store. Returns an empty store when the file does not yet exist.
pub fn load_at(home: &Path) -> Result<TaskStore, StoreError> {
    let path = store_path_at(home);
    if !path.exists() {
        return Ok(TaskStore::new());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let file: StoreFile = serde_json::from_str(&contents)?;

    let mut store = TaskStore::new();
    store.cursor = file.cursor;
    for record in file.records {
        store.upsert(record);
    }
    Ok(store)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<TaskStore, StoreError> {
    load_at(&home()?)
}

/// Save the store atomically: serialize → `.tmp` sibling → rename.
///
/// Records are written sorted by id so the file is diff-stable.
pub fn save_at(home: &Path, store: &TaskStore) -> Result<(), StoreError> {
    let path = store_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut records: Vec<TaskRecord> = store.records.values().cloned().collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    let file = StoreFile {
        saved_at: Utc::now(),
        cursor: store.cursor.clone(),
        records,
    };

    let json = serde_json::to_string_pretty(&file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(store: &TaskStore) -> Result<(), StoreError> {
    save_at(&home()?, store)
}

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeOrigin, ChangeSet, TaskFields};
    use tempfile::TempDir;

    fn record(id: &str, document: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::from(id),
            document: PathBuf::from(document),
            fields: TaskFields::new(format!("task {id}")),
            parent: None,
            last_synced_at: Utc::now(),
            pending: vec![],
        }
    }

    fn pending(origin: ChangeOrigin) -> PendingChange {
        PendingChange {
            origin,
            timestamp: Utc::now(),
            change: ChangeSet {
                completed: Some(true),
                ..ChangeSet::default()
            },
        }
    }

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(tmp.path()).unwrap();
        assert!(store.is_empty());
        assert!(store.cursor().is_wildcard());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut store = TaskStore::new();
        store.set_cursor(SyncCursor::from("tok-42".to_string()));
        store.upsert(record("a", "inbox.md"));
        store.upsert(record("b", "work.md"));
        store.push_pending(&TaskId::from("b"), pending(ChangeOrigin::Local));

        save_at(tmp.path(), &store).unwrap();
        let loaded = load_at(tmp.path()).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.cursor(), SyncCursor::from("tok-42".to_string()));
        assert_eq!(
            loaded.get(&TaskId::from("b")).unwrap().pending.len(),
            1,
            "pending log must survive persistence"
        );
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), &TaskStore::new()).unwrap();
        let tmp_path = store_path_at(tmp.path()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be gone after rename");
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let mut store = TaskStore::new();
        store.upsert(record("a", "inbox.md"));
        let mut updated = record("a", "work.md");
        updated.fields.completed = true;
        store.upsert(updated);

        assert_eq!(store.len(), 1);
        let got = store.get(&TaskId::from("a")).unwrap();
        assert_eq!(got.document, PathBuf::from("work.md"));
        assert!(got.fields.completed);
    }

    #[test]
    fn by_document_filters_and_sorts() {
        let mut store = TaskStore::new();
        store.upsert(record("c", "inbox.md"));
        store.upsert(record("a", "inbox.md"));
        store.upsert(record("b", "work.md"));

        let inbox = store.by_document(Path::new("inbox.md"));
        let ids: Vec<&str> = inbox.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn with_pending_reflects_push_and_clear() {
        let mut store = TaskStore::new();
        store.upsert(record("a", "inbox.md"));
        store.upsert(record("b", "inbox.md"));
        assert!(store.with_pending().is_empty());

        assert!(store.push_pending(&TaskId::from("a"), pending(ChangeOrigin::Remote)));
        assert_eq!(store.with_pending().len(), 1);

        store.clear_pending(&TaskId::from("a"));
        assert!(store.with_pending().is_empty());
    }

    #[test]
    fn push_pending_unknown_id_is_rejected() {
        let mut store = TaskStore::new();
        assert!(!store.push_pending(&TaskId::from("ghost"), pending(ChangeOrigin::Local)));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(StoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
