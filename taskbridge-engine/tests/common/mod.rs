//! Shared fixtures: an in-memory remote and vault/document helpers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use taskbridge_core::types::{SyncCursor, TaskFields, TaskId, TaskRecord};
use taskbridge_remote::api::RemoteItem;
use taskbridge_remote::{
    CreateOutcome, CreateSpec, MoveSpec, PullBatch, RemoteApi, RemoteError, UpdateSpec,
};

pub const SYNC_HEADER: &str = "---\ntasks-sync: true\n---\n";

/// In-memory [`RemoteApi`] that records every call and mints sequential ids.
#[derive(Default)]
pub struct FakeRemote {
    next_id: u32,
    next_cursor: u32,
    pub queued_items: Vec<RemoteItem>,
    pub created: Vec<(TaskId, CreateSpec)>,
    pub create_batch_sizes: Vec<usize>,
    pub updated: Vec<UpdateSpec>,
    pub moved: Vec<MoveSpec>,
    pub deleted: Vec<TaskId>,
    pub fail_creates: bool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_item(&mut self, item: RemoteItem) {
        self.queued_items.push(item);
    }

    fn advance_cursor(&mut self) -> SyncCursor {
        self.next_cursor += 1;
        SyncCursor(format!("cursor-{}", self.next_cursor))
    }
}

impl RemoteApi for FakeRemote {
    fn pull(&mut self, cursor: &SyncCursor) -> Result<PullBatch, RemoteError> {
        let full_resync = cursor.is_wildcard();
        Ok(PullBatch {
            items: std::mem::take(&mut self.queued_items),
            cursor: self.advance_cursor(),
            full_resync,
        })
    }

    fn batch_create(&mut self, items: &[CreateSpec]) -> Result<CreateOutcome, RemoteError> {
        if self.fail_creates {
            return Err(RemoteError::Http {
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        self.create_batch_sizes.push(items.len());
        let mut ids = HashMap::new();
        for item in items {
            self.next_id += 1;
            let id = TaskId(format!("r{}", self.next_id));
            ids.insert(item.temp_id.clone(), id.clone());
            self.created.push((id, item.clone()));
        }
        Ok(CreateOutcome {
            ids,
            cursor: self.advance_cursor(),
        })
    }

    fn batch_update(&mut self, items: &[UpdateSpec]) -> Result<SyncCursor, RemoteError> {
        self.updated.extend(items.iter().cloned());
        Ok(self.advance_cursor())
    }

    fn batch_move(&mut self, items: &[MoveSpec]) -> Result<SyncCursor, RemoteError> {
        self.moved.extend(items.iter().cloned());
        Ok(self.advance_cursor())
    }

    fn batch_delete(&mut self, ids: &[TaskId]) -> Result<SyncCursor, RemoteError> {
        self.deleted.extend(ids.iter().cloned());
        Ok(self.advance_cursor())
    }
}

/// A live remote item carrying the sync marker label.
pub fn remote_item(id: &str, content: &str, updated_at: DateTime<Utc>) -> RemoteItem {
    RemoteItem {
        id: TaskId::from(id),
        content: content.to_string(),
        checked: false,
        due: None,
        priority: 1,
        duration_minutes: None,
        labels: vec!["vault".to_string()],
        parent_id: None,
        section_id: None,
        is_deleted: false,
        updated_at,
    }
}

pub fn write_doc(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, format!("{SYNC_HEADER}{body}")).expect("write doc");
    path
}

pub fn read_doc(path: &Path) -> String {
    std::fs::read_to_string(path)
        .expect("read doc")
        .strip_prefix(SYNC_HEADER)
        .expect("frontmatter intact")
        .to_string()
}

pub fn record(id: &str, document: &Path, content: &str) -> TaskRecord {
    TaskRecord {
        id: TaskId::from(id),
        document: document.to_path_buf(),
        fields: TaskFields::new(content),
        parent: None,
        last_synced_at: Utc::now(),
        pending: vec![],
    }
}
