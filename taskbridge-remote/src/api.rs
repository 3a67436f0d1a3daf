//! Wire types for the token-cursor batch sync API.
//!
//! One endpoint, `POST <base>/sync`. Pulls send a `sync_token` plus
//! `resource_types`; pushes send a `commands` array where each command has a
//! `uuid` (for per-command status) and creates also carry a `temp_id` (for
//! the temp-id → real-id mapping in the response).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use taskbridge_core::types::{Priority, TaskFields, TaskId};

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Due payload as the service represents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDue {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
}

/// One task as pulled from the service. Tombstones arrive with
/// `is_deleted: true` and otherwise-stale fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: TaskId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<RemoteDue>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> u8 {
    1
}

impl RemoteItem {
    /// Whether this item carries the managed-sync marker label.
    pub fn has_marker(&self, sync_label: &str) -> bool {
        self.labels.iter().any(|l| l == sync_label)
    }

    /// Convert to domain fields, dropping the marker label.
    ///
    /// An out-of-range wire priority maps to no priority rather than failing
    /// the whole pull.
    pub fn to_fields(&self, sync_label: &str) -> TaskFields {
        let labels = self
            .labels
            .iter()
            .filter(|l| l.as_str() != sync_label)
            .cloned()
            .collect();
        TaskFields {
            content: self.content.clone(),
            completed: self.checked,
            due: self.due.as_ref().map(|d| taskbridge_core::types::DueStamp {
                date: d.date,
                time: d.time,
            }),
            priority: Priority::from_wire(self.priority),
            duration_minutes: self.duration_minutes,
            labels,
        }
    }
}

/// Wire priority for domain fields: absent priority is the service's 1.
pub fn wire_priority(fields: &TaskFields) -> u8 {
    fields.priority.map(Priority::wire).unwrap_or(1)
}

/// Wire due payload for domain fields.
pub fn wire_due(fields: &TaskFields) -> Option<RemoteDue> {
    fields.due.map(|d| RemoteDue {
        date: d.date,
        time: d.time,
    })
}

/// Wire labels for domain fields: user labels plus the marker, deduplicated.
pub fn wire_labels(fields: &TaskFields, sync_label: &str) -> Vec<String> {
    let mut labels: Vec<String> = fields.labels.iter().cloned().collect();
    if !labels.iter().any(|l| l == sync_label) {
        labels.push(sync_label.to_string());
    }
    labels
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Pull request body.
#[derive(Debug, Serialize)]
pub struct PullRequest<'a> {
    pub sync_token: &'a str,
    pub resource_types: &'a [&'a str],
}

/// Push request body.
#[derive(Debug, Serialize)]
pub struct CommandRequest {
    pub commands: Vec<Command>,
}

/// One batched mutation command.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub args: serde_json::Value,
}

impl Command {
    pub fn new(kind: &'static str, args: serde_json::Value) -> Self {
        Self {
            kind,
            uuid: uuid::Uuid::new_v4().to_string(),
            temp_id: None,
            args,
        }
    }

    pub fn with_temp_id(kind: &'static str, temp_id: String, args: serde_json::Value) -> Self {
        Self {
            kind,
            uuid: uuid::Uuid::new_v4().to_string(),
            temp_id: Some(temp_id),
            args,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response body shared by pulls and pushes.
#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub sync_token: String,
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub items: Vec<RemoteItem>,
    #[serde(default)]
    pub temp_id_mapping: HashMap<String, String>,
    #[serde(default)]
    pub sync_status: HashMap<String, CommandStatus>,
}

/// Per-command outcome: the literal string `"ok"` or an error object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandStatus {
    Ok(String),
    Error { error: String },
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandStatus::Ok(s) if s == "ok")
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            CommandStatus::Ok(_) => None,
            CommandStatus::Error { error } => Some(error),
        }
    }
}

/// Error body shape for 4xx responses; `error_tag` distinguishes cursor
/// invalidation from other client errors.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_tag: String,
}

pub const INVALID_CURSOR_TAG: &str = "INVALID_SYNC_CURSOR";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
