//! Domain types for the taskbridge store.
//!
//! All document paths use `PathBuf`; never `&str` or `String` for filesystem
//! paths. All types round-trip through serde + serde_json (the store file).

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed remote task identifier. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque incremental-pull token handed back by the remote service.
///
/// The wildcard cursor requests a full resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    pub const WILDCARD: &'static str = "*";

    /// Cursor used before the first successful pull.
    pub fn initial() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SyncCursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Raised task priority, mapped to wire numbers 2 through 4.
///
/// Wire priority 1 is the service's default; it maps to "no priority" on
/// this side so the two representations stay bijective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn wire(self) -> u8 {
        match self {
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            2 => Some(Priority::Medium),
            3 => Some(Priority::High),
            4 => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Which side a pending change was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A due date with an optional time-of-day component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueStamp {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
}

/// The mutable fields of a task, shared by store records and changesets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    pub content: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<DueStamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl TaskFields {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            completed: false,
            due: None,
            priority: None,
            duration_minutes: None,
            labels: BTreeSet::new(),
        }
    }
}

/// Partial overlay over a record's mutable fields.
///
/// Outer `None` means "untouched"; `Some(None)` clears an optional field.
/// Serde needs the `double_option` helper so a serialized `null` survives a
/// round-trip as `Some(None)` instead of collapsing to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub due: Option<Option<DueStamp>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub priority: Option<Option<Priority>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub duration_minutes: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeSet<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub parent: Option<Option<TaskId>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl ChangeSet {
    /// Full-value changeset: every field set to its current value, plus the
    /// parent assignment. Used when a scan detects a local edit — the whole
    /// current state wins, not just the diffed fields.
    pub fn from_fields(fields: &TaskFields, parent: Option<&TaskId>) -> Self {
        Self {
            content: Some(fields.content.clone()),
            completed: Some(fields.completed),
            due: Some(fields.due),
            priority: Some(fields.priority),
            duration_minutes: Some(fields.duration_minutes),
            labels: Some(fields.labels.clone()),
            parent: Some(parent.cloned()),
            deleted: false,
        }
    }

    /// Changeset carrying only a deletion flag.
    pub fn deletion() -> Self {
        Self {
            deleted: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this overlay to a record's fields and parent in place.
    pub fn apply_to(&self, fields: &mut TaskFields, parent: &mut Option<TaskId>) {
        if let Some(content) = &self.content {
            fields.content = content.clone();
        }
        if let Some(completed) = self.completed {
            fields.completed = completed;
        }
        if let Some(due) = self.due {
            fields.due = due;
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if let Some(duration) = self.duration_minutes {
            fields.duration_minutes = duration;
        }
        if let Some(labels) = &self.labels {
            fields.labels = labels.clone();
        }
        if let Some(new_parent) = &self.parent {
            *parent = new_parent.clone();
        }
    }
}

/// One detected divergence awaiting conflict resolution.
///
/// Local-origin timestamps are document mtimes; remote-origin timestamps are
/// the service's update times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub origin: ChangeOrigin,
    pub timestamp: DateTime<Utc>,
    pub change: ChangeSet,
}

/// Signed conflict-resolution window, in seconds.
///
/// Magnitude is the window size; sign is the tie-break policy — positive
/// means remote wins inside the window, zero or negative means local wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictWindow(pub i64);

impl ConflictWindow {
    pub fn magnitude_secs(self) -> i64 {
        self.0.abs()
    }

    pub fn remote_wins_inside(self) -> bool {
        self.0 > 0
    }
}

/// The authoritative cached state of one remote task, keyed by its remote id.
///
/// `document` reflects the last reconciled location and may lag the true
/// location until the next bidirectional check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub document: PathBuf,
    pub fields: TaskFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,
    pub last_synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingChange>,
}

impl TaskRecord {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn newtype_display() {
        assert_eq!(TaskId::from("r-91").to_string(), "r-91");
        assert_eq!(SyncCursor::initial().to_string(), "*");
    }

    #[rstest]
    #[case(Priority::Medium, 2)]
    #[case(Priority::High, 3)]
    #[case(Priority::Urgent, 4)]
    fn priority_wire_roundtrip(#[case] priority: Priority, #[case] wire: u8) {
        assert_eq!(priority.wire(), wire);
        assert_eq!(Priority::from_wire(wire), Some(priority));
        assert_eq!(Priority::from_keyword(priority.keyword()), Some(priority));
    }

    #[test]
    fn priority_treats_service_default_as_absent() {
        assert_eq!(Priority::from_wire(1), None);
        assert_eq!(Priority::from_wire(0), None);
        assert_eq!(Priority::from_wire(5), None);
    }

    #[test]
    fn full_value_changeset_applies_cleanly() {
        let mut fields = TaskFields::new("water the plants");
        fields.priority = Some(Priority::High);
        fields.labels.insert("home".to_string());
        let parent = Some(TaskId::from("p-1"));

        let change = ChangeSet::from_fields(&fields, parent.as_ref());
        let mut applied = TaskFields::new("placeholder");
        let mut applied_parent = None;
        change.apply_to(&mut applied, &mut applied_parent);

        assert_eq!(applied, fields);
        assert_eq!(applied_parent, parent);
    }

    #[test]
    fn changeset_clears_optional_fields_with_inner_none() {
        let mut fields = TaskFields::new("call dentist");
        fields.due = Some(DueStamp {
            date: NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"),
            time: None,
        });
        fields.priority = Some(Priority::Urgent);

        let change = ChangeSet {
            due: Some(None),
            priority: Some(None),
            ..ChangeSet::default()
        };
        let mut parent = None;
        change.apply_to(&mut fields, &mut parent);
        assert_eq!(fields.due, None);
        assert_eq!(fields.priority, None);
    }

    #[test]
    fn cleared_field_survives_json_roundtrip() {
        let change = ChangeSet {
            due: Some(None),
            parent: Some(None),
            ..ChangeSet::default()
        };
        let json = serde_json::to_string(&change).expect("serialize");
        let back: ChangeSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, change, "Some(None) must not collapse to None");
    }

    #[test]
    fn deletion_changeset_is_not_empty() {
        assert!(ChangeSet::default().is_empty());
        assert!(!ChangeSet::deletion().is_empty());
        assert!(ChangeSet::deletion().deleted);
    }

    #[test]
    fn conflict_window_sign_encodes_tie_break() {
        assert!(ConflictWindow(60).remote_wins_inside());
        assert!(!ConflictWindow(-30).remote_wins_inside());
        assert!(!ConflictWindow(0).remote_wins_inside());
        assert_eq!(ConflictWindow(-30).magnitude_secs(), 30);
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = TaskRecord {
            id: TaskId::from("r-7"),
            document: PathBuf::from("inbox.md"),
            fields: TaskFields::new("ship the release"),
            parent: None,
            last_synced_at: Utc::now(),
            pending: vec![PendingChange {
                origin: ChangeOrigin::Remote,
                timestamp: Utc::now(),
                change: ChangeSet {
                    completed: Some(true),
                    ..ChangeSet::default()
                },
            }],
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let back: TaskRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }
}
