//! Per-document reconciliation: the document → store direction.
//!
//! A scan walks the document's lines, derives each task's structural parent
//! from list nesting, partitions tasks into new (no embedded id) and
//! existing, and turns observed differences into local-origin pending
//! changes. Records the store believes live here but that the scan did not
//! find go through the bidirectional check (move vs deletion).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use taskbridge_codec as codec;
use taskbridge_core::config::SELF_WRITE_WINDOW_SECS;
use taskbridge_core::store::TaskStore;
use taskbridge_core::types::{
    ChangeOrigin, ChangeSet, PendingChange, TaskFields, TaskId, TaskRecord,
};

use crate::error::EngineError;
use crate::pacer::Pacer;
use crate::search;
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Structural parent linkage of a scanned task line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    Root,
    /// The parent line carries an embedded id.
    Known(TaskId),
    /// The parent is itself a brand-new task, identified only by its text
    /// until the creation protocol assigns it an id.
    PendingContent(String),
}

/// One parsed task line with its position and structural linkage.
#[derive(Debug, Clone)]
pub struct ScannedTask {
    pub line_index: usize,
    pub raw: String,
    pub indent_units: usize,
    pub fields: TaskFields,
    pub id: Option<TaskId>,
    pub parent: ParentLink,
}

/// Scan a document's text into task lines with structural parents.
///
/// Nesting comes from list indentation; a non-indented, non-task line closes
/// every open nesting level. Malformed checkbox lines are skipped and
/// logged, never fatal.
pub fn scan_document(text: &str) -> Vec<ScannedTask> {
    let mut tasks = Vec::new();
    // (indent_units, id-or-content) for each open ancestor level.
    let mut stack: Vec<(usize, ParentLink)> = Vec::new();

    for (line_index, line) in text.lines().enumerate() {
        let Some(parsed) = codec::parse(line) else {
            let trimmed = line.trim_start();
            if trimmed.starts_with("- [") || trimmed.starts_with("* [") {
                tracing::debug!("skipping malformed task line {line_index}: {line:?}");
            }
            if !line.trim().is_empty() && !line.starts_with([' ', '\t']) {
                stack.clear();
            }
            continue;
        };

        while stack
            .last()
            .is_some_and(|(indent, _)| *indent >= parsed.indent_units)
        {
            stack.pop();
        }
        let parent = stack
            .last()
            .map(|(_, link)| link.clone())
            .unwrap_or(ParentLink::Root);

        let own_link = match &parsed.id {
            Some(id) => ParentLink::Known(id.clone()),
            None => ParentLink::PendingContent(parsed.fields.content.clone()),
        };
        stack.push((parsed.indent_units, own_link));

        tasks.push(ScannedTask {
            line_index,
            raw: line.to_string(),
            indent_units: parsed.indent_units,
            fields: parsed.fields,
            id: parsed.id,
            parent,
        });
    }

    tasks
}

/// Document text as owned lines (trailing newline normalized away).
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Rejoin lines with a trailing newline; empty documents stay empty.
pub(crate) fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// What a per-document reconciliation pass produced.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Tasks with no embedded id, for the creation protocol.
    pub new_tasks: Vec<ScannedTask>,
    /// Documents discovered to now own a moved record; the cycle enqueues
    /// them (deduplicated) for their own pass.
    pub discovered: Vec<PathBuf>,
    /// Existing tasks whose structural parent is a brand-new task; resolved
    /// after the creation protocol runs.
    pub deferred_parents: Vec<(TaskId, String)>,
    pub anomalies: Vec<String>,
}

/// Reconcile one document's scanned tasks against the store.
///
/// Appends local-origin pending changes (full current values, document
/// mtime as timestamp), adopts unknown ids as baseline records, updates
/// `document` for moved-in records, and runs the bidirectional check for
/// records missing from the scan. `created_this_cycle` ids are exempt from
/// the missing check.
pub fn reconcile_document(
    store: &mut TaskStore,
    vault: &dyn Vault,
    doc: &Path,
    tasks: &[ScannedTask],
    doc_mtime: DateTime<Utc>,
    created_this_cycle: &HashSet<TaskId>,
    pacer: &mut dyn Pacer,
) -> Result<ReconcileOutcome, EngineError> {
    let mut outcome = ReconcileOutcome::default();
    let mut seen: HashSet<TaskId> = HashSet::new();

    for task in tasks {
        let Some(id) = &task.id else {
            outcome.new_tasks.push(task.clone());
            continue;
        };
        seen.insert(id.clone());

        // Resolved parent: Some(assignment) now, or None while the parent is
        // itself waiting on the creation protocol.
        let resolved_parent: Option<Option<TaskId>> = match &task.parent {
            ParentLink::Root => Some(None),
            ParentLink::Known(pid) => match store.get(pid) {
                Some(parent_record) if parent_record.document != doc => {
                    outcome.anomalies.push(format!(
                        "task {id}: parent {pid} lives in {}; hierarchies cannot span documents, \
                         treating as root",
                        parent_record.document.display()
                    ));
                    Some(None)
                }
                _ => Some(Some(pid.clone())),
            },
            ParentLink::PendingContent(content) => {
                outcome.deferred_parents.push((id.clone(), content.clone()));
                None
            }
        };

        if !store.contains(id) {
            // Unexpected: ids are only ever minted by this system. Adopt the
            // current state as baseline instead of dropping the task.
            outcome.anomalies.push(format!(
                "task {id} in {} has an id unknown to the store; adopting as baseline",
                doc.display()
            ));
            store.upsert(TaskRecord {
                id: id.clone(),
                document: doc.to_path_buf(),
                fields: task.fields.clone(),
                parent: resolved_parent.clone().flatten(),
                last_synced_at: doc_mtime,
                pending: vec![],
            });
            continue;
        }

        let Some(record) = store.get_mut(id) else {
            continue;
        };
        if record.document != doc {
            tracing::info!(
                "task {id} moved into {} from {}",
                doc.display(),
                record.document.display()
            );
            record.document = doc.to_path_buf();
        }

        let compare_parent = resolved_parent.unwrap_or_else(|| record.parent.clone());
        let differs = task.fields != record.fields || compare_parent != record.parent;
        if !differs {
            continue;
        }

        let since_write = (doc_mtime - record.last_synced_at).num_seconds().abs();
        if since_write < SELF_WRITE_WINDOW_SECS {
            // Almost certainly observing our own prior write-back; a
            // synthetic conflict here would feed back forever.
            tracing::debug!("suppressing self-write echo for task {id} ({since_write}s)");
            continue;
        }

        record.pending.push(PendingChange {
            origin: ChangeOrigin::Local,
            timestamp: doc_mtime,
            change: ChangeSet::from_fields(&task.fields, compare_parent.as_ref()),
        });
    }

    // Bidirectional check: records we believe live here but did not see.
    let missing: Vec<TaskId> = store
        .by_document(doc)
        .iter()
        .map(|r| r.id.clone())
        .filter(|id| !seen.contains(id) && !created_this_cycle.contains(id))
        .collect();

    if !missing.is_empty() {
        let found = search::find_documents_with_ids(vault, doc, &missing, pacer)?;
        for id in missing {
            match found.get(&id) {
                Some(new_home) => {
                    tracing::info!("task {id} found in {}; updating location", new_home.display());
                    if let Some(record) = store.get_mut(&id) {
                        record.document = new_home.clone();
                    }
                    outcome.discovered.push(new_home.clone());
                }
                None => {
                    if let Some(record) = store.get_mut(&id) {
                        record.pending.push(PendingChange {
                            origin: ChangeOrigin::Local,
                            timestamp: doc_mtime,
                            change: ChangeSet::deletion(),
                        });
                    }
                }
            }
        }
    }

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
