//! Level-by-level batched creation of new hierarchical tasks.
//!
//! New tasks have no stable identifier until the service assigns one, so
//! parents must exist before children can reference them. Depths are
//! computed iteratively (visited set + hard cap, no recursion), grouped,
//! and created root-first; each level's `content → id` results resolve the
//! next level's parent arguments. Ids are then written back into the
//! document by exact line match; any id that never finds its line is
//! deleted remotely rather than left as an orphan.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::Utc;

use taskbridge_codec as codec;
use taskbridge_core::store::TaskStore;
use taskbridge_core::types::{TaskId, TaskRecord};
use taskbridge_remote::{CreateSpec, RemoteApi};

use crate::error::EngineError;
use crate::scan::{join_lines, split_lines, ParentLink, ScannedTask};
use crate::vault::{read_or_empty, Vault};

/// Hard cap on hierarchy depth; chains beyond this (or cyclic ones) demote
/// to root.
pub const MAX_DEPTH: usize = 32;

/// What a creation pass produced.
#[derive(Debug, Default)]
pub struct CreationOutcome {
    /// Ids assigned and written into the document this pass.
    pub created_ids: HashSet<TaskId>,
    /// New-task content → assigned id, for resolving parents deferred during
    /// the scan.
    pub content_ids: HashMap<String, TaskId>,
    /// Remote tasks deleted because their line could not be matched.
    pub ghosts: usize,
    pub anomalies: Vec<String>,
    pub errors: Vec<String>,
}

/// Depth of a stored record, following the parent chain (capped, cycle-safe).
pub(crate) fn record_depth(store: &TaskStore, id: &TaskId) -> usize {
    let mut depth = 0;
    let mut visited = HashSet::new();
    let mut current = id.clone();
    while let Some(parent) = store.get(&current).and_then(|r| r.parent.clone()) {
        if !visited.insert(current.clone()) || depth >= MAX_DEPTH {
            break;
        }
        depth += 1;
        current = parent;
    }
    depth
}

/// Create every new task in `new_tasks` remotely and write the assigned ids
/// back into `doc`.
///
/// A failed level batch is surfaced and its children fall back to root
/// creation; nothing here aborts the document's cycle.
pub fn create_new_tasks(
    store: &mut TaskStore,
    vault: &dyn Vault,
    remote: &mut dyn RemoteApi,
    doc: &Path,
    new_tasks: &[ScannedTask],
    batch_limit: usize,
) -> Result<CreationOutcome, EngineError> {
    let mut outcome = CreationOutcome::default();
    if new_tasks.is_empty() {
        return Ok(outcome);
    }

    // First occurrence of each content keys pending-parent resolution.
    let mut by_content: HashMap<&str, usize> = HashMap::new();
    for (idx, task) in new_tasks.iter().enumerate() {
        by_content.entry(task.fields.content.as_str()).or_insert(idx);
    }

    // Depth per task, demotions included.
    let mut levels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut demoted: HashSet<usize> = HashSet::new();
    for idx in 0..new_tasks.len() {
        let (depth, demote, anomaly) = creation_depth(idx, new_tasks, &by_content, store);
        if demote {
            demoted.insert(idx);
        }
        if let Some(note) = anomaly {
            outcome.anomalies.push(note);
        }
        levels.entry(depth).or_default().push(idx);
    }

    // Level-by-level creation, root first.
    let mut raw_to_id: HashMap<&str, TaskId> = HashMap::new();
    let mut assigned: Vec<(usize, TaskId)> = Vec::new();
    let mut ghost_ids: Vec<TaskId> = Vec::new();

    for (_depth, idxs) in levels {
        for chunk in idxs.chunks(batch_limit.max(1)) {
            let mut specs = Vec::with_capacity(chunk.len());
            for &idx in chunk {
                let task = &new_tasks[idx];
                let parent = if demoted.contains(&idx) {
                    None
                } else {
                    match &task.parent {
                        ParentLink::Root => None,
                        ParentLink::Known(pid) => Some(pid.clone()),
                        ParentLink::PendingContent(content) => {
                            let resolved = outcome.content_ids.get(content).cloned();
                            if resolved.is_none() {
                                outcome.anomalies.push(format!(
                                    "parent \"{content}\" was not created; \
                                     creating \"{}\" as root",
                                    task.fields.content
                                ));
                            }
                            resolved
                        }
                    }
                };
                specs.push(CreateSpec {
                    temp_id: format!("new-{idx}"),
                    fields: task.fields.clone(),
                    parent,
                });
            }

            let created = match remote.batch_create(&specs) {
                Ok(created) => created,
                Err(err) => {
                    tracing::warn!("create batch failed for {}: {err}", doc.display());
                    outcome.errors.push(format!(
                        "create batch failed for {}: {err}",
                        doc.display()
                    ));
                    continue;
                }
            };
            store.set_cursor(created.cursor);

            for &idx in chunk {
                let task = &new_tasks[idx];
                let Some(id) = created.ids.get(&format!("new-{idx}")) else {
                    outcome.errors.push(format!(
                        "no id assigned for \"{}\"",
                        task.fields.content
                    ));
                    continue;
                };
                outcome
                    .content_ids
                    .entry(task.fields.content.clone())
                    .or_insert_with(|| id.clone());
                // Byte-identical lines collapse to one mapping entry; the
                // displaced task is deleted rather than left orphaned.
                if raw_to_id.contains_key(task.raw.as_str()) {
                    ghost_ids.push(id.clone());
                } else {
                    raw_to_id.insert(task.raw.as_str(), id.clone());
                    assigned.push((idx, id.clone()));
                }
            }
        }
    }

    // Write ids back into the document, matching by exact line content. The
    // document is re-read: it may have changed while the batches ran.
    if !assigned.is_empty() {
        let mut lines = split_lines(&read_or_empty(vault, doc)?);
        let mut consumed: HashSet<usize> = HashSet::new();
        let mut matched: Vec<(usize, TaskId)> = Vec::new();

        for (idx, id) in &assigned {
            let raw = new_tasks[*idx].raw.as_str();
            let slot = (0..lines.len()).find(|i| {
                !consumed.contains(i) && lines[*i] == raw && codec::extract_id(&lines[*i]).is_none()
            });
            match slot {
                Some(i) => {
                    lines[i] = format!("{} [sync:: {}]", lines[i].trim_end(), id.0);
                    consumed.insert(i);
                    matched.push((*idx, id.clone()));
                }
                None => {
                    tracing::warn!(
                        "created task {id} has no matching line left in {}; deleting remotely",
                        doc.display()
                    );
                    ghost_ids.push(id.clone());
                }
            }
        }

        if !matched.is_empty() {
            if let Err(err) = vault.write(doc, &join_lines(&lines)) {
                // Ids never landed in the document; clean the remote side up
                // so nothing is permanently orphaned, then surface the error.
                for (_, id) in &matched {
                    ghost_ids.push(id.clone());
                }
                delete_ghosts(store, remote, &mut outcome, &ghost_ids, batch_limit);
                return Err(err);
            }
        }

        let now = Utc::now();
        for (idx, id) in matched {
            let task = &new_tasks[idx];
            let parent = if demoted.contains(&idx) {
                None
            } else {
                match &task.parent {
                    ParentLink::Root => None,
                    ParentLink::Known(pid) => Some(pid.clone()),
                    ParentLink::PendingContent(content) => outcome.content_ids.get(content).cloned(),
                }
            };
            store.upsert(TaskRecord {
                id: id.clone(),
                document: doc.to_path_buf(),
                fields: task.fields.clone(),
                parent,
                last_synced_at: now,
                pending: vec![],
            });
            outcome.created_ids.insert(id);
        }
    }

    delete_ghosts(store, remote, &mut outcome, &ghost_ids, batch_limit);
    Ok(outcome)
}

fn delete_ghosts(
    store: &mut TaskStore,
    remote: &mut dyn RemoteApi,
    outcome: &mut CreationOutcome,
    ghost_ids: &[TaskId],
    batch_limit: usize,
) {
    for chunk in ghost_ids.chunks(batch_limit.max(1)) {
        if chunk.is_empty() {
            continue;
        }
        match remote.batch_delete(chunk) {
            Ok(cursor) => {
                store.set_cursor(cursor);
                outcome.ghosts += chunk.len();
            }
            Err(err) => {
                tracing::warn!("ghost cleanup failed: {err}");
                outcome.errors.push(format!("ghost cleanup failed: {err}"));
            }
        }
    }
}

/// Depth of one new task: 0 at root, 1 + parent's depth otherwise. Pending
/// parents resolve transitively through `by_content`; cycles, over-deep
/// chains, and missing parents demote to root.
fn creation_depth(
    idx: usize,
    tasks: &[ScannedTask],
    by_content: &HashMap<&str, usize>,
    store: &TaskStore,
) -> (usize, bool, Option<String>) {
    let mut depth = 0usize;
    let mut visited: HashSet<usize> = HashSet::new();
    let mut current = idx;

    loop {
        if !visited.insert(current) || depth >= MAX_DEPTH {
            return (
                0,
                true,
                Some(format!(
                    "cyclic or over-deep parent chain at \"{}\"; demoting to root",
                    tasks[idx].fields.content
                )),
            );
        }
        match &tasks[current].parent {
            ParentLink::Root => return (depth, false, None),
            ParentLink::Known(pid) => {
                return (depth + 1 + record_depth(store, pid), false, None);
            }
            ParentLink::PendingContent(content) => match by_content.get(content.as_str()) {
                Some(&parent_idx) => {
                    depth += 1;
                    current = parent_idx;
                }
                None => {
                    return (
                        0,
                        true,
                        Some(format!(
                            "parent \"{content}\" of \"{}\" not found in this batch; \
                             demoting to root",
                            tasks[idx].fields.content
                        )),
                    );
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
