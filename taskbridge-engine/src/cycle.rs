//! The sync cycle: pull → select → reconcile → resolve → push → persist.
//!
//! One cycle is a single blocking sequence. Documents are processed
//! strictly sequentially — the bidirectional check assumes no other
//! document mutates while it searches, so this is an invariant, not an
//! optimization. A failed document or batch is surfaced and the cycle
//! continues; only pull failure (after the client's cursor fallback) and
//! persistence failure abort a cycle, leaving in-memory state as-is for
//! the next cycle to re-derive.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use taskbridge_core::config::SyncConfig;
use taskbridge_core::store::{self, TaskStore};
use taskbridge_core::types::{
    ChangeOrigin, ChangeSet, PendingChange, TaskFields, TaskId,
};
use taskbridge_remote::{MoveSpec, RemoteApi, RemoteItem, UpdateSpec};

use crate::error::EngineError;
use crate::hierarchy;
use crate::pacer::Pacer;
use crate::resolver;
use crate::scan;
use crate::vault::{read_or_empty, Vault};
use crate::writeback;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Summary of one completed cycle.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub documents: usize,
    /// New tasks created remotely and given ids in their documents.
    pub created: usize,
    /// Local wins pushed to the remote (field updates, completions, moves).
    pub pushed: usize,
    /// Remote wins written back into documents.
    pub written_back: usize,
    /// Local deletions propagated to the remote.
    pub deleted_remote: usize,
    /// Remote deletions applied to documents.
    pub deleted_local: usize,
    /// Created-then-unmatched remote tasks cleaned up.
    pub ghosts: usize,
    pub full_resync: bool,
    pub anomalies: Vec<String>,
    pub errors: Vec<String>,
    pub duration_ms: u128,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run one cycle against an already-loaded store. The caller persists.
pub fn run_cycle(
    task_store: &mut TaskStore,
    vault: &dyn Vault,
    remote: &mut dyn RemoteApi,
    config: &SyncConfig,
    pacer: &mut dyn Pacer,
    modified_since: Option<DateTime<Utc>>,
) -> Result<CycleReport, EngineError> {
    let started = Instant::now();
    let mut run = CycleRun {
        store: task_store,
        vault,
        remote,
        config,
        pacer,
        report: CycleReport::default(),
        created_this_cycle: HashSet::new(),
    };

    run.pull()?;

    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    let mut queued: HashSet<PathBuf> = HashSet::new();
    run.select_documents(modified_since, &mut queue, &mut queued)?;

    while let Some(doc) = queue.pop_front() {
        run.report.documents += 1;
        match run.process_document(&doc) {
            Ok(discovered) => {
                for other in discovered {
                    if queued.insert(other.clone()) {
                        queue.push_back(other);
                    }
                }
            }
            Err(err) => {
                tracing::warn!("document {} failed: {err}", doc.display());
                run.report.errors.push(format!("{}: {err}", doc.display()));
            }
        }
        run.pacer.breathe();
    }

    let mut report = run.report;
    report.duration_ms = started.elapsed().as_millis();
    Ok(report)
}

/// Load the store, run one cycle, persist the store. The shared entrypoint
/// for the CLI's one-shot sync.
pub fn sync_once(
    home: &Path,
    config: &SyncConfig,
    vault: &dyn Vault,
    remote: &mut dyn RemoteApi,
    pacer: &mut dyn Pacer,
    modified_since: Option<DateTime<Utc>>,
) -> Result<CycleReport, EngineError> {
    let mut task_store = store::load_at(home)?;
    let report = run_cycle(&mut task_store, vault, remote, config, pacer, modified_since)?;
    store::save_at(home, &task_store)?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Cycle internals
// ---------------------------------------------------------------------------

struct CycleRun<'a> {
    store: &'a mut TaskStore,
    vault: &'a dyn Vault,
    remote: &'a mut dyn RemoteApi,
    config: &'a SyncConfig,
    pacer: &'a mut dyn Pacer,
    report: CycleReport,
    created_this_cycle: HashSet<TaskId>,
}

/// A local win staged for pushing, with its post-application state.
struct LocalWin {
    id: TaskId,
    delete: bool,
    fields: TaskFields,
    parent: Option<TaskId>,
    update_fields: bool,
    completion: Option<bool>,
    move_parent: bool,
}

impl CycleRun<'_> {
    /// Pull remote deltas into the store's pending-change logs.
    fn pull(&mut self) -> Result<(), EngineError> {
        let pulled = self.remote.pull(&self.store.cursor())?;
        self.store.set_cursor(pulled.cursor);
        self.report.full_resync = pulled.full_resync;
        if pulled.full_resync {
            tracing::info!("remote answered with a full resync snapshot");
        }
        for item in &pulled.items {
            self.intake_remote_item(item);
        }
        Ok(())
    }

    fn intake_remote_item(&mut self, item: &RemoteItem) {
        let Some(record) = self.store.get(&item.id) else {
            if !item.is_deleted && item.has_marker(&self.config.sync_label) {
                let note = format!(
                    "remote task {} carries the sync marker but has no local record; not importing",
                    item.id
                );
                tracing::warn!("{note}");
                self.report.anomalies.push(note);
            }
            return;
        };

        let change = if item.is_deleted {
            ChangeSet::deletion()
        } else {
            let fields = item.to_fields(&self.config.sync_label);
            if fields == record.fields && item.parent_id == record.parent {
                // No divergence — usually our own push echoed back.
                return;
            }
            ChangeSet::from_fields(&fields, item.parent_id.as_ref())
        };

        self.store.push_pending(
            &item.id,
            PendingChange {
                origin: ChangeOrigin::Remote,
                timestamp: item.updated_at,
                change,
            },
        );
    }

    /// Selection: sync-enabled documents modified since the last cycle,
    /// plus every document owning a record with pending changes (crash
    /// recovery — those are examined even when unmodified).
    fn select_documents(
        &mut self,
        modified_since: Option<DateTime<Utc>>,
        queue: &mut VecDeque<PathBuf>,
        queued: &mut HashSet<PathBuf>,
    ) -> Result<(), EngineError> {
        for doc in self.vault.list_documents()? {
            let include = match modified_since {
                None => true,
                Some(since) => self
                    .vault
                    .modified_at(&doc)
                    .map(|mtime| mtime > since)
                    .unwrap_or(true),
            };
            if include && queued.insert(doc.clone()) {
                queue.push_back(doc);
            }
        }

        let pending_docs: Vec<PathBuf> = self
            .store
            .with_pending()
            .iter()
            .map(|record| record.document.clone())
            .collect();
        for doc in pending_docs {
            if queued.insert(doc.clone()) {
                queue.push_back(doc);
            }
        }
        Ok(())
    }

    /// The full per-document pass. Returns documents discovered via the
    /// bidirectional check for enqueueing.
    fn process_document(&mut self, doc: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let text = read_or_empty(self.vault, doc)?;
        let mtime = self.vault.modified_at(doc).unwrap_or_else(|_| Utc::now());
        let tasks = scan::scan_document(&text);

        let reconciled = scan::reconcile_document(
            self.store,
            self.vault,
            doc,
            &tasks,
            mtime,
            &self.created_this_cycle,
            self.pacer,
        )?;
        self.report.anomalies.extend(reconciled.anomalies);

        let creation = hierarchy::create_new_tasks(
            self.store,
            self.vault,
            self.remote,
            doc,
            &reconciled.new_tasks,
            self.config.effective_batch_limit(),
        )?;
        self.report.created += creation.created_ids.len();
        self.report.ghosts += creation.ghosts;
        self.report.anomalies.extend(creation.anomalies.clone());
        self.report.errors.extend(creation.errors.clone());
        self.created_this_cycle
            .extend(creation.created_ids.iter().cloned());

        // Existing tasks nested under freshly-created parents can only get
        // their parent assignment now that the parent has an id.
        for (id, content) in reconciled.deferred_parents {
            let Some(parent_id) = creation.content_ids.get(&content) else {
                continue;
            };
            let needs_link = self
                .store
                .get(&id)
                .is_some_and(|record| record.parent.as_ref() != Some(parent_id));
            if needs_link {
                self.store.push_pending(
                    &id,
                    PendingChange {
                        origin: ChangeOrigin::Local,
                        timestamp: mtime,
                        change: ChangeSet {
                            parent: Some(Some(parent_id.clone())),
                            ..ChangeSet::default()
                        },
                    },
                );
            }
        }

        self.resolve_and_apply(doc)
            .map(|()| reconciled.discovered)
    }

    /// Resolve every pending record in this document, write remote wins
    /// back, and push local wins.
    fn resolve_and_apply(&mut self, doc: &Path) -> Result<(), EngineError> {
        let window = self.config.conflict_window();
        let ids: Vec<TaskId> = self
            .store
            .by_document(doc)
            .iter()
            .filter(|record| record.has_pending())
            .map(|record| record.id.clone())
            .collect();

        let mut local_wins: Vec<LocalWin> = Vec::new();
        let mut remote_updates: Vec<TaskId> = Vec::new();
        let mut remote_deletes: Vec<TaskId> = Vec::new();

        for id in ids {
            let Some(record) = self.store.get(&id) else {
                continue;
            };
            let Some(winner) = resolver::resolve(&record.pending, window) else {
                continue;
            };
            let winner = winner.clone();

            match winner.origin {
                ChangeOrigin::Local => {
                    local_wins.push(plan_local_win(record, &winner.change));
                }
                ChangeOrigin::Remote if winner.change.deleted => {
                    remote_deletes.push(id);
                }
                ChangeOrigin::Remote => {
                    let sanitized = self.sanitize_remote_parent(doc, &id, winner.change);
                    let Some(record) = self.store.get_mut(&id) else {
                        continue;
                    };
                    sanitized.apply_to(&mut record.fields, &mut record.parent);
                    record.pending.clear();
                    record.last_synced_at = Utc::now();
                    remote_updates.push(id);
                }
            }
        }

        let applied = writeback::apply(self.store, self.vault, doc, &remote_updates, &remote_deletes)?;
        self.report.written_back += applied.rewritten + applied.repositioned;
        self.report.deleted_local += applied.removed;
        self.report.anomalies.extend(applied.anomalies);
        for id in &remote_deletes {
            self.store.remove(id);
        }

        self.push_local_wins(doc, local_wins);
        Ok(())
    }

    /// Hierarchies may not span documents: a remote-won parent assignment
    /// pointing outside `doc` is dropped and the task becomes root.
    fn sanitize_remote_parent(&mut self, doc: &Path, id: &TaskId, mut change: ChangeSet) -> ChangeSet {
        if let Some(Some(parent_id)) = &change.parent {
            let parent_here = self
                .store
                .get(parent_id)
                .is_some_and(|parent| parent.document == doc);
            if !parent_here {
                self.report.anomalies.push(format!(
                    "remote parent {parent_id} of task {id} is not in {}; treating as root",
                    doc.display()
                ));
                change.parent = Some(None);
            }
        }
        change
    }

    /// Push staged local wins in capped batches. A failed batch keeps its
    /// records' pending logs so the next cycle retries; everything else is
    /// applied and cleared.
    fn push_local_wins(&mut self, doc: &Path, wins: Vec<LocalWin>) {
        if wins.is_empty() {
            return;
        }
        let limit = self.config.effective_batch_limit();
        let mut failed: HashSet<TaskId> = HashSet::new();

        let deletes: Vec<TaskId> = wins
            .iter()
            .filter(|w| w.delete)
            .map(|w| w.id.clone())
            .collect();
        for chunk in deletes.chunks(limit) {
            match self.remote.batch_delete(chunk) {
                Ok(cursor) => {
                    self.store.set_cursor(cursor);
                    for id in chunk {
                        self.store.remove(id);
                        self.report.deleted_remote += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!("delete batch failed for {}: {err}", doc.display());
                    self.report
                        .errors
                        .push(format!("delete batch failed for {}: {err}", doc.display()));
                    failed.extend(chunk.iter().cloned());
                }
            }
        }

        let updates: Vec<UpdateSpec> = wins
            .iter()
            .filter(|w| !w.delete && (w.update_fields || w.completion.is_some()))
            .map(|w| UpdateSpec {
                id: w.id.clone(),
                fields: w.update_fields.then(|| w.fields.clone()),
                completed: w.completion,
            })
            .collect();
        for chunk in updates.chunks(limit) {
            match self.remote.batch_update(chunk) {
                Ok(cursor) => self.store.set_cursor(cursor),
                Err(err) => {
                    tracing::warn!("update batch failed for {}: {err}", doc.display());
                    self.report
                        .errors
                        .push(format!("update batch failed for {}: {err}", doc.display()));
                    failed.extend(chunk.iter().map(|spec| spec.id.clone()));
                }
            }
        }

        let moves: Vec<MoveSpec> = wins
            .iter()
            .filter(|w| !w.delete && w.move_parent)
            .map(|w| MoveSpec {
                id: w.id.clone(),
                new_parent: w.parent.clone(),
            })
            .collect();
        for chunk in moves.chunks(limit) {
            match self.remote.batch_move(chunk) {
                Ok(cursor) => self.store.set_cursor(cursor),
                Err(err) => {
                    tracing::warn!("move batch failed for {}: {err}", doc.display());
                    self.report
                        .errors
                        .push(format!("move batch failed for {}: {err}", doc.display()));
                    failed.extend(chunk.iter().map(|spec| spec.id.clone()));
                }
            }
        }

        let now = Utc::now();
        for win in wins {
            if win.delete || failed.contains(&win.id) {
                continue;
            }
            let Some(record) = self.store.get_mut(&win.id) else {
                continue;
            };
            record.fields = win.fields;
            record.parent = win.parent;
            record.pending.clear();
            record.last_synced_at = now;
            if win.update_fields || win.completion.is_some() || win.move_parent {
                self.report.pushed += 1;
            }
        }
    }
}

/// Work out which remote operations a local win needs by applying its
/// changeset to a copy of the record.
fn plan_local_win(record: &taskbridge_core::types::TaskRecord, change: &ChangeSet) -> LocalWin {
    if change.deleted {
        return LocalWin {
            id: record.id.clone(),
            delete: true,
            fields: record.fields.clone(),
            parent: record.parent.clone(),
            update_fields: false,
            completion: None,
            move_parent: false,
        };
    }

    let mut fields = record.fields.clone();
    let mut parent = record.parent.clone();
    change.apply_to(&mut fields, &mut parent);

    let completion = (fields.completed != record.fields.completed).then_some(fields.completed);
    let update_fields = non_completion_fields_differ(&fields, &record.fields);
    let move_parent = parent != record.parent;

    LocalWin {
        id: record.id.clone(),
        delete: false,
        fields,
        parent,
        update_fields,
        completion,
        move_parent,
    }
}

fn non_completion_fields_differ(a: &TaskFields, b: &TaskFields) -> bool {
    a.content != b.content
        || a.due != b.due
        || a.priority != b.priority
        || a.duration_minutes != b.duration_minutes
        || a.labels != b.labels
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
