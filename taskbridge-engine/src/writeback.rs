//! Write-back planner: applying resolved remote-won changes to a document.
//!
//! Records are applied one depth at a time, shallowest first — a task's
//! placement depends on its parent already sitting in the right place. A
//! structurally correct line is rewritten where it stands (indentation
//! preserved); anything else is removed and reinserted after the last
//! same-depth sibling of its new parent, found by a forward scan rather
//! than assuming siblings form a contiguous block.

use std::path::Path;

use taskbridge_codec as codec;
use taskbridge_core::store::TaskStore;
use taskbridge_core::types::TaskId;

use crate::error::EngineError;
use crate::hierarchy::record_depth;
use crate::scan::{join_lines, split_lines};
use crate::vault::{read_or_empty, Vault};

/// What a write-back pass did to the document.
#[derive(Debug, Default)]
pub struct WritebackOutcome {
    pub rewritten: usize,
    pub repositioned: usize,
    pub removed: usize,
    pub anomalies: Vec<String>,
}

/// Apply remote-won updates and deletions to `doc`.
///
/// The store must already hold each record's post-resolution state; this
/// pass only makes the document agree with it.
pub fn apply(
    store: &TaskStore,
    vault: &dyn Vault,
    doc: &Path,
    updated: &[TaskId],
    deleted: &[TaskId],
) -> Result<WritebackOutcome, EngineError> {
    let mut outcome = WritebackOutcome::default();
    if updated.is_empty() && deleted.is_empty() {
        return Ok(outcome);
    }

    let original = read_or_empty(vault, doc)?;
    let mut lines = split_lines(&original);

    for id in deleted {
        match find_line(&lines, id) {
            Some(index) => {
                lines.remove(index);
                outcome.removed += 1;
            }
            None => {
                // Already gone locally; nothing to erase.
                tracing::debug!("deleted task {id} has no line in {}", doc.display());
            }
        }
    }

    // Shallowest first, so parents are placed before their children.
    let mut ordered: Vec<(usize, &TaskId)> = updated
        .iter()
        .map(|id| (record_depth(store, id), id))
        .collect();
    ordered.sort_by_key(|(depth, _)| *depth);

    for (depth, id) in ordered {
        let Some(record) = store.get(id) else {
            outcome.anomalies.push(format!("no record for task {id}"));
            continue;
        };
        let Some(index) = find_line(&lines, id) else {
            outcome.anomalies.push(format!(
                "task {id} has no line in {}; skipping write-back",
                doc.display()
            ));
            continue;
        };

        let current_indent = codec::parse(&lines[index]).map(|p| p.indent_units);
        let current_parent = structural_parent(&lines, index);
        let placed_correctly =
            current_indent == Some(depth) && current_parent == record.parent;

        if placed_correctly {
            let prefix: String = lines[index]
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect();
            lines[index] = format!("{prefix}{}", codec::build(&record.fields, Some(id), 0));
            outcome.rewritten += 1;
        } else {
            lines.remove(index);
            let insert_at = insertion_point(&lines, record.parent.as_ref(), depth);
            lines.insert(insert_at, codec::build(&record.fields, Some(id), depth));
            outcome.repositioned += 1;
        }
    }

    let updated_text = join_lines(&lines);
    if updated_text != original {
        vault.write(doc, &updated_text)?;
    }
    Ok(outcome)
}

/// Index of the line carrying `id`, if any.
fn find_line(lines: &[String], id: &TaskId) -> Option<usize> {
    lines
        .iter()
        .position(|line| codec::extract_id(line).as_ref() == Some(id))
}

/// The id of the nearest preceding task line with smaller indentation, or
/// `None` at root. A non-indented non-task line closes every level.
fn structural_parent(lines: &[String], index: usize) -> Option<TaskId> {
    let own_indent = codec::parse(&lines[index])?.indent_units;
    if own_indent == 0 {
        return None;
    }
    for line in lines[..index].iter().rev() {
        if let Some(parsed) = codec::parse(line) {
            if parsed.indent_units < own_indent {
                return parsed.id;
            }
        } else if !line.trim().is_empty() && !line.starts_with([' ', '\t']) {
            return None;
        }
    }
    None
}

/// Where a repositioned line belongs: after the last same-depth sibling of
/// its parent, directly after a childless parent, or at the end of the root
/// segment.
fn insertion_point(lines: &[String], parent: Option<&TaskId>, depth: usize) -> usize {
    match parent {
        Some(pid) => {
            let Some(parent_index) = lines
                .iter()
                .position(|line| codec::extract_id(line).as_ref() == Some(pid))
            else {
                // Parent line missing; fall back to the root segment.
                return insertion_point(lines, None, 0);
            };
            let mut insert_at = parent_index + 1;
            for (offset, line) in lines[parent_index + 1..].iter().enumerate() {
                let index = parent_index + 1 + offset;
                if let Some(parsed) = codec::parse(line) {
                    if parsed.indent_units == depth
                        && structural_parent(lines, index).as_ref() == Some(pid)
                    {
                        insert_at = index + 1;
                    }
                }
            }
            insert_at
        }
        None => {
            let mut insert_at = lines.len();
            let mut last_root = None;
            for (index, line) in lines.iter().enumerate() {
                if let Some(parsed) = codec::parse(line) {
                    if parsed.indent_units == 0 {
                        last_root = Some(index);
                    }
                }
            }
            if let Some(last) = last_root {
                insert_at = last + 1;
            }
            insert_at
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use taskbridge_core::types::{TaskFields, TaskRecord};

    fn lines_of(text: &str) -> Vec<String> {
        split_lines(text)
    }

    fn record(store: &mut TaskStore, id: &str, content: &str, parent: Option<&str>) {
        store.upsert(TaskRecord {
            id: TaskId::from(id),
            document: PathBuf::from("doc.md"),
            fields: TaskFields::new(content),
            parent: parent.map(TaskId::from),
            last_synced_at: Utc::now(),
            pending: vec![],
        });
    }

    #[test]
    fn structural_parent_walks_up_indentation() {
        let lines = lines_of(
            "- [ ] a [sync:: a]\n    - [ ] b [sync:: b]\n        - [ ] c [sync:: c]\n",
        );
        assert_eq!(structural_parent(&lines, 2), Some(TaskId::from("b")));
        assert_eq!(structural_parent(&lines, 1), Some(TaskId::from("a")));
        assert_eq!(structural_parent(&lines, 0), None);
    }

    #[test]
    fn insertion_after_last_sibling_not_contiguous_block() {
        // Root tasks are interleaved with prose; the new sibling of "p" must
        // land after its *last* child at the target depth.
        let lines = lines_of(
            "- [ ] p [sync:: p]\n    - [ ] c1 [sync:: c1]\nprose resets nesting\n- [ ] other [sync:: o]\n",
        );
        let at = insertion_point(&lines, Some(&TaskId::from("p")), 1);
        assert_eq!(at, 2, "after c1, before the prose line");
    }

    #[test]
    fn insertion_directly_after_childless_parent() {
        let lines = lines_of("- [ ] p [sync:: p]\n- [ ] other [sync:: o]\n");
        let at = insertion_point(&lines, Some(&TaskId::from("p")), 1);
        assert_eq!(at, 1);
    }

    #[test]
    fn insertion_at_end_of_root_segment() {
        let lines = lines_of("- [ ] a [sync:: a]\n    - [ ] b [sync:: b]\ntrailing prose\n");
        let at = insertion_point(&lines, None, 0);
        assert_eq!(at, 1, "after the last root task line");
    }

    struct MemVault(std::cell::RefCell<String>);

    impl Vault for MemVault {
        fn list_documents(&self) -> Result<Vec<PathBuf>, EngineError> {
            Ok(vec![PathBuf::from("doc.md")])
        }
        fn read(&self, _path: &Path) -> Result<String, EngineError> {
            Ok(self.0.borrow().clone())
        }
        fn write(&self, _path: &Path, content: &str) -> Result<(), EngineError> {
            *self.0.borrow_mut() = content.to_string();
            Ok(())
        }
        fn modified_at(&self, _path: &Path) -> Result<chrono::DateTime<Utc>, EngineError> {
            Ok(Utc::now())
        }
    }

    #[test]
    fn in_place_rewrite_preserves_indentation() {
        let mut store = TaskStore::new();
        record(&mut store, "a", "renamed task", None);
        record(&mut store, "b", "child", Some("a"));

        let vault = MemVault(std::cell::RefCell::new(
            "- [ ] old name [sync:: a]\n    - [ ] child [sync:: b]\n".to_string(),
        ));
        let outcome = apply(
            &store,
            &vault,
            Path::new("doc.md"),
            &[TaskId::from("a")],
            &[],
        )
        .expect("apply");

        assert_eq!(outcome.rewritten, 1);
        assert_eq!(outcome.repositioned, 0);
        assert_eq!(
            vault.0.borrow().as_str(),
            "- [ ] renamed task [sync:: a]\n    - [ ] child [sync:: b]\n"
        );
    }

    #[test]
    fn reparented_task_is_removed_and_reinserted() {
        let mut store = TaskStore::new();
        record(&mut store, "a", "parent a", None);
        record(&mut store, "b", "parent b", None);
        record(&mut store, "c", "moved child", Some("b"));

        let vault = MemVault(std::cell::RefCell::new(
            "- [ ] parent a [sync:: a]\n    - [ ] moved child [sync:: c]\n- [ ] parent b [sync:: b]\n"
                .to_string(),
        ));
        let outcome = apply(
            &store,
            &vault,
            Path::new("doc.md"),
            &[TaskId::from("c")],
            &[],
        )
        .expect("apply");

        assert_eq!(outcome.repositioned, 1);
        assert_eq!(
            vault.0.borrow().as_str(),
            "- [ ] parent a [sync:: a]\n- [ ] parent b [sync:: b]\n    - [ ] moved child [sync:: c]\n"
        );
    }

    #[test]
    fn deletion_removes_the_line() {
        let mut store = TaskStore::new();
        record(&mut store, "a", "stays", None);

        let vault = MemVault(std::cell::RefCell::new(
            "- [ ] stays [sync:: a]\n- [ ] goes [sync:: gone]\n".to_string(),
        ));
        let outcome = apply(
            &store,
            &vault,
            Path::new("doc.md"),
            &[],
            &[TaskId::from("gone")],
        )
        .expect("apply");

        assert_eq!(outcome.removed, 1);
        assert_eq!(vault.0.borrow().as_str(), "- [ ] stays [sync:: a]\n");
    }

    #[test]
    fn detached_to_root_lands_at_root_segment_end() {
        let mut store = TaskStore::new();
        record(&mut store, "a", "parent", None);
        record(&mut store, "b", "freed", None);

        let vault = MemVault(std::cell::RefCell::new(
            "- [ ] parent [sync:: a]\n    - [ ] freed [sync:: b]\n".to_string(),
        ));
        let outcome = apply(
            &store,
            &vault,
            Path::new("doc.md"),
            &[TaskId::from("b")],
            &[],
        )
        .expect("apply");

        assert_eq!(outcome.repositioned, 1);
        assert_eq!(
            vault.0.borrow().as_str(),
            "- [ ] parent [sync:: a]\n- [ ] freed [sync:: b]\n"
        );
    }
}
