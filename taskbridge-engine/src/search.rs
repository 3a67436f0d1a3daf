//! Vault-wide embedded-id search backing the bidirectional check.
//!
//! One pass over every sync-enabled document resolves all missing ids at
//! once; the scan yields control periodically so a large vault cannot
//! monopolize the host.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use taskbridge_codec as codec;
use taskbridge_core::types::TaskId;

use crate::error::EngineError;
use crate::pacer::Pacer;
use crate::vault::Vault;

/// Documents scanned between yield points.
pub const SEARCH_YIELD_EVERY: usize = 25;

/// Locate each of `ids` in any sync-enabled document other than `exclude`.
///
/// Ids not present anywhere are absent from the returned map; the caller
/// treats them as locally deleted.
pub fn find_documents_with_ids(
    vault: &dyn Vault,
    exclude: &Path,
    ids: &[TaskId],
    pacer: &mut dyn Pacer,
) -> Result<HashMap<TaskId, PathBuf>, EngineError> {
    let wanted: HashSet<&TaskId> = ids.iter().collect();
    let mut found: HashMap<TaskId, PathBuf> = HashMap::new();

    for (scanned, doc) in vault.list_documents()?.into_iter().enumerate() {
        if scanned > 0 && scanned % SEARCH_YIELD_EVERY == 0 {
            pacer.breathe();
        }
        if doc == exclude {
            continue;
        }

        let text = match vault.read(&doc) {
            Ok(text) => text,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        };
        for line in text.lines() {
            let Some(id) = codec::extract_id(line) else {
                continue;
            };
            if wanted.contains(&id) && !found.contains_key(&id) {
                found.insert(id, doc.clone());
            }
        }
        if found.len() == wanted.len() {
            break;
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacer::CountingPacer;
    use crate::vault::FsVault;
    use tempfile::TempDir;

    const SYNC_HEADER: &str = "---\ntasks-sync: true\n---\n";

    fn write_doc(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::write(&path, format!("{SYNC_HEADER}{body}")).expect("write");
        path
    }

    #[test]
    fn finds_ids_across_documents() {
        let tmp = TempDir::new().unwrap();
        let origin = write_doc(tmp.path(), "origin.md", "- [ ] nothing here\n");
        let target = write_doc(tmp.path(), "target.md", "- [ ] moved task [sync:: m1]\n");
        write_doc(tmp.path(), "other.md", "- [ ] unrelated [sync:: zz]\n");

        let vault = FsVault::new(tmp.path());
        let mut pacer = CountingPacer(0);
        let found = find_documents_with_ids(
            &vault,
            &origin,
            &[TaskId::from("m1"), TaskId::from("gone")],
            &mut pacer,
        )
        .expect("search");

        assert_eq!(found.get(&TaskId::from("m1")), Some(&target));
        assert!(!found.contains_key(&TaskId::from("gone")));
    }

    #[test]
    fn excluded_document_is_not_searched() {
        let tmp = TempDir::new().unwrap();
        let origin = write_doc(tmp.path(), "origin.md", "- [ ] here [sync:: h1]\n");

        let vault = FsVault::new(tmp.path());
        let mut pacer = CountingPacer(0);
        let found =
            find_documents_with_ids(&vault, &origin, &[TaskId::from("h1")], &mut pacer)
                .expect("search");
        assert!(found.is_empty());
    }
}
