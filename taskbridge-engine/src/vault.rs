//! Document source abstraction and its filesystem implementation.
//!
//! A vault is a tree of markdown documents; only documents whose YAML
//! frontmatter carries `tasks-sync: true` participate in sync. Writes are
//! atomic (`.tmp` sibling + rename) so a crash never leaves a half-written
//! document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, EngineError};

/// Boundary contract for everything the engine needs from documents.
pub trait Vault {
    /// Absolute paths of all sync-enabled documents, sorted.
    fn list_documents(&self) -> Result<Vec<PathBuf>, EngineError>;

    fn read(&self, path: &Path) -> Result<String, EngineError>;

    /// Replace a document's content atomically.
    fn write(&self, path: &Path, content: &str) -> Result<(), EngineError>;

    fn modified_at(&self, path: &Path) -> Result<DateTime<Utc>, EngineError>;
}

/// Read a document, treating a missing file as empty. A document can vanish
/// between selection and read; its records then flow through the
/// bidirectional check instead of failing the cycle.
pub fn read_or_empty(vault: &dyn Vault, path: &Path) -> Result<String, EngineError> {
    match vault.read(path) {
        Ok(text) => Ok(text),
        Err(err) if err.is_not_found() => Ok(String::new()),
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Filesystem vault
// ---------------------------------------------------------------------------

/// Frontmatter key that opts a document into sync.
pub const SYNC_MARKER_KEY: &str = "tasks-sync";

/// A vault rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Vault for FsVault {
    fn list_documents(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut documents = Vec::new();
        for dir in collect_dirs(&self.root)? {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&dir, err)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_err(&dir, e))?;
                let path = entry.path();
                if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
                if frontmatter_enables_sync(&text) {
                    documents.push(path);
                }
            }
        }
        documents.sort();
        Ok(documents)
    }

    fn read(&self, path: &Path) -> Result<String, EngineError> {
        std::fs::read_to_string(path).map_err(|e| io_err(path, e))
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), EngineError> {
        let tmp = PathBuf::from(format!("{}.taskbridge.tmp", path.display()));
        std::fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }
        Ok(())
    }

    fn modified_at(&self, path: &Path) -> Result<DateTime<Utc>, EngineError> {
        let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
        let mtime = meta.modified().map_err(|e| io_err(path, e))?;
        Ok(DateTime::<Utc>::from(mtime))
    }
}

/// Iterative directory walk, depth-first, sorted and deduplicated.
fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

/// True when the leading YAML frontmatter block sets `tasks-sync: true`.
pub fn frontmatter_enables_sync(text: &str) -> bool {
    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some("---") {
        return false;
    }
    for line in lines {
        let line = line.trim();
        if line == "---" {
            return false;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim() == SYNC_MARKER_KEY && value.trim() == "true" {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SYNC_HEADER: &str = "---\ntasks-sync: true\n---\n";

    fn write_doc(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, body).expect("write");
        path
    }

    #[test]
    fn lists_only_sync_enabled_markdown() {
        let tmp = TempDir::new().unwrap();
        let enabled = write_doc(tmp.path(), "inbox.md", &format!("{SYNC_HEADER}- [ ] a\n"));
        let nested = write_doc(
            tmp.path(),
            "areas/work.md",
            &format!("{SYNC_HEADER}- [ ] b\n"),
        );
        write_doc(tmp.path(), "plain.md", "no frontmatter\n");
        write_doc(tmp.path(), "off.md", "---\ntasks-sync: false\n---\n");
        write_doc(tmp.path(), "notes.txt", SYNC_HEADER);

        let vault = FsVault::new(tmp.path());
        let docs = vault.list_documents().expect("list");
        assert_eq!(docs, vec![nested, enabled]);
    }

    #[test]
    fn frontmatter_must_open_the_document() {
        assert!(frontmatter_enables_sync("---\ntasks-sync: true\n---\n"));
        assert!(!frontmatter_enables_sync("\n---\ntasks-sync: true\n---\n"));
        assert!(!frontmatter_enables_sync("---\nother: true\n---\ntasks-sync: true\n"));
    }

    #[test]
    fn atomic_write_replaces_content_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = write_doc(tmp.path(), "doc.md", "old\n");
        let vault = FsVault::new(tmp.path());

        vault.write(&path, "new\n").expect("write");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");

        let tmp_path = PathBuf::from(format!("{}.taskbridge.tmp", path.display()));
        assert!(!tmp_path.exists(), "tmp file must be gone after rename");
    }

    #[test]
    fn read_or_empty_swallows_missing_documents() {
        let tmp = TempDir::new().unwrap();
        let vault = FsVault::new(tmp.path());
        let text = read_or_empty(&vault, &tmp.path().join("gone.md")).expect("read");
        assert_eq!(text, "");
    }

    #[test]
    fn modified_at_reflects_filesystem_mtime() {
        let tmp = TempDir::new().unwrap();
        let path = write_doc(tmp.path(), "doc.md", "x\n");
        let vault = FsVault::new(tmp.path());

        let reported = vault.modified_at(&path).expect("mtime");
        let now = Utc::now();
        assert!((now - reported).num_seconds().abs() < 10);
    }
}
