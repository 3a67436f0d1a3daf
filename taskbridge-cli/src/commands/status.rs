//! `taskbridge status` — tracked documents and pending work at a glance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use taskbridge_core::store;

/// Arguments for `taskbridge status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let report = build_report_at(&home).context("failed to load the task store")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct DocumentStatus {
    document: String,
    records: usize,
    pending: usize,
    last_synced_age: String,
}

#[derive(Debug, Clone, Serialize)]
struct StatusReport {
    tracked_records: usize,
    pending_records: usize,
    cursor: String,
    documents: Vec<DocumentStatus>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "document")]
    document: String,
    #[tabled(rename = "records")]
    records: usize,
    #[tabled(rename = "pending")]
    pending: usize,
    #[tabled(rename = "last synced")]
    last_synced: String,
}

fn build_report_at(home: &Path) -> Result<StatusReport> {
    let task_store = store::load_at(home)?;

    let mut per_document: BTreeMap<PathBuf, (usize, usize, Option<DateTime<Utc>>)> =
        BTreeMap::new();
    for record in task_store.records() {
        let entry = per_document
            .entry(record.document.clone())
            .or_insert((0, 0, None));
        entry.0 += 1;
        if record.has_pending() {
            entry.1 += 1;
        }
        entry.2 = Some(match entry.2 {
            Some(existing) => existing.max(record.last_synced_at),
            None => record.last_synced_at,
        });
    }

    let documents = per_document
        .into_iter()
        .map(|(document, (records, pending, last_synced))| DocumentStatus {
            document: document.display().to_string(),
            records,
            pending,
            last_synced_age: last_synced.map(format_age).unwrap_or_else(|| "never".into()),
        })
        .collect::<Vec<_>>();

    let pending_records = task_store.with_pending().len();
    Ok(StatusReport {
        tracked_records: task_store.len(),
        pending_records,
        cursor: task_store.cursor().to_string(),
        documents,
    })
}

fn print_table(report: &StatusReport) {
    println!(
        "taskbridge v{} | {} records | {} pending | cursor {}",
        env!("CARGO_PKG_VERSION"),
        report.tracked_records,
        report.pending_records,
        if report.cursor == "*" {
            "not yet pulled".to_string()
        } else {
            report.cursor.clone()
        },
    );

    if report.documents.is_empty() {
        println!("No tracked documents yet. Run `taskbridge sync` first.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .documents
        .iter()
        .map(|doc| StatusTableRow {
            document: doc.document.clone(),
            records: doc.records,
            pending: doc.pending,
            last_synced: doc.last_synced_age.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.pending_records > 0 {
        println!(
            "{}",
            format!(
                "{} record(s) awaiting resolution — run `taskbridge sync`",
                report.pending_records
            )
            .yellow()
        );
    }
}

/// Compact age like `12s`, `4m`, `3h`, `2d`.
fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskbridge_core::types::{TaskFields, TaskId, TaskRecord};
    use taskbridge_core::TaskStore;
    use tempfile::TempDir;

    #[test]
    fn format_age_is_compact() {
        assert_eq!(format_age(Utc::now()), "0s");
        assert_eq!(format_age(Utc::now() - Duration::seconds(65)), "1m");
        assert_eq!(format_age(Utc::now() - Duration::hours(3)), "3h");
        assert_eq!(format_age(Utc::now() - Duration::days(2)), "2d");
    }

    #[test]
    fn report_groups_records_by_document() {
        let home = TempDir::new().expect("home");
        let mut task_store = TaskStore::new();
        for (id, doc) in [("a", "inbox.md"), ("b", "inbox.md"), ("c", "work.md")] {
            task_store.upsert(TaskRecord {
                id: TaskId::from(id),
                document: PathBuf::from(doc),
                fields: TaskFields::new(id),
                parent: None,
                last_synced_at: Utc::now(),
                pending: vec![],
            });
        }
        store::save_at(home.path(), &task_store).expect("save");

        let report = build_report_at(home.path()).expect("report");
        assert_eq!(report.tracked_records, 3);
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.documents[0].document, "inbox.md");
        assert_eq!(report.documents[0].records, 2);
    }

    #[test]
    fn empty_store_reports_cleanly() {
        let home = TempDir::new().expect("home");
        let report = build_report_at(home.path()).expect("report");
        assert_eq!(report.tracked_records, 0);
        assert!(report.documents.is_empty());
        assert_eq!(report.cursor, "*");
    }
}
