//! `taskbridge sync` — run one cycle in-process and print the report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use taskbridge_core::config;
use taskbridge_engine::{sync_once, CycleReport, FsVault, NoopPacer};
use taskbridge_remote::HttpRemote;

/// Arguments for `taskbridge sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit machine-readable JSON instead of the summary line.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let cfg = config::load_at(&home).context("failed to load configuration")?;

        let vault = FsVault::new(cfg.vault_root.clone());
        let mut remote = HttpRemote::new(&cfg);
        let mut pacer = NoopPacer;

        // A manual sync examines every document, not just recently modified
        // ones.
        let report = sync_once(&home, &cfg, &vault, &mut remote, &mut pacer, None)
            .context("sync cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
            return Ok(());
        }

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    println!(
        "✓ {} document(s) in {}ms — {} created, {} pushed, {} written back, \
         {} deleted remotely, {} deleted locally",
        report.documents,
        report.duration_ms,
        report.created,
        report.pushed,
        report.written_back,
        report.deleted_remote,
        report.deleted_local,
    );
    if report.ghosts > 0 {
        println!("  cleaned up {} ghost task(s)", report.ghosts);
    }
    for anomaly in &report.anomalies {
        println!("  ~ {anomaly}");
    }
    for error in &report.errors {
        println!("  ✗ {error}");
    }
}
