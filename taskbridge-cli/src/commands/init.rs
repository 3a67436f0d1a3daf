//! `taskbridge init` — scaffold the configuration file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use taskbridge_core::config;
use taskbridge_core::SyncConfig;

/// Arguments for `taskbridge init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Root directory of the markdown vault.
    #[arg(long)]
    pub vault: PathBuf,

    /// API token for the remote task service.
    #[arg(long)]
    pub token: String,

    /// Base URL of the remote sync endpoint.
    #[arg(long)]
    pub api_url: Option<String>,

    /// Signed conflict window in seconds (positive → remote wins ties).
    #[arg(long)]
    pub window: Option<i64>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let vault = self
            .vault
            .canonicalize()
            .with_context(|| format!("vault directory not found: {}", self.vault.display()))?;

        let mut config = SyncConfig::new(vault, self.token);
        if let Some(api_url) = self.api_url {
            config.api_base_url = api_url;
        }
        if let Some(window) = self.window {
            config.conflict_window_secs = window;
        }

        let saved = config::init_at(&home, config).context("failed to write configuration")?;
        println!(
            "✓ configured: vault {} → {}",
            saved.vault_root.display(),
            saved.api_base_url
        );
        println!("  {}", config::config_path_at(&home).display());
        println!("  mark documents with `tasks-sync: true` frontmatter to enable sync");
        Ok(())
    }
}
