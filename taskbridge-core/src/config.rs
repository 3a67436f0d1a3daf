//! Sync configuration — YAML file at `<home>/.taskbridge/config.yaml`.
//!
//! Holds everything the engine and daemon consume: vault location, remote
//! endpoint and token, conflict window, retry/backoff policy, batch cap.
//! The self-write suppression window is deliberately a constant, not a
//! setting — see [`SELF_WRITE_WINDOW_SECS`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::ConflictWindow;

/// Local document edits observed within this many seconds of a record's
/// `last_synced_at` are treated as the engine's own write-back and skipped.
pub const SELF_WRITE_WINDOW_SECS: i64 = 5;

/// Hard upper bound on remote batch sizes, imposed by the service.
pub const MAX_BATCH: usize = 100;

/// Everything configurable about a taskbridge installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root of the document vault to scan for sync-enabled markdown files.
    pub vault_root: PathBuf,
    /// Base URL of the remote sync endpoint.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bearer token for the remote service.
    pub api_token: String,
    /// Label attached to every remote task this system manages.
    #[serde(default = "default_sync_label")]
    pub sync_label: String,
    /// Container tasks are moved into when detached to root — the remote API
    /// has no "no parent" value.
    #[serde(default = "default_root_section_id")]
    pub root_section_id: String,
    /// Seconds between automatic daemon cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Signed conflict-resolution window (seconds); sign picks the winner
    /// inside the window (positive → remote).
    #[serde(default = "default_conflict_window_secs")]
    pub conflict_window_secs: i64,
    /// Maximum items per remote batch call, capped at [`MAX_BATCH`].
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// First retry delay after a rate-limit response, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on a single backoff delay, in milliseconds.
    #[serde(default = "default_retry_ceiling_ms")]
    pub retry_ceiling_ms: u64,
    /// Attempts before a rate-limited batch is failed.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

fn default_api_base_url() -> String {
    "https://api.taskdepot.dev/v1".to_string()
}

fn default_sync_label() -> String {
    "vault".to_string()
}

fn default_root_section_id() -> String {
    "inbox".to_string()
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_conflict_window_secs() -> i64 {
    60
}

fn default_batch_limit() -> usize {
    MAX_BATCH
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_ceiling_ms() -> u64 {
    8_000
}

fn default_retry_max_attempts() -> u32 {
    5
}

impl SyncConfig {
    /// A config with defaults for everything but vault and credentials.
    pub fn new(vault_root: PathBuf, api_token: String) -> Self {
        Self {
            vault_root,
            api_base_url: default_api_base_url(),
            api_token,
            sync_label: default_sync_label(),
            root_section_id: default_root_section_id(),
            poll_interval_secs: default_poll_interval_secs(),
            conflict_window_secs: default_conflict_window_secs(),
            batch_limit: default_batch_limit(),
            retry_base_ms: default_retry_base_ms(),
            retry_ceiling_ms: default_retry_ceiling_ms(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }

    pub fn conflict_window(&self) -> ConflictWindow {
        ConflictWindow(self.conflict_window_secs)
    }

    /// Batch limit clamped to the service's hard cap.
    pub fn effective_batch_limit(&self) -> usize {
        self.batch_limit.clamp(1, MAX_BATCH)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// `<home>/.taskbridge/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".taskbridge").join("config.yaml")
}

/// Load the config. Missing file is an error — `taskbridge init` first.
pub fn load_at(home: &Path) -> Result<SyncConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(StoreError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::ConfigParse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, StoreError> {
    load_at(&home()?)
}

/// Save the config atomically with `0600` permissions (it holds the token).
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), StoreError> {
    let path = config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    set_dir_permissions(dir)?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<(), StoreError> {
    save_at(&home()?, config)
}

/// Write a fresh config unless one already exists.
///
/// Idempotent: an existing file is loaded and returned unchanged.
pub fn init_at(home: &Path, config: SyncConfig) -> Result<SyncConfig, StoreError> {
    let path = config_path_at(home);
    if path.exists() {
        return load_at(home);
    }
    save_at(home, &config)?;
    Ok(config)
}

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(vault: &Path) -> SyncConfig {
        SyncConfig::new(vault.to_path_buf(), "secret-token".to_string())
    }

    #[test]
    fn load_missing_config_is_an_error() {
        let home = TempDir::new().unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, StoreError::ConfigNotFound { .. }));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let vault = TempDir::new().unwrap();
        let config = sample(vault.path());

        save_at(home.path(), &config).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().unwrap();
        let vault = TempDir::new().unwrap();

        let first = init_at(home.path(), sample(vault.path())).expect("first init");
        let mut second_input = sample(vault.path());
        second_input.conflict_window_secs = -120;
        let second = init_at(home.path(), second_input).expect("second init");
        assert_eq!(second, first, "existing config must win");
    }

    #[test]
    fn defaults_fill_missing_yaml_keys() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "vault_root: /vault\napi_token: tok\n",
        )
        .unwrap();

        let config = load_at(home.path()).expect("load");
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.conflict_window_secs, 60);
        assert_eq!(config.batch_limit, MAX_BATCH);
        assert_eq!(config.retry_max_attempts, 5);
    }

    #[test]
    fn batch_limit_is_clamped_to_service_cap() {
        let vault = TempDir::new().unwrap();
        let mut config = sample(vault.path());
        config.batch_limit = 5_000;
        assert_eq!(config.effective_batch_limit(), MAX_BATCH);
        config.batch_limit = 0;
        assert_eq!(config.effective_batch_limit(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().unwrap();
        let vault = TempDir::new().unwrap();
        save_at(home.path(), &sample(vault.path())).expect("save");

        let mode = std::fs::metadata(config_path_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
