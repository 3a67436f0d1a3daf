use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn taskbridge_root(home: &Path) -> PathBuf {
    home.join(".taskbridge")
}

pub fn socket_path(home: &Path) -> PathBuf {
    taskbridge_root(home).join(DAEMON_SOCKET)
}
