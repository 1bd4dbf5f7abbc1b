use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FORUM_TUI_LOG";
const DEFAULT_FILTER: &str = "forum_tui=info";

/// Sends tracing output to a log file; the terminal belongs to the UI.
///
/// Returns the log path, or `None` when a global subscriber already exists.
pub fn init(path: Option<PathBuf>) -> Result<Option<PathBuf>> {
    let path = match path.or_else(default_log_path) {
        Some(path) => path,
        None => return Ok(None),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok();

    Ok(installed.then_some(path))
}

pub fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("forum-tui").join("forum-tui.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn installs_once_and_creates_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("forum-tui.log");
        let first = init(Some(path.clone())).unwrap();
        assert!(path.exists());
        if first.is_some() {
            tracing::info!("logging test line");
            assert_eq!(init(Some(path)).unwrap(), None);
        }
    }
}
