//! On-disk layout of the log directory.
//!
//! ```text
//! $XDG_STATE_HOME/vibelog/logs/          (or $HOME/.local/state/vibelog/logs)
//! ├── <name>.ndjson                      one file per stream
//! └── server.lock                        leadership lock (owning pid)
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Application directory name under the state/cache roots.
pub const APP_DIR: &str = "vibelog";

/// File extension of stream files.
pub const STREAM_EXTENSION: &str = "ndjson";

/// File name of the leadership lock inside the log directory.
pub const LOCK_FILE_NAME: &str = "server.lock";

/// Resolves the log directory from the process environment.
#[must_use]
pub fn log_directory() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| dirs::home_dir().map(PathBuf::into_os_string));
    log_directory_from(
        std::env::var_os("XDG_STATE_HOME").as_deref(),
        home.as_deref(),
    )
}

/// Resolves the log directory from explicit environment values.
///
/// `$XDG_STATE_HOME/vibelog/logs` when set and non-empty, otherwise
/// `$HOME/.local/state/vibelog/logs`, with `/tmp` standing in for a missing home.
#[must_use]
pub fn log_directory_from(xdg_state_home: Option<&OsStr>, home: Option<&OsStr>) -> PathBuf {
    match xdg_state_home.filter(|v| !v.is_empty()) {
        Some(state) => PathBuf::from(state).join(APP_DIR).join("logs"),
        None => PathBuf::from(home.filter(|v| !v.is_empty()).unwrap_or(OsStr::new("/tmp")))
            .join(".local")
            .join("state")
            .join(APP_DIR)
            .join("logs"),
    }
}

/// Path of the leadership lock for a log directory.
#[must_use]
pub fn lock_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOCK_FILE_NAME)
}

/// Path of a stream's backing file.
#[must_use]
pub fn stream_path(log_dir: &Path, name: &str) -> PathBuf {
    log_dir.join(format!("{name}.{STREAM_EXTENSION}"))
}

/// Extracts the stream name from a backing file path, if it is one.
#[must_use]
pub fn stream_name(path: &Path) -> Option<String> {
    if path.extension() != Some(OsStr::new(STREAM_EXTENSION)) {
        return None;
    }
    path.file_stem()
        .and_then(OsStr::to_str)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}
