//! Filesystem path conventions (XDG-style, with macOS equivalents).

use std::path::{Path, PathBuf};

const APP_DIR: &str = "krill";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn xdg_or(var: &str, fallback: PathBuf) -> PathBuf {
    match std::env::var_os(var) {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => fallback,
    }
}

/// Durable application data (session database lives here).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library/Application Support").join(APP_DIR)
    }
    #[cfg(not(target_os = "macos"))]
    {
        xdg_or("XDG_DATA_HOME", home_dir().join(".local/share")).join(APP_DIR)
    }
}

/// Configuration files (runtime config JSON lives here).
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library/Application Support").join(APP_DIR)
    }
    #[cfg(not(target_os = "macos"))]
    {
        xdg_or("XDG_CONFIG_HOME", home_dir().join(".config")).join(APP_DIR)
    }
}

/// Disposable caches.
pub fn cache_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library/Caches").join(APP_DIR)
    }
    #[cfg(not(target_os = "macos"))]
    {
        xdg_or("XDG_CACHE_HOME", home_dir().join(".cache")).join(APP_DIR)
    }
}

/// Log files.
pub fn logs_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library/Logs").join(APP_DIR)
    }
    #[cfg(not(target_os = "macos"))]
    {
        xdg_or("XDG_STATE_HOME", home_dir().join(".local/state"))
            .join(APP_DIR)
            .join("logs")
    }
}

/// Sockets and other per-run state.
pub fn runtime_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        cache_dir().join("run")
    }
    #[cfg(not(target_os = "macos"))]
    {
        match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(v) if !v.is_empty() => PathBuf::from(v).join(APP_DIR),
            _ => {
                #[cfg(unix)]
                let suffix = unsafe { libc::getuid() }.to_string();
                #[cfg(not(unix))]
                let suffix = "shared".to_string();
                std::env::temp_dir().join(format!("{APP_DIR}-{suffix}"))
            }
        }
    }
}

/// Create `path` (and parents) if missing, returning the canonical form
/// when canonicalization succeeds.
pub fn ensure_dir(path: &Path) -> PathBuf {
    if let Err(e) = std::fs::create_dir_all(path) {
        log::error!("Failed to create directory {}: {}", path.display(), e);
    }
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
