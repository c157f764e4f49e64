//! Logging setup and build info.
//!
//! Console plus a daily rolling file under `<data_dir>/logs`. Old files past
//! [`MAX_LOG_FILES`] are pruned before the appender opens a new one.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const LOG_PREFIX: &str = "pos";
const DEFAULT_FILTER: &str = "info,pos_bridge_lib=debug";

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Install the global subscriber. Keep the returned guard alive until exit;
/// dropping it flushes the file writer.
pub fn init(data_dir: &Path) -> std::io::Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let dir = log_dir(data_dir);
    fs::create_dir_all(&dir)?;
    prune_old_logs(&dir);

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Keep the newest [`MAX_LOG_FILES`] `pos.*` files in `dir`.
pub fn prune_old_logs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("pos.") || name == "pos.log")
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

/// Version, build timestamp, git SHA and platform.
pub fn about() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}
