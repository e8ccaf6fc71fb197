//! Tracing setup. The terminal belongs to the UI, so events go to a file.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Installs the global subscriber and returns the log file in use.
///
/// `RUST_LOG` takes precedence over `log.level`. Logging is optional: when no
/// file can be opened nothing is installed and `None` is returned. Only the
/// first successful call in a process takes effect.
pub fn init(config: &LogConfig) -> Option<PathBuf> {
    let path = config.file.clone()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok()?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;
    Some(path)
}
