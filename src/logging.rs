//! Tracing setup: human output on stderr, plain copy in `<statedir>/run.log`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::defs::RUN_LOG_FILE;

pub fn log_path(statedir: &Path) -> PathBuf {
    statedir.join(RUN_LOG_FILE)
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// If the run log can't be opened, logging continues on stderr only.
pub fn init(statedir: &Path, verbose: bool) {
    let path = log_path(statedir);
    let file = fs::create_dir_all(statedir)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&path));

    let (file_layer, open_error) = match file {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    let installed = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        // Already set (tests, or a second init in one process).
        return;
    }

    match open_error {
        None => tracing::debug!(path = %path.display(), "logging initialized"),
        Some(e) => tracing::warn!("cannot open run log {}: {e}", path.display()),
    }
}

/// The last `lines` lines of the run log. Empty if there is no log yet.
pub fn tail(statedir: &Path, lines: usize) -> Result<Vec<String>> {
    let path = log_path(statedir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|l| l.to_string()).collect())
}
