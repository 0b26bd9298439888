//! Scan command - lists enabled modules as `[{id, name, mode}]`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{print_json, system_engine};
use modlayer::config::Config;

pub fn cmd_scan(config: &Config, moduledir: Option<PathBuf>) -> Result<()> {
    let mut config = config.clone();
    if let Some(dir) = moduledir {
        config.moduledir = dir;
    }

    let mut engine = system_engine(&config)?;
    let modules = engine
        .summaries()
        .with_context(|| format!("Failed to scan {}", config.moduledir.display()))?;
    print_json(&modules)
}
