//! Show commands - run log, diagnostics, configuration.

use anyhow::{Context, Result};

use super::{print_json, system_engine};
use modlayer::config::Config;
use modlayer::logging;

pub fn cmd_logs(config: &Config, lines: usize) -> Result<()> {
    let lines = logging::tail(&config.statedir, lines)?;
    if lines.is_empty() {
        tracing::info!(
            "no run log at {}",
            logging::log_path(&config.statedir).display()
        );
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub fn cmd_diagnose(config: &Config) -> Result<()> {
    let mut engine = system_engine(config)?;
    let diagnostics = engine.diagnostics().context("Failed to analyze modules")?;
    print_json(&diagnostics)
}

pub fn cmd_show_config(config: &Config, json: bool) -> Result<()> {
    if json {
        return print_json(config);
    }
    config.print();
    Ok(())
}
