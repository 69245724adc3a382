//! Clean command - removes build state.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use pyimage::cache;
use pyimage::config::Config;
use pyimage::process::Cmd;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Report, cached hash and leftover working container (default)
    Outputs,
    /// Outputs plus the image itself
    Image,
    /// Whole output and cache directories
    All,
}

/// Execute the clean command.
pub fn cmd_clean(target: CleanTarget, config: &Config) -> Result<()> {
    match target {
        CleanTarget::Outputs => clean_outputs(config)?,
        CleanTarget::Image => {
            clean_outputs(config)?;
            clean_image(config)?;
        }
        CleanTarget::All => {
            clean_outputs(config)?;
            remove_dir(&config.output_dir)?;
            remove_dir(&config.cache_dir)?;
        }
    }
    Ok(())
}

fn clean_outputs(config: &Config) -> Result<()> {
    let report = config.report_path();
    if report.exists() {
        println!("Removing {}...", report.display());
        fs::remove_file(&report).with_context(|| format!("removing {}", report.display()))?;
    }
    if cache::invalidate(&config.hash_file())? {
        println!("Removed cached inputs hash for {}", config.image_tag);
    }

    // A container kept by KEEP_FAILED_CONTAINER or an interrupted build.
    let removed = Cmd::new(&config.engine)
        .args(["rm", "-f", config.container_name().as_str()])
        .allow_fail()
        .run()?;
    if removed.success() && !removed.stdout_trimmed().is_empty() {
        println!("Removed working container {}", config.container_name());
    }
    Ok(())
}

fn clean_image(config: &Config) -> Result<()> {
    let result = Cmd::new(&config.engine)
        .args(["rmi", config.image_tag.as_str()])
        .allow_fail()
        .run()?;
    if result.success() {
        println!("Removed image {}", config.image_tag);
    } else {
        println!("Image {} not present", config.image_tag);
    }
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        println!("Removing {}...", dir.display());
        fs::remove_dir_all(dir).with_context(|| format!("removing {}", dir.display()))?;
    }
    Ok(())
}
