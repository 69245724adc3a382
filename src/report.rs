//! Build report written next to the image.
//!
//! The package fingerprint is a hash of the sorted `rpm -qa` list. Two
//! builds from the same inputs and base image produce the same fingerprint.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::image::ImageConfig;
use crate::pipeline::StepTiming;
use crate::preflight::CheckReport;
use crate::snapshot::{argv, Snapshot};

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub image_tag: String,
    pub base_image: String,
    pub engine: String,
    /// Seconds since the Unix epoch.
    pub created: u64,
    pub inputs_hash: String,
    pub image: ImageConfig,
    pub system_python: Option<String>,
    pub packages: Vec<String>,
    pub package_fingerprint: String,
    pub steps: Vec<StepTiming>,
    pub verification: CheckReport,
}

impl BuildReport {
    /// Write as pretty JSON, creating the parent directory.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json + "\n")
            .with_context(|| format!("writing build report {}", path.display()))?;
        Ok(())
    }
}

/// Sorted package list of the snapshot.
pub fn installed_packages(snapshot: &dyn Snapshot) -> Result<Vec<String>> {
    let result = snapshot
        .exec(&argv(["rpm", "-qa"]))
        .context("listing installed packages")?;
    let mut packages: Vec<String> = result
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    packages.sort();
    Ok(packages)
}

/// SHA256 over the sorted package list, one per line.
pub fn fingerprint(packages: &[String]) -> String {
    let mut sorted: Vec<&str> = packages.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for package in sorted {
        hasher.update(package.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
