//! Constraints manifest: one `name==version` pin per line.
//!
//! The manifest is consumed by pip inside the snapshot. It is parsed on the
//! host as well so a missing pin is reported before any container starts.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parsed constraints file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Normalized name -> pinned version.
    pins: BTreeMap<String, String>,
}

impl Constraints {
    /// Parse manifest text.
    ///
    /// Blank lines, comments and pip options (`-r other.txt`, `--hash ...`)
    /// are skipped. Anything else must be an exact `==` pin; environment
    /// markers after `;` are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut pins = BTreeMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('-') {
                continue;
            }
            let requirement = line.split(';').next().unwrap_or("").trim();
            let Some((name, version)) = requirement.split_once("==") else {
                bail!(
                    "line {}: '{}' is not an exact pin (expected name==version)",
                    lineno + 1,
                    raw.trim()
                );
            };
            let name = name.trim();
            // Drop extras: "uvicorn[standard]==0.29.0"
            let name = name.split('[').next().unwrap_or(name).trim();
            let version = version.trim();
            if name.is_empty() || version.is_empty() {
                bail!("line {}: empty name or version in '{}'", lineno + 1, raw.trim());
            }
            pins.insert(normalize_name(name), version.to_string());
        }
        Ok(Self { pins })
    }

    /// Read and parse a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read constraints manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Pinned version for a distribution name.
    pub fn pin(&self, name: &str) -> Option<&str> {
        self.pins.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// PEP 503 name normalization: lowercase, runs of `-`, `_`, `.` become `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}
