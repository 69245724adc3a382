//! Build caching - hash-based rebuild detection.
//!
//! Uses SHA256 hashes of the build inputs (parameters, plan, source files) to
//! detect actual content changes, not just mtimes. An image is rebuilt when
//! it is missing from the engine or its inputs hash changed.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::pipeline::Step;

/// Hash everything that determines the image content.
///
/// The engine and output locations do not affect image content and are not
/// hashed.
pub fn inputs_hash(config: &Config, steps: &[Step]) -> Result<String> {
    let mut hasher = Sha256::new();

    for (key, value) in [
        ("base_image", config.base_image.as_str()),
        ("dest_dir", config.dest_dir.as_str()),
        ("constraints_file", config.constraints_file.as_str()),
        ("wrapper_tool", config.wrapper_tool.as_str()),
    ] {
        hasher.update(format!("{}={}\n", key, value));
    }

    for step in steps {
        hasher.update(format!("step {} {}\n", step.phase, step.name));
        for op in &step.ops {
            hasher.update(format!("  {}\n", op));
        }
    }

    // Reports land in OUTPUT_DIR, which may sit inside the source directory.
    hash_tree(
        &mut hasher,
        &config.src_dir,
        &[config.output_dir.as_path(), config.cache_dir.as_path()],
    )?;

    if let Some(binary) = &config.pyinit_binary {
        let content = fs::read(binary)
            .with_context(|| format!("reading {} for hashing", binary.display()))?;
        hasher.update(b"pyinit\n");
        hasher.update(&content);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Feed relative paths and contents of every file under `root`, in a
/// stable order, skipping the `exclude` subtrees.
fn hash_tree(hasher: &mut Sha256, root: &Path, exclude: &[&Path]) -> Result<()> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclude.iter().any(|x| e.path() == *x));
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root)?;
        let content = fs::read(entry.path())
            .with_context(|| format!("reading {} for hashing", entry.path().display()))?;
        hasher.update(format!("file {} {}\n", rel.display(), content.len()));
        hasher.update(&content);
    }
    Ok(())
}

/// Read cached hash from a .hash file.
/// Returns None if file doesn't exist.
/// Logs a warning if file exists but can't be read.
pub fn read_cached_hash(hash_file: &Path) -> Option<String> {
    if !hash_file.exists() {
        return None;
    }
    match fs::read_to_string(hash_file) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            tracing::warn!(
                "Failed to read cache hash file {}: {} (will rebuild)",
                hash_file.display(),
                e
            );
            None
        }
    }
}

/// Write hash to a .hash file.
pub fn write_cached_hash(hash_file: &Path, hash: &str) -> Result<()> {
    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(hash_file, hash)?;
    Ok(())
}

/// Check if the image needs a rebuild.
///
/// Returns true if:
/// - the image is not in the engine's store
/// - there is no cached hash (an image of unknown provenance is not trusted)
/// - the inputs hash differs from the cached one
pub fn needs_rebuild(inputs_hash: &str, hash_file: &Path, image_present: bool) -> bool {
    if !image_present {
        return true;
    }
    match read_cached_hash(hash_file) {
        Some(cached) => cached != inputs_hash,
        None => true,
    }
}

/// Remove the cached hash, forcing the next build.
pub fn invalidate(hash_file: &Path) -> Result<bool> {
    if hash_file.exists() {
        fs::remove_file(hash_file)
            .with_context(|| format!("removing {}", hash_file.display()))?;
        return Ok(true);
    }
    Ok(false)
}
