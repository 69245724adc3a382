//! Build parameters.
//!
//! Resolved once before the pipeline starts, in increasing precedence:
//! built-in defaults, `.env` file (loaded by `main` via dotenvy), environment
//! variables, command-line flags. The resulting [`Config`] is never mutated.

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::manifest::Constraints;

/// Rocky Linux 9: dnf-based, ships python3.9 as the system interpreter and
/// python3.11 in AppStream.
pub const DEFAULT_BASE_IMAGE: &str = "quay.io/rockylinux/rockylinux:9";
pub const DEFAULT_SRC_DIR: &str = ".";
pub const DEFAULT_DEST_DIR: &str = "/tmp/src";
pub const DEFAULT_IMAGE_TAG: &str = "localhost/python311:latest";
pub const DEFAULT_ENGINE: &str = "podman";
pub const DEFAULT_CONSTRAINTS_FILE: &str = "constraints.txt";
pub const DEFAULT_WRAPPER_TOOL: &str = "dumb-init";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Top-level directories of the base filesystem. DEST_DIR is deleted after
/// the build, so it can never be one of these.
const SYSTEM_DIRS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/media", "/mnt", "/opt",
    "/proc", "/root", "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/usr/bin",
    "/usr/lib", "/usr/local", "/usr/local/bin", "/usr/share", "/var", "/var/tmp",
];

/// Command-line overrides. `None` keeps the environment/default value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_image: Option<String>,
    pub src_dir: Option<PathBuf>,
    pub dest_dir: Option<String>,
    pub image_tag: Option<String>,
    pub engine: Option<String>,
    pub pyinit_binary: Option<PathBuf>,
    pub keep_failed: bool,
}

/// Resolved build parameters.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Image the working container starts from.
    pub base_image: String,
    /// Host directory copied into the snapshot.
    pub src_dir: PathBuf,
    /// Where the source copy lives inside the snapshot until discarded.
    pub dest_dir: String,
    /// Tag of the committed image.
    pub image_tag: String,
    /// `podman` or `docker`.
    pub engine: String,
    /// Constraints manifest file name inside `src_dir`.
    pub constraints_file: String,
    /// Pinned tool built with the transient toolchain; also the default
    /// entrypoint wrapper.
    pub wrapper_tool: String,
    /// Host `pyinit` binary. When set it replaces the pinned tool as entrypoint.
    pub pyinit_binary: Option<PathBuf>,
    /// Build reports are written here.
    pub output_dir: PathBuf,
    /// Input hashes for rebuild detection.
    pub cache_dir: PathBuf,
    /// Keep the working container when the build fails.
    pub keep_failed: bool,
}

impl Config {
    /// Load from the process environment.
    pub fn load(base_dir: &Path) -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars, base_dir)
    }

    /// Build from an explicit variable map. Relative paths are resolved
    /// against `base_dir`.
    pub fn from_vars(vars: &HashMap<String, String>, base_dir: &Path) -> Self {
        let get = |key: &str, default: &str| -> String {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        let path = |key: &str, default: &str| -> PathBuf { resolve(base_dir, &get(key, default)) };

        let cache_dir = match vars.get("PYIMAGE_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            Some(dir) => resolve(base_dir, dir.trim()),
            None => dirs::cache_dir()
                .unwrap_or_else(|| base_dir.join(".cache"))
                .join("pyimage"),
        };

        Self {
            base_image: get("BASE_IMAGE", DEFAULT_BASE_IMAGE),
            src_dir: path("SRC_DIR", DEFAULT_SRC_DIR),
            dest_dir: get("DEST_DIR", DEFAULT_DEST_DIR),
            image_tag: get("IMAGE_TAG", DEFAULT_IMAGE_TAG),
            engine: get("CONTAINER_ENGINE", DEFAULT_ENGINE),
            constraints_file: get("CONSTRAINTS_FILE", DEFAULT_CONSTRAINTS_FILE),
            wrapper_tool: get("WRAPPER_TOOL", DEFAULT_WRAPPER_TOOL),
            pyinit_binary: vars
                .get("PYINIT_BINARY")
                .filter(|v| !v.trim().is_empty())
                .map(|v| resolve(base_dir, v.trim())),
            output_dir: path("OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
            cache_dir,
            keep_failed: vars
                .get("KEEP_FAILED_CONTAINER")
                .is_some_and(|v| is_truthy(v)),
        }
    }

    /// Apply command-line flags.
    pub fn with_overrides(mut self, overrides: Overrides, base_dir: &Path) -> Self {
        if let Some(base_image) = overrides.base_image {
            self.base_image = base_image;
        }
        if let Some(src_dir) = overrides.src_dir {
            self.src_dir = resolve(base_dir, &src_dir.to_string_lossy());
        }
        if let Some(dest_dir) = overrides.dest_dir {
            self.dest_dir = dest_dir;
        }
        if let Some(image_tag) = overrides.image_tag {
            self.image_tag = image_tag;
        }
        if let Some(engine) = overrides.engine {
            self.engine = engine;
        }
        if let Some(pyinit_binary) = overrides.pyinit_binary {
            self.pyinit_binary = Some(resolve(base_dir, &pyinit_binary.to_string_lossy()));
        }
        self.keep_failed |= overrides.keep_failed;
        self
    }

    /// Reject parameters that cannot produce an image. Run before any
    /// container is created.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_reference(&self.base_image) {
            bail!("Invalid base image reference '{}'", self.base_image);
        }
        if !is_valid_reference(&self.image_tag) {
            bail!("Invalid image tag '{}'", self.image_tag);
        }
        if self.engine.trim().is_empty() {
            bail!("CONTAINER_ENGINE is empty");
        }

        let dest = self.dest_dir.trim_end_matches('/');
        if !self.dest_dir.starts_with('/') || dest.is_empty() {
            bail!(
                "DEST_DIR must be an absolute path below /, got '{}'",
                self.dest_dir
            );
        }
        if SYSTEM_DIRS.contains(&dest) {
            bail!(
                "DEST_DIR is removed after the build and must not be a system directory, got '{}'",
                self.dest_dir
            );
        }
        if self.dest_dir.contains(char::is_whitespace) || self.dest_dir.contains('*') {
            bail!("DEST_DIR must not contain whitespace or globs: '{}'", self.dest_dir);
        }
        if self.constraints_file.is_empty() || self.constraints_file.contains('/') {
            bail!(
                "CONSTRAINTS_FILE must be a file name inside SRC_DIR, got '{}'",
                self.constraints_file
            );
        }
        if !is_valid_tool_name(&self.wrapper_tool) {
            bail!("Invalid WRAPPER_TOOL '{}'", self.wrapper_tool);
        }

        if !self.src_dir.is_dir() {
            bail!("Source directory {} does not exist", self.src_dir.display());
        }
        let constraints = Constraints::load(&self.constraints_path())?;
        if constraints.pin(&self.wrapper_tool).is_none() {
            bail!(
                "{} does not pin {} (expected a line like '{}==<version>')",
                self.constraints_path().display(),
                self.wrapper_tool,
                self.wrapper_tool
            );
        }
        if let Some(binary) = &self.pyinit_binary {
            if !binary.is_file() {
                bail!("PYINIT_BINARY {} not found", binary.display());
            }
        }
        Ok(())
    }

    /// Host path of the constraints manifest.
    pub fn constraints_path(&self) -> PathBuf {
        self.src_dir.join(&self.constraints_file)
    }

    /// In-snapshot path of the constraints manifest.
    pub fn constraints_in_snapshot(&self) -> String {
        format!("{}/{}", self.dest_dir.trim_end_matches('/'), self.constraints_file)
    }

    /// Source copy directory inside the snapshot, without trailing slash.
    pub fn dest_dir_normalized(&self) -> String {
        self.dest_dir.trim_end_matches('/').to_string()
    }

    /// Name of the working container for this tag.
    pub fn container_name(&self) -> String {
        format!("pyimage-build-{}", sanitize(&self.image_tag))
    }

    /// Input hash file for this tag.
    pub fn hash_file(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.hash", sanitize(&self.image_tag)))
    }

    /// Build report path for this tag.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.report.json", sanitize(&self.image_tag)))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  BASE_IMAGE: {}", self.base_image);
        println!("  SRC_DIR: {}", self.src_dir.display());
        println!("  DEST_DIR: {}", self.dest_dir);
        println!("  IMAGE_TAG: {}", self.image_tag);
        println!("  CONTAINER_ENGINE: {}", self.engine);
        println!("  CONSTRAINTS_FILE: {}", self.constraints_file);
        println!("  WRAPPER_TOOL: {}", self.wrapper_tool);
        match &self.pyinit_binary {
            Some(path) => println!("  PYINIT_BINARY: {}", path.display()),
            None => println!("  PYINIT_BINARY: (unset, entrypoint is {})", self.wrapper_tool),
        }
        println!("  OUTPUT_DIR: {}", self.output_dir.display());
        println!("  PYIMAGE_CACHE_DIR: {}", self.cache_dir.display());
        println!("  KEEP_FAILED_CONTAINER: {}", self.keep_failed);
        if self.constraints_path().exists() {
            println!("  Constraints manifest: FOUND");
        } else {
            println!("  Constraints manifest: NOT FOUND ({})", self.constraints_path().display());
        }
    }
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else if value == "." {
        base_dir.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Replace anything outside `[A-Za-z0-9_.-]` so a tag can be used in file
/// and container names.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // [registry[:port]/]path[:tag][@digest]
        let component = r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*";
        let pattern = format!(
            r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?/)?{c}(?:/{c})*(?::[\w][\w.-]{{0,127}})?(?:@sha256:[a-f0-9]{{64}})?$",
            c = component
        );
        Regex::new(&pattern).expect("reference pattern is valid")
    })
}

/// Whether `reference` is a syntactically valid image reference.
pub fn is_valid_reference(reference: &str) -> bool {
    !reference.is_empty() && reference.len() <= 255 && reference_regex().is_match(reference)
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
