//! Filesystem snapshots that provisioning steps operate on.
//!
//! A snapshot is the cumulative state of the target filesystem. Steps never
//! talk to a container engine directly; they go through [`Snapshot`], which has
//! two implementations:
//!
//! - [`WorkContainer`]: a running container created from the base image by
//!   `podman`/`docker`. Each call mutates it; [`WorkContainer::commit`]
//!   publishes the final state as an image.
//! - [`MemorySnapshot`]: an in-memory model of a dnf-based distribution that
//!   interprets the same commands. Used by `pyimage plan --dry-run` and tests.

pub mod container;
pub mod memory;

pub use container::{image_exists, inspect_entrypoint, WorkContainer};
pub use memory::MemorySnapshot;

use anyhow::Result;
use std::path::Path;

use crate::process::CommandResult;

/// Target filesystem being provisioned.
pub trait Snapshot {
    /// Identifier for logging (container name, "memory", ...).
    fn id(&self) -> &str;

    /// Run a command inside the snapshot. Fails on non-zero exit.
    fn exec(&self, argv: &[String]) -> Result<CommandResult>;

    /// Run a command inside the snapshot, returning the result whatever the
    /// exit code.
    fn probe(&self, argv: &[String]) -> Result<CommandResult>;

    /// Copy a host file or directory to `dest`. A directory's contents land
    /// directly in `dest`.
    fn copy_in(&self, src: &Path, dest: &str) -> Result<()>;

    /// Read a text file, `None` if it does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>>;

    /// Create or replace a text file.
    fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// `rm -rf` each path. A trailing `*` matches any suffix. Missing paths
    /// are not an error.
    fn remove_paths(&self, paths: &[&str]) -> Result<()>;

    /// Whether a path exists.
    fn exists(&self, path: &str) -> Result<bool>;
}

/// Convert string slices into an owned argv.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}
