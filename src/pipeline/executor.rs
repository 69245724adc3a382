//! Step executor - interprets `Op` variants against a snapshot.
//!
//! This is the single place where provisioning operations are implemented.

use anyhow::{bail, Context, Result};

use super::package_manager::{set_conf_option, PackageManager};
use super::{is_under, toolchain, Op, Step};
use crate::image::ImageConfig;
use crate::snapshot::{argv, Snapshot};

/// State carried from one step to the next.
pub struct BuildState<'a> {
    pub snapshot: &'a dyn Snapshot,
    /// Package manager settings applied so far.
    pub pm: PackageManager,
    /// Runtime config accumulated for the commit.
    pub image: ImageConfig,
    /// Paths removed by earlier steps.
    discarded: Vec<String>,
}

impl<'a> BuildState<'a> {
    pub fn new(snapshot: &'a dyn Snapshot) -> Self {
        Self {
            snapshot,
            pm: PackageManager::dnf(),
            image: ImageConfig::default(),
            discarded: Vec::new(),
        }
    }

    pub fn discarded(&self) -> &[String] {
        &self.discarded
    }
}

/// Execute all operations of a step.
pub fn execute(state: &mut BuildState<'_>, step: &Step) -> Result<()> {
    tracing::info!(step = step.name, phase = %step.phase, "running step");

    for op in &step.ops {
        tracing::debug!(step = step.name, %op, "op");
        execute_op(state, op).with_context(|| format!("in step '{}': {}", step.name, op))?;
    }

    Ok(())
}

/// Execute a single operation.
fn execute_op(state: &mut BuildState<'_>, op: &Op) -> Result<()> {
    for read in op.reads() {
        if let Some(dir) = state.discarded.iter().find(|d| is_under(read, d)) {
            bail!("{} was already removed with {}", read, dir);
        }
    }

    let snapshot = state.snapshot;
    match op {
        Op::CopySource { from, to } => {
            if !from.is_dir() {
                bail!("Source directory {} does not exist", from.display());
            }
            // The copy is discarded later, so it must not share a directory
            // with base image content.
            if snapshot.exists(to)? {
                bail!(
                    "{} already exists in the base image; choose an unused DEST_DIR",
                    to
                );
            }
            snapshot.copy_in(from, to)?;
        }

        Op::SetOption { key, value } => {
            state.pm.apply(key, value);
            let conf_path = state.pm.conf_path.clone();
            let current = snapshot.read_file(&conf_path)?.unwrap_or_default();
            snapshot.write_file(&conf_path, &set_conf_option(&current, key, value))?;
        }

        Op::Install(packages) => {
            state.pm.install(snapshot, packages)?;
        }

        Op::Remove(packages) => {
            state.pm.remove(snapshot, packages)?;
        }

        Op::PipUpgrade { python, package } => {
            snapshot.exec(&argv([
                python.as_str(),
                "-m",
                "pip",
                "install",
                "--no-cache-dir",
                "--upgrade",
                package.as_str(),
            ]))?;
        }

        Op::WithToolchain { packages, build } => {
            toolchain::build_with_toolchain(snapshot, &state.pm, packages, build)?;
        }

        Op::RemovePath(path) => {
            snapshot.remove_paths(&[path.as_str()])?;
            if snapshot.exists(path)? {
                bail!("{} still exists after removal", path);
            }
            state.discarded.push(path.clone());
        }

        Op::CopyHostFile { from, to, mode } => {
            if !from.is_file() {
                bail!("{} not found", from.display());
            }
            snapshot.copy_in(from, to)?;
            let mode = format!("{:o}", mode);
            snapshot.exec(&argv(["chmod", mode.as_str(), to.as_str()]))?;
        }

        Op::Entrypoint(entrypoint) => {
            let Some(program) = entrypoint.first() else {
                bail!("Entrypoint is empty");
            };
            if !snapshot.exists(program)? {
                bail!("Entrypoint {} does not exist in the snapshot", program);
            }
            let mut image = ImageConfig::new(entrypoint.clone());
            image.labels = std::mem::take(&mut state.image.labels);
            state.image = image;
        }
    }

    Ok(())
}
