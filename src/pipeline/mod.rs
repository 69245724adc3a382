//! Declarative provisioning pipeline.
//!
//! The image is described as an ordered list of [`Step`]s, each made of
//! [`Op`]s. Definitions say WHAT happens; the executor decides HOW.
//!
//! ```text
//! Step Definition (DATA)              →     Executor (LOGIC)
//! ──────────────────────────────            ─────────────────
//! Step {                                    for op in step.ops {
//!   phase: Toolchain,                         execute_op(state, op)?;
//!   ops: [WithToolchain {                   }
//!     packages: [gcc, python3.11-devel],
//!     build: dumb-init,
//!   }],
//! }
//! ```
//!
//! The state machine is linear: every plan contains each [`Phase`] exactly
//! once, in ascending order. Any failure aborts the whole pipeline.

pub mod builder;
pub mod definitions;
pub mod executor;
pub mod package_manager;
pub mod toolchain;

pub use builder::{run_plan, Outcome, StepTiming};
pub use definitions::plan;
pub use package_manager::PackageManager;

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Position of a step in the build sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Phase {
    /// Copy the source directory into the snapshot.
    Stage = 0,
    /// Package manager options (no docs, no weak deps).
    Configure = 1,
    /// Versioned interpreter, its pip and the locale.
    InstallBase = 2,
    /// Upgrade pip for the versioned interpreter.
    UpgradeInstaller = 3,
    /// Install compiler, build the pinned tool, remove compiler.
    Toolchain = 4,
    /// Remove the build-time source copy.
    DiscardSource = 5,
    /// Runtime entrypoint.
    Entrypoint = 6,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Stage,
        Phase::Configure,
        Phase::InstallBase,
        Phase::UpgradeInstaller,
        Phase::Toolchain,
        Phase::DiscardSource,
        Phase::Entrypoint,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Stage => "stage",
            Phase::Configure => "configure",
            Phase::InstallBase => "install-base",
            Phase::UpgradeInstaller => "upgrade-installer",
            Phase::Toolchain => "toolchain",
            Phase::DiscardSource => "discard-source",
            Phase::Entrypoint => "entrypoint",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One provisioning step. Exists only as a position in the plan.
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable name for logging.
    pub name: &'static str,
    pub phase: Phase,
    pub ops: Vec<Op>,
}

/// Operations a step can perform.
///
/// Package installs and removals are always followed by a cache cleanup; that
/// is done by the executor, not listed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Copy a host directory into the snapshot.
    CopySource { from: PathBuf, to: String },

    /// Set a package manager option and persist it in its config file.
    SetOption { key: String, value: String },

    /// Install packages.
    Install(Vec<String>),

    /// Remove packages.
    Remove(Vec<String>),

    /// `<python> -m pip install --upgrade <package>`.
    PipUpgrade { python: String, package: String },

    /// Install `packages`, run `build`, remove `packages`.
    WithToolchain {
        packages: Vec<String>,
        build: ToolBuild,
    },

    /// Delete a path from the snapshot.
    RemovePath(String),

    /// Copy a single host file into the snapshot with a mode.
    CopyHostFile {
        from: PathBuf,
        to: String,
        mode: u32,
    },

    /// Default process of the final image.
    Entrypoint(Vec<String>),
}

/// A pip build of one pinned tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBuild {
    /// Versioned interpreter, e.g. `python3.11`.
    pub python: String,
    /// Distribution name, e.g. `dumb-init`.
    pub tool: String,
    /// In-snapshot path of the constraints manifest.
    pub constraints: String,
}

impl ToolBuild {
    /// Command run inside the snapshot.
    pub fn argv(&self) -> Vec<String> {
        crate::snapshot::argv([
            self.python.as_str(),
            "-m",
            "pip",
            "install",
            "--no-cache-dir",
            "-c",
            self.constraints.as_str(),
            self.tool.as_str(),
        ])
    }
}

impl Op {
    /// Snapshot paths this operation reads.
    pub fn reads(&self) -> Vec<&str> {
        match self {
            Op::WithToolchain { build, .. } => vec![build.constraints.as_str()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::CopySource { from, to } => write!(f, "copy {} -> {}", from.display(), to),
            Op::SetOption { key, value } => write!(f, "set {}={}", key, value),
            Op::Install(pkgs) => write!(f, "install {}", pkgs.join(" ")),
            Op::Remove(pkgs) => write!(f, "remove {}", pkgs.join(" ")),
            Op::PipUpgrade { python, package } => {
                write!(f, "{} -m pip install --upgrade {}", python, package)
            }
            Op::WithToolchain { packages, build } => write!(
                f,
                "with [{}]: build {} (constraints {})",
                packages.join(" "),
                build.tool,
                build.constraints
            ),
            Op::RemovePath(path) => write!(f, "remove {}", path),
            Op::CopyHostFile { from, to, mode } => {
                write!(f, "copy {} -> {} (mode {:o})", from.display(), to, mode)
            }
            Op::Entrypoint(argv) => write!(f, "entrypoint {:?}", argv),
        }
    }
}

/// Whether `path` is `dir` or lies underneath it.
pub fn is_under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path == dir || path.starts_with(&format!("{}/", dir))
}

/// Check the structural invariants of a plan.
///
/// - every phase appears exactly once, in ascending order
/// - nothing reads a path after it was removed
/// - the entrypoint is set exactly once
pub fn validate(steps: &[Step]) -> Result<()> {
    let phases: Vec<Phase> = steps.iter().map(|s| s.phase).collect();
    if phases != Phase::ALL {
        bail!(
            "Plan phases must be {:?} in order, got {:?}",
            Phase::ALL.map(|p| p.label()),
            phases.iter().map(|p| p.label()).collect::<Vec<_>>()
        );
    }

    let mut removed: Vec<&str> = Vec::new();
    let mut entrypoints = 0;
    for step in steps {
        for op in &step.ops {
            for read in op.reads() {
                if let Some(dir) = removed.iter().find(|dir| is_under(read, dir)) {
                    bail!(
                        "Step '{}' reads {} after {} was removed",
                        step.name,
                        read,
                        dir
                    );
                }
            }
            match op {
                Op::RemovePath(path) => removed.push(path),
                Op::Entrypoint(_) => entrypoints += 1,
                _ => {}
            }
        }
    }

    if entrypoints != 1 {
        bail!("Plan must set the entrypoint exactly once, found {}", entrypoints);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &'static str, phase: Phase, ops: Vec<Op>) -> Step {
        Step { name, phase, ops }
    }

    fn build() -> ToolBuild {
        ToolBuild {
            python: "python3.11".into(),
            tool: "dumb-init".into(),
            constraints: "/tmp/src/constraints.txt".into(),
        }
    }

    fn valid_plan() -> Vec<Step> {
        vec![
            step("source", Phase::Stage, vec![]),
            step("package-manager", Phase::Configure, vec![]),
            step("python", Phase::InstallBase, vec![]),
            step("pip", Phase::UpgradeInstaller, vec![]),
            step(
                "tool",
                Phase::Toolchain,
                vec![Op::WithToolchain {
                    packages: vec!["gcc".into()],
                    build: build(),
                }],
            ),
            step(
                "discard",
                Phase::DiscardSource,
                vec![Op::RemovePath("/tmp/src".into())],
            ),
            step(
                "entrypoint",
                Phase::Entrypoint,
                vec![Op::Entrypoint(vec!["/usr/local/bin/dumb-init".into()])],
            ),
        ]
    }

    #[test]
    fn test_valid_plan_passes() {
        validate(&valid_plan()).unwrap();
    }

    #[test]
    fn test_reordered_phases_rejected() {
        let mut plan = valid_plan();
        plan.swap(2, 3);
        let err = validate(&plan).unwrap_err();
        assert!(err.to_string().contains("in order"));
    }

    #[test]
    fn test_skipped_phase_rejected() {
        let mut plan = valid_plan();
        plan.remove(3);
        assert!(validate(&plan).is_err());
    }

    #[test]
    fn test_read_after_discard_rejected() {
        let mut plan = valid_plan();
        plan[1].ops.push(Op::RemovePath("/tmp/src/".into()));
        let err = validate(&plan).unwrap_err();
        assert!(err.to_string().contains("reads /tmp/src/constraints.txt"));
    }

    #[test]
    fn test_entrypoint_required_once() {
        let mut plan = valid_plan();
        plan[6].ops.clear();
        assert!(validate(&plan).is_err());
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("/tmp/src/constraints.txt", "/tmp/src"));
        assert!(is_under("/tmp/src", "/tmp/src/"));
        assert!(!is_under("/tmp/srcfoo", "/tmp/src"));
    }

    #[test]
    fn test_tool_build_argv_uses_versioned_python() {
        let argv = build().argv();
        assert_eq!(argv[0], "python3.11");
        assert_eq!(argv[argv.len() - 1], "dumb-init");
        assert!(argv.windows(2).any(|w| w[0] == "-c" && w[1] == "/tmp/src/constraints.txt"));
    }
}
