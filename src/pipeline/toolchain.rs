//! Transient build toolchain.
//!
//! [`Toolchain`] is a scoped acquisition: packages are installed by
//! [`Toolchain::acquire`] and removed either by [`Toolchain::release`] or, if
//! the guard goes out of scope early (a failed build), by its `Drop`. After
//! removal every package is checked with `rpm -q`; one that is still installed
//! is a toolchain leak and fails the build.

use anyhow::{bail, Context, Result};

use super::package_manager::PackageManager;
use super::ToolBuild;
use crate::snapshot::{argv, Snapshot};

/// Installed build-only packages. Removed when released or dropped.
#[must_use = "dropping the toolchain removes it immediately"]
pub struct Toolchain<'a> {
    snapshot: &'a dyn Snapshot,
    pm: PackageManager,
    packages: Vec<String>,
    released: bool,
}

impl<'a> Toolchain<'a> {
    /// Install `packages` into the snapshot.
    pub fn acquire(
        snapshot: &'a dyn Snapshot,
        pm: &PackageManager,
        packages: &[String],
    ) -> Result<Self> {
        tracing::info!(packages = %packages.join(" "), "acquiring build toolchain");
        snapshot
            .exec(&pm.install_argv(packages))
            .context("installing build toolchain")?;

        // From here on the packages are in the snapshot; the guard owns them.
        let toolchain = Self {
            snapshot,
            pm: pm.clone(),
            packages: packages.to_vec(),
            released: false,
        };
        pm.cleanup(snapshot)?;
        Ok(toolchain)
    }

    /// Remove the toolchain and verify nothing is left behind.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        tracing::info!(packages = %self.packages.join(" "), "releasing build toolchain");
        self.pm
            .remove(self.snapshot, &self.packages)
            .context("removing build toolchain")?;
        verify_absent(self.snapshot, &self.packages)
    }
}

impl Drop for Toolchain<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            packages = %self.packages.join(" "),
            "build failed while toolchain was installed, removing it"
        );
        let removed = self
            .pm
            .remove(self.snapshot, &self.packages)
            .and_then(|_| verify_absent(self.snapshot, &self.packages));
        if let Err(e) = removed {
            tracing::warn!("toolchain may have leaked into {}: {:#}", self.snapshot.id(), e);
        }
    }
}

/// Fail if any of `packages` is still installed.
pub fn verify_absent(snapshot: &dyn Snapshot, packages: &[String]) -> Result<()> {
    let mut leaked = Vec::new();
    for package in packages {
        if snapshot.probe(&argv(["rpm", "-q", package.as_str()]))?.success() {
            leaked.push(package.as_str());
        }
    }
    if !leaked.is_empty() {
        bail!(
            "Build-only packages still installed after removal: {}",
            leaked.join(", ")
        );
    }
    Ok(())
}

/// Install the toolchain, build one tool with it, remove the toolchain.
pub fn build_with_toolchain(
    snapshot: &dyn Snapshot,
    pm: &PackageManager,
    packages: &[String],
    build: &ToolBuild,
) -> Result<()> {
    let toolchain = Toolchain::acquire(snapshot, pm, packages)?;

    tracing::info!(tool = %build.tool, constraints = %build.constraints, "building pinned tool");
    snapshot
        .exec(&build.argv())
        .with_context(|| format!("building {}", build.tool))?;

    toolchain.release()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshot;

    fn toolchain() -> Vec<String> {
        vec!["gcc".to_string(), "python3.11-devel".to_string()]
    }

    fn prepared(snap: &MemorySnapshot) -> PackageManager {
        let pm = PackageManager::dnf();
        pm.install(snap, &["python3.11".to_string(), "python3.11-pip".to_string()])
            .unwrap();
        snap.write_file("/tmp/src/constraints.txt", "dumb-init==1.2.5\n")
            .unwrap();
        pm
    }

    fn build() -> ToolBuild {
        ToolBuild {
            python: "python3.11".into(),
            tool: "dumb-init".into(),
            constraints: "/tmp/src/constraints.txt".into(),
        }
    }

    #[test]
    fn test_build_then_release() {
        let snap = MemorySnapshot::el9();
        let pm = prepared(&snap);

        build_with_toolchain(&snap, &pm, &toolchain(), &build()).unwrap();

        assert_eq!(snap.pip_version("dumb-init").as_deref(), Some("1.2.5"));
        assert!(snap.exists("/usr/local/bin/dumb-init").unwrap());
        assert!(!snap.is_installed("gcc"));
        assert!(!snap.is_installed("python3.11-devel"));
        assert!(snap.is_installed("python3.11"));
    }

    #[test]
    fn test_failed_build_still_removes_toolchain() {
        let snap = MemorySnapshot::el9().fail_when("pip install --no-cache-dir -c");
        let pm = prepared(&snap);

        let err = build_with_toolchain(&snap, &pm, &toolchain(), &build()).unwrap_err();
        assert!(format!("{:#}", err).contains("building dumb-init"));

        assert!(!snap.is_installed("gcc"));
        assert!(!snap.is_installed("python3.11-devel"));
        let log = snap.commands();
        assert!(log.iter().any(|c| c.contains("remove gcc python3.11-devel")));
    }

    #[test]
    fn test_verify_absent_reports_leak() {
        let snap = MemorySnapshot::el9();
        let pm = PackageManager::dnf();
        pm.install(&snap, &["gcc".to_string()]).unwrap();

        let err = verify_absent(&snap, &toolchain()).unwrap_err();
        assert!(err.to_string().contains("gcc"));
        assert!(!err.to_string().contains("python3.11-devel"));
    }

    #[test]
    fn test_failed_acquire_leaves_nothing() {
        let snap = MemorySnapshot::el9();
        let pm = PackageManager::dnf();
        let result = Toolchain::acquire(&snap, &pm, &["gcc".into(), "clang-99".into()]);
        assert!(result.is_err());
        assert!(!snap.is_installed("gcc"));
    }
}
