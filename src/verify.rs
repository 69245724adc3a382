//! Post-build verification of a snapshot.
//!
//! Runs after the last step and before commit, and against an existing image
//! with `pyimage verify`. Every check inspects the filesystem or runs a
//! command inside it; nothing is inferred from the plan.

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::Config;
use crate::pipeline::definitions::{self, BASE_RUNTIME, PYTHON};
use crate::preflight::{CheckReport, CheckResult};
use crate::snapshot::{argv, Snapshot};

/// What a finished image must look like.
#[derive(Debug, Clone)]
pub struct Expectations {
    /// Packages that must not be installed.
    pub toolchain: Vec<String>,
    /// Build-time source copy that must be gone.
    pub source_dir: String,
    /// Versioned interpreter and the `major.minor` it must report.
    pub python: String,
    pub python_series: (u32, u32),
    /// `python3 --version` recorded before the build, if known.
    pub system_python: Option<String>,
    /// Expected entrypoint.
    pub entrypoint: Vec<String>,
}

impl Expectations {
    pub fn for_config(config: &Config, system_python: Option<String>) -> Self {
        Self {
            toolchain: definitions::toolchain_packages(),
            source_dir: config.dest_dir_normalized(),
            python: PYTHON.to_string(),
            python_series: (3, 11),
            system_python,
            entrypoint: definitions::entrypoint(config),
        }
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Python (\d+)\.(\d+)\.(\d+)").expect("version pattern is valid"))
}

/// Parse `Python X.Y.Z` into its components.
pub fn parse_python_version(text: &str) -> Option<(u32, u32, u32)> {
    let caps = version_regex().captures(text)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Run all checks against `snapshot`.
pub fn verify_snapshot(snapshot: &dyn Snapshot, expect: &Expectations) -> Result<CheckReport> {
    let mut checks = Vec::new();

    for package in &expect.toolchain {
        let name = format!("{} removed", package);
        let query = snapshot.probe(&argv(["rpm", "-q", package.as_str()]))?;
        if query.success() {
            checks.push(CheckResult::fail(
                &name,
                &format!("still installed ({})", query.stdout_trimmed()),
            ));
        } else {
            checks.push(CheckResult::pass(&name));
        }
    }

    if snapshot.exists(&expect.source_dir)? {
        checks.push(CheckResult::fail(
            "source discarded",
            &format!("{} still present", expect.source_dir),
        ));
    } else {
        checks.push(CheckResult::pass_with("source discarded", &expect.source_dir));
    }

    checks.push(check_versioned_python(snapshot, expect)?);
    checks.push(check_system_python(snapshot, expect)?);
    checks.push(check_entrypoint(snapshot, expect)?);

    if snapshot.exists("/var/cache/dnf")? {
        checks.push(CheckResult::fail(
            "package cache",
            "/var/cache/dnf left in the image",
        ));
    } else {
        checks.push(CheckResult::pass("package cache"));
    }

    let documented: Vec<&str> = {
        let mut found = Vec::new();
        for package in BASE_RUNTIME {
            if snapshot.exists(&format!("/usr/share/doc/{}", package))? {
                found.push(*package);
            }
        }
        found
    };
    if documented.is_empty() {
        checks.push(CheckResult::pass("no runtime docs"));
    } else {
        checks.push(CheckResult::warn(
            "no runtime docs",
            &format!("documentation installed for {}", documented.join(", ")),
        ));
    }

    Ok(CheckReport { checks })
}

fn check_versioned_python(snapshot: &dyn Snapshot, expect: &Expectations) -> Result<CheckResult> {
    let name = format!("{} version", expect.python);
    let result = snapshot.probe(&argv([expect.python.as_str(), "--version"]))?;
    if !result.success() {
        return Ok(CheckResult::fail(&name, &format!("{} is not runnable", expect.python)));
    }
    let (major, minor) = expect.python_series;
    Ok(match parse_python_version(&result.stdout) {
        Some((ma, mi, patch)) if (ma, mi) == (major, minor) => {
            CheckResult::pass_with(&name, &format!("{}.{}.{}", ma, mi, patch))
        }
        Some((ma, mi, patch)) => CheckResult::fail(
            &name,
            &format!("reports {}.{}.{}, expected {}.{}.x", ma, mi, patch, major, minor),
        ),
        None => CheckResult::fail(
            &name,
            &format!("unrecognized output '{}'", result.stdout_trimmed()),
        ),
    })
}

/// The distribution's `python3` must not have been repointed.
fn check_system_python(snapshot: &dyn Snapshot, expect: &Expectations) -> Result<CheckResult> {
    let name = "system python3 unchanged";
    let result = snapshot.probe(&argv(["python3", "--version"]))?;
    let current = result
        .success()
        .then(|| result.stdout_trimmed().to_string());

    Ok(match (&expect.system_python, current) {
        (Some(before), Some(after)) if *before == after => CheckResult::pass_with(name, &after),
        (Some(before), Some(after)) => CheckResult::fail(
            name,
            &format!("was '{}' before the build, now '{}'", before, after),
        ),
        (Some(before), None) => {
            CheckResult::fail(name, &format!("was '{}', now missing", before))
        }
        (None, None) => CheckResult::pass_with(name, "no python3 in base image"),
        (None, Some(after)) => match parse_python_version(&after) {
            Some((ma, mi, _)) if (ma, mi) == expect.python_series => CheckResult::fail(
                name,
                &format!("python3 resolves to {}", after),
            ),
            _ => CheckResult::pass_with(name, &after),
        },
    })
}

fn check_entrypoint(snapshot: &dyn Snapshot, expect: &Expectations) -> Result<CheckResult> {
    let name = "entrypoint";
    let Some(program) = expect.entrypoint.first() else {
        return Ok(CheckResult::fail(name, "empty"));
    };
    if snapshot
        .probe(&argv(["test", "-x", program.as_str()]))?
        .success()
    {
        Ok(CheckResult::pass_with(name, program))
    } else {
        Ok(CheckResult::fail(name, &format!("{} is not executable", program)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::CheckStatus;
    use crate::snapshot::MemorySnapshot;

    fn expectations() -> Expectations {
        Expectations {
            toolchain: vec!["gcc".into(), "python3.11-devel".into()],
            source_dir: "/tmp/src".into(),
            python: "python3.11".into(),
            python_series: (3, 11),
            system_python: Some("Python 3.9.18".into()),
            entrypoint: vec!["/usr/local/bin/dumb-init".into(), "--".into()],
        }
    }

    fn status(report: &CheckReport, name: &str) -> CheckStatus {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .unwrap_or_else(|| panic!("no check named {}", name))
    }

    fn finished() -> MemorySnapshot {
        let snap = MemorySnapshot::el9();
        let pm = crate::pipeline::PackageManager::dnf();
        pm.install(&snap, &["python3.11".into(), "python3.11-pip".into()])
            .unwrap();
        snap.write_file("/usr/local/bin/dumb-init", "").unwrap();
        snap
    }

    #[test]
    fn test_parse_python_version() {
        assert_eq!(parse_python_version("Python 3.11.7\n"), Some((3, 11, 7)));
        assert_eq!(parse_python_version("Python 3.9.18"), Some((3, 9, 18)));
        assert_eq!(parse_python_version("python: command not found"), None);
    }

    #[test]
    fn test_finished_snapshot_passes() {
        let report = verify_snapshot(&finished(), &expectations()).unwrap();
        assert!(report.all_passed(), "{:?}", report.failures());
        assert_eq!(status(&report, "python3.11 version"), CheckStatus::Pass);
        // Installed without nodocs in this fixture.
        assert_eq!(status(&report, "no runtime docs"), CheckStatus::Warn);
    }

    #[test]
    fn test_leaked_toolchain_fails() {
        let snap = finished();
        crate::pipeline::PackageManager::dnf()
            .install(&snap, &["gcc".into()])
            .unwrap();
        let report = verify_snapshot(&snap, &expectations()).unwrap();
        assert_eq!(status(&report, "gcc removed"), CheckStatus::Fail);
        assert_eq!(status(&report, "python3.11-devel removed"), CheckStatus::Pass);
    }

    #[test]
    fn test_leftover_source_fails() {
        let snap = finished();
        snap.write_file("/tmp/src/constraints.txt", "dumb-init==1.2.5\n")
            .unwrap();
        let report = verify_snapshot(&snap, &expectations()).unwrap();
        assert_eq!(status(&report, "source discarded"), CheckStatus::Fail);
    }

    #[test]
    fn test_changed_system_python_fails() {
        let mut expect = expectations();
        expect.system_python = Some("Python 3.6.8".into());
        let report = verify_snapshot(&finished(), &expect).unwrap();
        assert_eq!(status(&report, "system python3 unchanged"), CheckStatus::Fail);
    }

    #[test]
    fn test_missing_entrypoint_fails() {
        let snap = MemorySnapshot::el9();
        let report = verify_snapshot(&snap, &expectations()).unwrap();
        assert_eq!(status(&report, "entrypoint"), CheckStatus::Fail);
        assert_eq!(status(&report, "python3.11 version"), CheckStatus::Fail);
    }
}
