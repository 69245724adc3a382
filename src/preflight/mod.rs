//! Preflight checks.
//!
//! Validates the host tools and build inputs before a container is started.
//! Run with `pyimage preflight` to check everything is ready.

mod host_tools;
mod inputs;
pub mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckReport, CheckResult, CheckStatus};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> CheckReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(config));

    println!("Checking build inputs...");
    checks.extend(inputs::check_inputs(config));

    println!();

    CheckReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print("Preflight Check Results");

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
