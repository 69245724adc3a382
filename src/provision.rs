//! Plan execution plus pre-commit verification against any snapshot.
//!
//! `pyimage build` calls this with a working container, `pyimage plan
//! --dry-run` with an in-memory snapshot. Nothing here commits.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::image::ImageConfig;
use crate::pipeline::{run_plan, Outcome, Step};
use crate::preflight::CheckReport;
use crate::report::{self, BuildReport};
use crate::snapshot::Snapshot;
use crate::verify::{verify_snapshot, Expectations};

/// Label carrying the inputs hash on the committed image.
pub const LABEL_INPUTS_HASH: &str = "io.pyimage.inputs-hash";
pub const LABEL_BASE_IMAGE: &str = "io.pyimage.base-image";

/// A snapshot that ran the whole plan and passed verification.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub outcome: Outcome,
    pub verification: CheckReport,
    /// Sorted `rpm -qa` of the final snapshot.
    pub packages: Vec<String>,
}

impl Provisioned {
    /// Image configuration to commit, labelled with its provenance.
    pub fn image_config(&self, config: &Config, inputs_hash: &str) -> ImageConfig {
        self.outcome
            .image
            .clone()
            .with_label(LABEL_INPUTS_HASH, inputs_hash)
            .with_label(LABEL_BASE_IMAGE, &config.base_image)
    }

    pub fn report(&self, config: &Config, inputs_hash: &str) -> BuildReport {
        BuildReport {
            image_tag: config.image_tag.clone(),
            base_image: config.base_image.clone(),
            engine: config.engine.clone(),
            created: report::unix_now(),
            inputs_hash: inputs_hash.to_string(),
            image: self.image_config(config, inputs_hash),
            system_python: self.outcome.system_python.clone(),
            packages: self.packages.clone(),
            package_fingerprint: report::fingerprint(&self.packages),
            steps: self.outcome.timings.clone(),
            verification: self.verification.clone(),
        }
    }
}

/// Run `steps` on `snapshot`, then verify the result.
pub fn provision(snapshot: &dyn Snapshot, config: &Config, steps: &[Step]) -> Result<Provisioned> {
    let outcome = run_plan(snapshot, steps)?;

    tracing::info!("verifying snapshot before commit");
    let expectations = Expectations::for_config(config, outcome.system_python.clone());
    let verification = verify_snapshot(snapshot, &expectations)?;
    if !verification.all_passed() {
        for failure in verification.failures() {
            tracing::error!("verification failed: {}", failure);
        }
        bail!(
            "Image verification failed: {}",
            verification.failures().join("; ")
        );
    }

    let packages = report::installed_packages(snapshot)?;
    Ok(Provisioned {
        outcome,
        verification,
        packages,
    })
}
