//! Runs a validated plan against a snapshot.

use anyhow::{Context, Result};
use serde::Serialize;

use super::executor::{execute, BuildState};
use super::{validate, Phase, Step};
use crate::image::ImageConfig;
use crate::snapshot::{argv, Snapshot};
use crate::timing::Timer;

/// Wall time of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub step: String,
    pub phase: Phase,
    pub seconds: f64,
}

/// Result of a successful run, ready to be committed.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Runtime configuration set by the plan.
    pub image: ImageConfig,
    pub timings: Vec<StepTiming>,
    /// `python3 --version` of the base image before anything was installed.
    pub system_python: Option<String>,
}

/// Validate `steps` and execute them in order. The first failure aborts.
pub fn run_plan(snapshot: &dyn Snapshot, steps: &[Step]) -> Result<Outcome> {
    validate(steps).context("Invalid build plan")?;

    let system_python = system_python_version(snapshot)?;
    match &system_python {
        Some(version) => tracing::info!(%version, "base image system python"),
        None => tracing::info!("base image has no system python3"),
    }

    let mut state = BuildState::new(snapshot);
    let mut timings = Vec::with_capacity(steps.len());
    for step in steps {
        let timer = Timer::start(step.name);
        execute(&mut state, step)?;
        timings.push(StepTiming {
            step: step.name.to_string(),
            phase: step.phase,
            seconds: timer.finish().as_secs_f64(),
        });
    }

    Ok(Outcome {
        image: state.image,
        timings,
        system_python,
    })
}

/// `python3 --version` output, or `None` when there is no `python3`.
pub fn system_python_version(snapshot: &dyn Snapshot) -> Result<Option<String>> {
    let result = snapshot.probe(&argv(["python3", "--version"]))?;
    if !result.success() {
        return Ok(None);
    }
    // Python 2 printed its version on stderr.
    let text = if result.stdout.trim().is_empty() {
        &result.stderr
    } else {
        &result.stdout
    };
    Ok(Some(text.trim().to_string()))
}
