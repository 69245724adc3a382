//! Verify command - checks an existing image.

use anyhow::{bail, Result};

use pyimage::config::Config;
use pyimage::pipeline::definitions;
use pyimage::preflight::CheckResult;
use pyimage::snapshot::{inspect_entrypoint, WorkContainer};
use pyimage::verify::{verify_snapshot, Expectations};

/// Execute the verify command against `image`, or the configured tag.
pub fn cmd_verify(config: &Config, image: Option<String>) -> Result<()> {
    let image = image.unwrap_or_else(|| config.image_tag.clone());
    println!("Verifying {}...\n", image);

    let expected_entrypoint = definitions::entrypoint(config);
    let actual_entrypoint = inspect_entrypoint(&config.engine, &image)?;

    let container = WorkContainer::start(
        &config.engine,
        &image,
        &format!("{}-verify", config.container_name()),
    )?;

    // No recorded system python for an existing image: it only has to not
    // be the versioned interpreter.
    let expectations = Expectations::for_config(config, None);
    let mut report = verify_snapshot(&container, &expectations)?;

    report.checks.push(match actual_entrypoint {
        Some(actual) if actual == expected_entrypoint => {
            CheckResult::pass_with("image entrypoint", &actual.join(" "))
        }
        Some(actual) => CheckResult::fail(
            "image entrypoint",
            &format!(
                "is '{}', expected '{}'",
                actual.join(" "),
                expected_entrypoint.join(" ")
            ),
        ),
        None => CheckResult::fail("image entrypoint", "not set"),
    });

    report.print("Image Verification");
    if !report.all_passed() {
        bail!("{} failed {} check(s)", image, report.fail_count());
    }
    Ok(())
}
