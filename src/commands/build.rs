//! Build command - provisions and commits the image.

use anyhow::Result;

use pyimage::cache;
use pyimage::config::Config;
use pyimage::pipeline::plan;
use pyimage::preflight;
use pyimage::provision::provision;
use pyimage::snapshot::{image_exists, WorkContainer};
use pyimage::timing::Timer;

/// Execute the build command.
pub fn cmd_build(config: &Config, force: bool, skip_preflight: bool) -> Result<()> {
    println!("=== Building {} ===\n", config.image_tag);

    // Configuration errors surface before any container exists.
    config.validate()?;
    if !skip_preflight {
        preflight::run_preflight_or_fail(config)?;
    }

    let steps = plan(config);
    let inputs_hash = cache::inputs_hash(config, &steps)?;
    let hash_file = config.hash_file();

    let present = image_exists(&config.engine, &config.image_tag)?;
    if !force && !cache::needs_rebuild(&inputs_hash, &hash_file, present) {
        println!("[SKIP] {} is up to date (inputs unchanged)", config.image_tag);
        println!("       Use --force to rebuild anyway.");
        return Ok(());
    }

    let total = Timer::start("build");
    let container = WorkContainer::start(
        &config.engine,
        &config.base_image,
        &config.container_name(),
    )?
    .keep_on_failure(config.keep_failed);

    let provisioned = provision(&container, config, &steps)?;
    provisioned.verification.print("Image Verification");

    container.commit(&provisioned.image_config(config, &inputs_hash), &config.image_tag)?;
    cache::write_cached_hash(&hash_file, &inputs_hash)?;

    let report = provisioned.report(config, &inputs_hash);
    report.write(&config.report_path())?;

    let elapsed = total.finish();
    println!("\n=== Build Complete ===");
    println!("  Image: {}", config.image_tag);
    println!("  Entrypoint: {}", report.image.entrypoint.join(" "));
    println!("  Packages: {} (fingerprint {})", report.packages.len(), &report.package_fingerprint[..12]);
    println!("  Report: {}", config.report_path().display());
    println!("  Time: {}", pyimage::timing::format_duration(elapsed));
    println!("\nRun with:");
    println!("  {} run --rm -it {} python3.11", config.engine, config.image_tag);

    Ok(())
}
