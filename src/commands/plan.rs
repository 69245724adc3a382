//! Plan command - prints the build plan, optionally simulating it.

use anyhow::Result;

use pyimage::cache;
use pyimage::config::Config;
use pyimage::pipeline::{plan, validate};
use pyimage::provision::provision;
use pyimage::snapshot::MemorySnapshot;

/// Execute the plan command.
pub fn cmd_plan(config: &Config, dry_run: bool) -> Result<()> {
    let steps = plan(config);
    validate(&steps)?;

    println!("=== Build Plan: {} ===\n", config.image_tag);
    println!("Base image: {}", config.base_image);
    for (i, step) in steps.iter().enumerate() {
        println!("\n{}. [{}] {}", i + 1, step.phase, step.name);
        for op in &step.ops {
            println!("     {}", op);
        }
    }
    println!();

    if !dry_run {
        return Ok(());
    }

    config.validate()?;
    println!("=== Dry Run (simulated EL9 base, no container engine) ===\n");
    let snapshot = MemorySnapshot::el9();
    let provisioned = provision(&snapshot, config, &steps)?;

    println!("Commands:");
    for command in snapshot.commands() {
        println!("  $ {}", command);
    }
    println!();
    provisioned.verification.print("Simulated Verification");

    let inputs_hash = cache::inputs_hash(config, &steps)?;
    let report = provisioned.report(config, &inputs_hash);
    println!();
    println!("Inputs hash:         {}", report.inputs_hash);
    println!("Package fingerprint: {}", report.package_fingerprint);
    println!("Entrypoint:          {}", report.image.entrypoint.join(" "));

    Ok(())
}
