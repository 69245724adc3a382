//! Show command - displays information.

use anyhow::Result;

use pyimage::cache;
use pyimage::config::Config;
use pyimage::pipeline::plan;
use pyimage::snapshot::image_exists;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show whether the image needs rebuilding
    Status,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Status => {
            config.validate()?;
            let steps = plan(config);
            let inputs_hash = cache::inputs_hash(config, &steps)?;
            let present = image_exists(&config.engine, &config.image_tag)?;
            let cached = cache::read_cached_hash(&config.hash_file());

            println!("Image: {}", config.image_tag);
            println!("  In {}: {}", config.engine, if present { "yes" } else { "no" });
            println!("  Inputs hash: {}", inputs_hash);
            println!("  Cached hash: {}", cached.as_deref().unwrap_or("(none)"));
            if cache::needs_rebuild(&inputs_hash, &config.hash_file(), present) {
                println!("  Status: NEEDS REBUILD");
            } else {
                println!("  Status: up to date");
            }
        }
    }
    Ok(())
}
