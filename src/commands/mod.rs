//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Provision and commit the image
//! - `plan` - Print the plan, optionally simulate it
//! - `verify` - Check an existing image
//! - `clean` - Remove build state
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
mod plan;
mod preflight;
pub mod show;
mod verify;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use plan::cmd_plan;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use verify::cmd_verify;
