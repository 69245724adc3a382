//! pyimage - Python 3.11 runtime image builder.
//!
//! Builds a minimal Python 3.11 container image on an Enterprise Linux base:
//! - versioned interpreter next to the untouched system python3
//! - pinned init wrapper built with a compiler that is removed afterwards
//! - no package caches, docs or build-time source in the result

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pyimage::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "pyimage")]
#[command(about = "Python 3.11 runtime image builder")]
#[command(
    after_help = "QUICK START:\n  pyimage preflight       Check engine and inputs\n  pyimage plan --dry-run  Simulate the build\n  pyimage build           Build and commit the image\n  pyimage verify          Check the built image"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    params: ParamArgs,
}

/// Build parameters that override `.env` and the environment.
#[derive(clap::Args)]
struct ParamArgs {
    /// Base image reference [env: BASE_IMAGE]
    #[arg(long, global = true)]
    base_image: Option<String>,

    /// Source directory copied into the build [env: SRC_DIR]
    #[arg(long, global = true)]
    src_dir: Option<PathBuf>,

    /// Source location inside the build [env: DEST_DIR]
    #[arg(long, global = true)]
    dest_dir: Option<String>,

    /// Tag of the resulting image [env: IMAGE_TAG]
    #[arg(short, long, global = true)]
    tag: Option<String>,

    /// podman or docker [env: CONTAINER_ENGINE]
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Use this pyinit binary as entrypoint [env: PYINIT_BINARY]
    #[arg(long, global = true)]
    pyinit: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the image (skipped when inputs are unchanged)
    Build {
        /// Rebuild even if the image is up to date
        #[arg(long)]
        force: bool,

        /// Keep the working container when the build fails
        #[arg(long)]
        keep_failed: bool,

        /// Skip host checks
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Print the build plan
    Plan {
        /// Run the plan against a simulated base image
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify an existing image
    Verify {
        /// Image to check (default: the configured tag)
        image: Option<String>,
    },

    /// Remove build state (default: report, cached hash, leftover container)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify engine and inputs before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show build status (whether the image needs rebuilding)
    Status,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Also remove the image from the engine
    Image,
    /// Remove the output and cache directories
    All,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose { "pyimage=debug" } else { "pyimage=info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present, before RUST_LOG is read.
    dotenvy::dotenv().ok();
    setup_logging(cli.verbose);
    let base_dir = std::env::current_dir()?;

    let keep_failed = matches!(cli.command, Commands::Build { keep_failed: true, .. });
    let overrides = Overrides {
        base_image: cli.params.base_image,
        src_dir: cli.params.src_dir,
        dest_dir: cli.params.dest_dir,
        image_tag: cli.params.tag,
        engine: cli.params.engine,
        pyinit_binary: cli.params.pyinit,
        keep_failed,
    };
    let config = Config::load(&base_dir).with_overrides(overrides, &base_dir);

    match cli.command {
        Commands::Build {
            force,
            skip_preflight,
            ..
        } => {
            commands::cmd_build(&config, force, skip_preflight)?;
        }

        Commands::Plan { dry_run } => {
            commands::cmd_plan(&config, dry_run)?;
        }

        Commands::Verify { image } => {
            commands::cmd_verify(&config, image)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::Image) => commands::clean::CleanTarget::Image,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(clean_target, &config)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}
