//! pyinit - signal-forwarding init for container entrypoints.

use clap::{CommandFactory, Parser};

use pyimage::init::{self, InitOptions, SPAWN_FAILED, USAGE_ERROR};

#[derive(Parser)]
#[command(name = "pyinit")]
#[command(about = "Run a command as a child, forward signals to it and reap zombies")]
#[command(override_usage = "pyinit [--single-child] [--no-subreaper] -- <COMMAND> [ARGS]...")]
struct Cli {
    /// Forward signals to the child only, not its process group
    #[arg(long)]
    single_child: bool,

    /// Do not register as child subreaper when not running as PID 1
    #[arg(long)]
    no_subreaper: bool,

    /// Command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    // clap exits with 2 on bad flags, which would look like a spawn failure.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(USAGE_ERROR);
        }
        Err(e) => e.exit(),
    };

    if cli.command.is_empty() {
        let _ = Cli::command().print_help();
        eprintln!();
        std::process::exit(USAGE_ERROR);
    }

    let options = InitOptions {
        single_child: cli.single_child,
        subreaper: !cli.no_subreaper,
        command: cli.command,
    };

    match init::run(&options) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("pyinit: {:#}", e);
            std::process::exit(SPAWN_FAILED);
        }
    }
}
