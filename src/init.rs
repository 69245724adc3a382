//! Minimal init for container entrypoints.
//!
//! Runs one command as a child, forwards signals to it, reaps every child
//! that gets reparented to us, and exits with the child's status. Intended
//! to run as PID 1, where the kernel would otherwise drop signals that have
//! no handler and nothing would collect orphaned zombies.
//!
//! All forwarded signals plus `SIGCHLD` are blocked before the child is
//! spawned and then consumed synchronously with `sigwait`, so there are no
//! async signal handlers.

use anyhow::{bail, Context, Result};
use libc::{c_int, pid_t};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Exit code when the command cannot be started.
pub const SPAWN_FAILED: i32 = 2;

/// Exit code for a missing command or bad wrapper flags. Distinct from
/// [`SPAWN_FAILED`].
pub const USAGE_ERROR: i32 = 1;

/// Signals relayed to the child.
pub const FORWARDED: &[c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGWINCH,
    libc::SIGCONT,
];

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Signal only the direct child instead of its process group.
    pub single_child: bool,
    /// Become a child subreaper when not running as PID 1.
    pub subreaper: bool,
    /// Program and arguments.
    pub command: Vec<String>,
}

/// Status as a shell would report it: the exit code, or 128 + signal.
/// `None` for a stopped or continued child.
pub fn exit_code(status: c_int) -> Option<i32> {
    if libc::WIFEXITED(status) {
        Some(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        Some(128 + libc::WTERMSIG(status))
    } else {
        None
    }
}

/// `kill` target for a forwarded signal.
pub fn forward_target(child: pid_t, single_child: bool) -> pid_t {
    if single_child {
        child
    } else {
        -child
    }
}

struct SignalSet(libc::sigset_t);

impl SignalSet {
    fn forwarded() -> Result<Self> {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: sigemptyset initializes the set before it is read.
        let mut set = unsafe {
            if libc::sigemptyset(set.as_mut_ptr()) != 0 {
                bail!("sigemptyset: {}", io::Error::last_os_error());
            }
            set.assume_init()
        };
        for &sig in FORWARDED.iter().chain([libc::SIGCHLD].iter()) {
            // SAFETY: `set` is an initialized sigset_t.
            if unsafe { libc::sigaddset(&mut set, sig) } != 0 {
                bail!("sigaddset({}): {}", sig, io::Error::last_os_error());
            }
        }
        Ok(Self(set))
    }

    /// Block the set, returning the previous mask.
    fn block(&self) -> Result<libc::sigset_t> {
        let mut old = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: both pointers are valid; the kernel fills `old`.
        let rc = unsafe { libc::sigprocmask(libc::SIG_BLOCK, &self.0, old.as_mut_ptr()) };
        if rc != 0 {
            bail!("sigprocmask: {}", io::Error::last_os_error());
        }
        // SAFETY: sigprocmask succeeded and wrote the old mask.
        Ok(unsafe { old.assume_init() })
    }

    fn wait(&self) -> Result<c_int> {
        let mut sig: c_int = 0;
        // SAFETY: the set is initialized and `sig` is a valid out pointer.
        let rc = unsafe { libc::sigwait(&self.0, &mut sig) };
        if rc != 0 {
            bail!("sigwait: {}", io::Error::from_raw_os_error(rc));
        }
        Ok(sig)
    }
}

fn set_subreaper() -> io::Result<()> {
    // SAFETY: prctl with PR_SET_CHILD_SUBREAPER takes a plain integer flag.
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1 as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn spawn(options: &InitOptions, restore: libc::sigset_t) -> Result<pid_t> {
    let Some((program, args)) = options.command.split_first() else {
        bail!("no command given");
    };
    let single_child = options.single_child;

    let mut command = Command::new(program);
    command.args(args);
    // SAFETY: the closure only calls async-signal-safe functions
    // (sigprocmask, setsid) between fork and exec.
    unsafe {
        command.pre_exec(move || {
            if libc::sigprocmask(libc::SIG_SETMASK, &restore, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
            if !single_child && libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;
    Ok(child.id() as pid_t)
}

/// Reap every exited child. Returns the direct child's exit code once it is
/// among them.
fn reap(child: pid_t) -> Option<i32> {
    let mut child_code = None;
    loop {
        let mut status: c_int = 0;
        // SAFETY: `status` is a valid out pointer.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            // 0: children remain but none exited; -1: ECHILD.
            break;
        }
        if pid == child {
            child_code = exit_code(status);
        }
    }
    child_code
}

fn send(target: pid_t, sig: c_int) {
    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(target, sig) } != 0 {
        let err = io::Error::last_os_error();
        // The target may already be gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            eprintln!("pyinit: failed to send signal {} to {}: {}", sig, target, err);
        }
    }
}

/// Run the command to completion and return the exit code to use.
pub fn run(options: &InitOptions) -> Result<i32> {
    let signals = SignalSet::forwarded()?;
    let previous = signals.block()?;

    // SAFETY: getpid cannot fail.
    if options.subreaper && unsafe { libc::getpid() } != 1 {
        if let Err(e) = set_subreaper() {
            eprintln!("pyinit: could not become child subreaper: {}", e);
        }
    }

    let child = spawn(options, previous)?;
    let target = forward_target(child, options.single_child);

    loop {
        let sig = signals.wait()?;
        if sig == libc::SIGCHLD {
            if let Some(code) = reap(child) {
                if !options.single_child {
                    // Stragglers in the child's session.
                    send(target, libc::SIGTERM);
                }
                return Ok(code);
            }
        } else {
            send(target, sig);
        }
    }
}
