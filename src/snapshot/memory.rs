//! In-memory snapshot of a dnf-based distribution.
//!
//! Interprets the small command vocabulary the pipeline uses (`dnf`, `rpm`,
//! `python3.11 -m pip`, `test`, ...) against a model of installed packages and
//! files. `pyimage plan --dry-run` runs the real plan against it, and every
//! step is unit-tested with it.

use anyhow::{bail, Context, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::Snapshot;
use crate::process::{Cmd, CommandResult};

/// Packages the fake repositories can resolve: (name, version, files).
const REPOSITORY: &[(&str, &str, &[&str])] = &[
    ("bash", "5.1.8-9.el9", &["/usr/bin/bash", "/usr/bin/sh"]),
    ("coreutils", "8.32-35.el9", &["/usr/bin/ls", "/usr/bin/cat"]),
    ("dnf", "4.14.0-9.el9", &["/usr/bin/dnf"]),
    ("rpm", "4.16.1.3-29.el9", &["/usr/bin/rpm"]),
    ("glibc", "2.34-100.el9", &["/usr/lib64/libc.so.6"]),
    ("python3", "3.9.18-3.el9", &["/usr/bin/python3", "/usr/bin/python3.9"]),
    ("python3-libs", "3.9.18-3.el9", &["/usr/lib64/python3.9/os.py"]),
    ("python3.11", "3.11.7-1.el9", &["/usr/bin/python3.11"]),
    ("python3.11-libs", "3.11.7-1.el9", &["/usr/lib64/python3.11/os.py"]),
    ("python3.11-pip", "22.3.1-4.el9", &["/usr/bin/pip3.11"]),
    (
        "python3.11-devel",
        "3.11.7-1.el9",
        &["/usr/include/python3.11/Python.h"],
    ),
    ("gcc", "11.4.1-3.el9", &["/usr/bin/gcc", "/usr/bin/cc"]),
    (
        "glibc-langpack-en",
        "2.34-100.el9",
        &["/usr/lib/locale/en_US.utf8/LC_CTYPE"],
    ),
];

const SYSTEM_PYTHON_VERSION: &str = "3.9.18";
const PYTHON311_VERSION: &str = "3.11.7";

/// Files dnf leaves behind after every transaction.
const DNF_DEBRIS: &[&str] = &[
    "/var/cache/dnf/metadata_lock.pid",
    "/var/cache/dnf/appstream.solv",
    "/var/lib/dnf/history.sqlite",
    "/var/log/dnf.log",
    "/var/log/dnf.rpm.log",
    "/var/log/hawkey.log",
];

const DEFAULT_DNF_CONF: &str = "[main]\n\
gpgcheck=1\n\
installonly_limit=3\n\
clean_requirements_on_remove=True\n\
best=True\n\
skip_if_unavailable=False\n";

#[derive(Debug, Clone, Default)]
struct State {
    packages: BTreeSet<String>,
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    /// Distributions installed by pip for python3.11: name -> version.
    pip: BTreeMap<String, String>,
    log: Vec<String>,
}

/// Model of a container filesystem, interpreted in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    state: RefCell<State>,
    failures: Vec<String>,
}

impl MemorySnapshot {
    /// An empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// A minimal Enterprise Linux 9 base image: dnf, rpm and the system
    /// python3 (3.9) that dnf itself depends on.
    pub fn el9() -> Self {
        let snapshot = Self::new();
        {
            let mut state = snapshot.state.borrow_mut();
            for name in [
                "bash",
                "coreutils",
                "dnf",
                "rpm",
                "glibc",
                "python3",
                "python3-libs",
            ] {
                install_package(&mut state, name, false);
            }
            state
                .files
                .insert("/etc/dnf/dnf.conf".into(), DEFAULT_DNF_CONF.into());
            state.dirs.insert("/tmp".into());
        }
        snapshot
    }

    /// Make every command whose rendering contains `pattern` fail.
    pub fn fail_when(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    /// Commands executed so far, rendered as shell lines.
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    /// Whether an RPM package is installed.
    pub fn is_installed(&self, package: &str) -> bool {
        self.state.borrow().packages.contains(package)
    }

    /// Version of a pip distribution installed for python3.11.
    pub fn pip_version(&self, name: &str) -> Option<String> {
        self.state.borrow().pip.get(&normalize(name)).cloned()
    }

    /// Paths of all files, sorted.
    pub fn files(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    fn interpret(&self, argv: &[String]) -> CommandResult {
        let mut state = self.state.borrow_mut();
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::synthetic(127, "", "empty command");
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match program.as_str() {
            "dnf" => dnf(&mut state, &args),
            "rpm" => rpm(&state, &args),
            "python3" | "python3.9" => {
                if !path_exists(&state, &format!("/usr/bin/{}", program)) {
                    return not_found(program);
                }
                match args.as_slice() {
                    ["--version"] => {
                        CommandResult::synthetic(0, format!("Python {}\n", SYSTEM_PYTHON_VERSION), "")
                    }
                    _ => CommandResult::synthetic(0, "", ""),
                }
            }
            "python3.11" => python311(&mut state, &args),
            "test" => match args.as_slice() {
                ["-e", path] | ["-x", path] | ["-f", path] => {
                    CommandResult::synthetic(i32::from(!path_exists(&state, path)), "", "")
                }
                _ => CommandResult::synthetic(2, "", "test: unsupported expression"),
            },
            "mkdir" => {
                for path in args.iter().filter(|a| !a.starts_with('-')) {
                    state.dirs.insert(trim_slash(path));
                }
                CommandResult::synthetic(0, "", "")
            }
            "chmod" => match args.last() {
                Some(path) if path_exists(&state, path) => CommandResult::synthetic(0, "", ""),
                Some(path) => CommandResult::synthetic(
                    1,
                    "",
                    format!("chmod: cannot access '{}': No such file or directory", path),
                ),
                None => CommandResult::synthetic(1, "", "chmod: missing operand"),
            },
            "cat" => match args.first().and_then(|p| state.files.get(*p)) {
                Some(content) => CommandResult::synthetic(0, content.clone(), ""),
                None => CommandResult::synthetic(1, "", "cat: No such file or directory"),
            },
            other if other.starts_with('/') && path_exists(&state, other) => {
                CommandResult::synthetic(0, "", "")
            }
            other => not_found(other),
        }
    }
}

impl Snapshot for MemorySnapshot {
    fn id(&self) -> &str {
        "memory"
    }

    fn exec(&self, argv: &[String]) -> Result<CommandResult> {
        let result = self.probe(argv)?;
        command_for(argv)?.check(result)
    }

    fn probe(&self, argv: &[String]) -> Result<CommandResult> {
        let cmd = command_for(argv)?;
        let rendered = cmd.to_string();
        self.state.borrow_mut().log.push(rendered.clone());

        if self.failures.iter().any(|p| rendered.contains(p.as_str())) {
            return Ok(CommandResult::synthetic(1, "", "injected failure"));
        }
        Ok(self.interpret(argv))
    }

    fn copy_in(&self, src: &Path, dest: &str) -> Result<()> {
        let dest = trim_slash(dest);
        let mut state = self.state.borrow_mut();

        if src.is_dir() {
            state.dirs.insert(dest.clone());
            for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", src.display()))?;
                let rel = entry.path().strip_prefix(src)?.to_string_lossy().into_owned();
                let target = format!("{}/{}", dest, rel);
                if entry.file_type().is_dir() {
                    state.dirs.insert(target);
                } else {
                    let bytes = fs::read(entry.path())
                        .with_context(|| format!("reading {}", entry.path().display()))?;
                    state
                        .files
                        .insert(target, String::from_utf8_lossy(&bytes).into_owned());
                }
            }
        } else if src.is_file() {
            let bytes = fs::read(src).with_context(|| format!("reading {}", src.display()))?;
            state
                .files
                .insert(dest, String::from_utf8_lossy(&bytes).into_owned());
        } else {
            bail!("{} does not exist", src.display());
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.state.borrow().files.get(path).cloned())
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .files
            .insert(trim_slash(path), content.to_string());
        Ok(())
    }

    fn remove_paths(&self, paths: &[&str]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for path in paths {
            remove_path(&mut state, path);
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(path_exists(&self.state.borrow(), path))
    }
}

fn command_for(argv: &[String]) -> Result<Cmd> {
    let (program, args) = argv.split_first().context("empty command")?;
    Ok(Cmd::new(program).args(args))
}

fn not_found(program: &str) -> CommandResult {
    CommandResult::synthetic(
        127,
        "",
        format!("{}: command not found", program),
    )
}

fn trim_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn path_exists(state: &State, path: &str) -> bool {
    let path = trim_slash(path);
    let prefix = format!("{}/", path);
    state.files.contains_key(&path)
        || state.dirs.contains(&path)
        || state.files.keys().any(|f| f.starts_with(&prefix))
        || state.dirs.iter().any(|d| d.starts_with(&prefix))
}

fn remove_path(state: &mut State, pattern: &str) {
    if let Some(prefix) = pattern.strip_suffix('*') {
        state.files.retain(|f, _| !f.starts_with(prefix));
        state.dirs.retain(|d| !d.starts_with(prefix));
    } else {
        let path = trim_slash(pattern);
        let under = format!("{}/", path);
        state
            .files
            .retain(|f, _| f != &path && !f.starts_with(&under));
        state.dirs.retain(|d| d != &path && !d.starts_with(&under));
    }
}

fn lookup(name: &str) -> Option<&'static (&'static str, &'static str, &'static [&'static str])> {
    REPOSITORY.iter().find(|(n, _, _)| *n == name)
}

fn install_package(state: &mut State, name: &str, with_docs: bool) {
    if let Some((_, _, files)) = lookup(name) {
        for file in *files {
            state.files.insert(file.to_string(), String::new());
        }
    }
    if with_docs {
        state
            .files
            .insert(format!("/usr/share/doc/{}/README", name), String::new());
    }
    state.packages.insert(name.to_string());
}

fn remove_package(state: &mut State, name: &str) {
    if let Some((_, _, files)) = lookup(name) {
        for file in *files {
            state.files.remove(*file);
        }
    }
    remove_path(state, &format!("/usr/share/doc/{}", name));
    state.packages.remove(name);
}

fn dnf(state: &mut State, args: &[&str]) -> CommandResult {
    let mut setopts = Vec::new();
    let mut positional = Vec::new();
    for arg in args {
        if let Some(opt) = arg.strip_prefix("--setopt=") {
            setopts.push(opt.to_string());
        } else if !arg.starts_with('-') {
            positional.push(*arg);
        }
    }
    let Some((subcommand, names)) = positional.split_first() else {
        return CommandResult::synthetic(1, "", "dnf: no command given");
    };

    match *subcommand {
        "install" => {
            let missing: Vec<_> = names.iter().filter(|n| lookup(n).is_none()).collect();
            if !missing.is_empty() {
                let stderr = missing
                    .iter()
                    .map(|n| format!("No match for argument: {}", n))
                    .collect::<Vec<_>>()
                    .join("\n");
                return CommandResult::synthetic(1, "", format!("{}\nError: Unable to find a match", stderr));
            }

            let conf = state
                .files
                .get("/etc/dnf/dnf.conf")
                .cloned()
                .unwrap_or_default();
            let nodocs = match setopts.iter().rev().find_map(|o| o.strip_prefix("tsflags=")) {
                Some(flags) => flags.contains("nodocs"),
                None => conf.lines().any(|l| {
                    l.trim()
                        .strip_prefix("tsflags=")
                        .is_some_and(|v| v.contains("nodocs"))
                }),
            };

            for name in names {
                install_package(state, name, !nodocs);
                if *name == "python3.11" {
                    install_package(state, "python3.11-libs", !nodocs);
                }
            }
            for debris in DNF_DEBRIS {
                state.files.insert(debris.to_string(), String::new());
            }
            CommandResult::synthetic(0, "Complete!\n", "")
        }
        "remove" => {
            let installed: Vec<_> = names
                .iter()
                .filter(|n| state.packages.contains(**n))
                .collect();
            if installed.is_empty() {
                return CommandResult::synthetic(1, "", "Error: No packages marked for removal.");
            }
            for name in installed {
                remove_package(state, name);
            }
            for debris in DNF_DEBRIS {
                state.files.insert(debris.to_string(), String::new());
            }
            CommandResult::synthetic(0, "Complete!\n", "")
        }
        "clean" => {
            remove_path(state, "/var/cache/dnf/*");
            CommandResult::synthetic(0, "files removed\n", "")
        }
        other => CommandResult::synthetic(1, "", format!("No such command: {}", other)),
    }
}

fn rpm(state: &State, args: &[&str]) -> CommandResult {
    match args {
        ["-qa", ..] | ["-q", "-a", ..] => {
            let mut out = String::new();
            for name in &state.packages {
                let version = lookup(name).map(|(_, v, _)| *v).unwrap_or("1.0-1.el9");
                out.push_str(&format!("{}-{}.x86_64\n", name, version));
            }
            CommandResult::synthetic(0, out, "")
        }
        ["-q", names @ ..] => {
            let mut out = String::new();
            let mut missing = false;
            for name in names {
                match (state.packages.contains(*name), lookup(name)) {
                    (true, Some((_, version, _))) => {
                        out.push_str(&format!("{}-{}.x86_64\n", name, version))
                    }
                    (true, None) => out.push_str(&format!("{}-1.0-1.el9.x86_64\n", name)),
                    (false, _) => {
                        missing = true;
                        out.push_str(&format!("package {} is not installed\n", name));
                    }
                }
            }
            CommandResult::synthetic(i32::from(missing), out, "")
        }
        _ => CommandResult::synthetic(1, "", "rpm: unsupported query"),
    }
}

fn python311(state: &mut State, args: &[&str]) -> CommandResult {
    if !state.packages.contains("python3.11") {
        return not_found("python3.11");
    }
    match args {
        ["--version"] => CommandResult::synthetic(0, format!("Python {}\n", PYTHON311_VERSION), ""),
        ["-m", "pip", "install", rest @ ..] => pip_install(state, rest),
        _ => CommandResult::synthetic(0, "", ""),
    }
}

fn pip_install(state: &mut State, args: &[&str]) -> CommandResult {
    if !state.packages.contains("python3.11-pip") {
        return CommandResult::synthetic(1, "", "/usr/bin/python3.11: No module named pip");
    }

    let mut constraints = None;
    let mut requirements = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-c" | "--constraint" => constraints = iter.next().copied(),
            a if a.starts_with('-') => {}
            a => requirements.push(a),
        }
    }

    let pins: BTreeMap<String, String> = match constraints {
        Some(path) => match state.files.get(path) {
            Some(content) => content
                .lines()
                .filter_map(|l| l.split('#').next())
                .filter_map(|l| l.trim().split_once("=="))
                .map(|(n, v)| (normalize(n), v.trim().to_string()))
                .collect(),
            None => {
                return CommandResult::synthetic(
                    1,
                    "",
                    format!("ERROR: Could not open requirements file: {}", path),
                )
            }
        },
        None => BTreeMap::new(),
    };

    for requirement in requirements {
        let name = normalize(requirement);
        if name == "pip" {
            state.pip.insert(name, "24.0".to_string());
            continue;
        }
        // Everything else ships as an sdist with a C extension.
        if !state.packages.contains("gcc") {
            return CommandResult::synthetic(
                1,
                "",
                "error: command 'gcc' failed: No such file or directory",
            );
        }
        if !state.packages.contains("python3.11-devel") {
            return CommandResult::synthetic(1, "", "fatal error: Python.h: No such file or directory");
        }
        let version = pins.get(&name).cloned().unwrap_or_else(|| "0.0.0".to_string());
        state
            .files
            .insert(format!("/usr/local/bin/{}", requirement), String::new());
        state.pip.insert(name, version);
    }
    CommandResult::synthetic(0, "Successfully installed\n", "")
}

fn normalize(name: &str) -> String {
    crate::manifest::normalize_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::argv;

    #[test]
    fn test_el9_has_system_python() {
        let snap = MemorySnapshot::el9();
        assert!(snap.is_installed("python3"));
        let out = snap.exec(&argv(["python3", "--version"])).unwrap();
        assert_eq!(out.stdout_trimmed(), "Python 3.9.18");
        assert!(snap.exec(&argv(["python3.11", "--version"])).is_err());
    }

    #[test]
    fn test_dnf_install_and_remove() {
        let snap = MemorySnapshot::el9();
        snap.exec(&argv(["dnf", "-y", "install", "gcc"])).unwrap();
        assert!(snap.is_installed("gcc"));
        assert!(snap.exists("/usr/bin/gcc").unwrap());
        assert!(snap.exists("/usr/share/doc/gcc").unwrap());

        snap.exec(&argv(["dnf", "-y", "remove", "gcc"])).unwrap();
        assert!(!snap.is_installed("gcc"));
        assert!(!snap.exists("/usr/bin/gcc").unwrap());
        assert!(!snap.exists("/usr/share/doc/gcc").unwrap());
    }

    #[test]
    fn test_dnf_nodocs_setopt() {
        let snap = MemorySnapshot::el9();
        snap.exec(&argv(["dnf", "-y", "--setopt=tsflags=nodocs", "install", "gcc"]))
            .unwrap();
        assert!(!snap.exists("/usr/share/doc/gcc").unwrap());
    }

    #[test]
    fn test_unknown_package_fails() {
        let snap = MemorySnapshot::el9();
        let err = snap
            .exec(&argv(["dnf", "-y", "install", "python3.99"]))
            .unwrap_err();
        assert!(err.to_string().contains("No match for argument: python3.99"));
    }

    #[test]
    fn test_rpm_query() {
        let snap = MemorySnapshot::el9();
        assert!(snap.probe(&argv(["rpm", "-q", "python3"])).unwrap().success());
        let missing = snap.probe(&argv(["rpm", "-q", "gcc"])).unwrap();
        assert!(!missing.success());
        assert!(missing.stdout.contains("package gcc is not installed"));
    }

    #[test]
    fn test_remove_paths_with_glob() {
        let snap = MemorySnapshot::el9();
        snap.exec(&argv(["dnf", "-y", "install", "gcc"])).unwrap();
        assert!(snap.exists("/var/log/dnf.log").unwrap());
        snap.remove_paths(&["/var/log/dnf*", "/var/log/hawkey.log"]).unwrap();
        assert!(!snap.exists("/var/log/dnf.log").unwrap());
        assert!(!snap.exists("/var/log/dnf.rpm.log").unwrap());
        assert!(!snap.exists("/var/log/hawkey.log").unwrap());
        // Removing again is a no-op.
        snap.remove_paths(&["/var/log/dnf*"]).unwrap();
    }

    #[test]
    fn test_injected_failure_is_logged() {
        let snap = MemorySnapshot::el9().fail_when("install gcc");
        assert!(snap.exec(&argv(["dnf", "-y", "install", "gcc"])).is_err());
        assert_eq!(snap.commands(), vec!["dnf -y install gcc".to_string()]);
        assert!(!snap.is_installed("gcc"));
    }

    #[test]
    fn test_copy_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("constraints.txt"), "dumb-init==1.2.5\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/a.txt"), "a").unwrap();

        let snap = MemorySnapshot::el9();
        snap.copy_in(dir.path(), "/tmp/src/").unwrap();
        assert_eq!(
            snap.read_file("/tmp/src/constraints.txt").unwrap().as_deref(),
            Some("dumb-init==1.2.5\n")
        );
        assert!(snap.exists("/tmp/src/nested/a.txt").unwrap());

        snap.remove_paths(&["/tmp/src"]).unwrap();
        assert!(!snap.exists("/tmp/src").unwrap());
        assert!(snap.exists("/tmp").unwrap());
    }
}
