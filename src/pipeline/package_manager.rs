//! Package manager configuration, threaded explicitly through the pipeline.
//!
//! The executor starts from the distribution defaults and applies each
//! `SetOption` op in plan order. Every later invocation renders its flags from
//! the current value, so an install placed before the configure step would
//! visibly run without them.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::snapshot::{argv, Snapshot};

/// Options applied by the configure step.
pub const MINIMAL_OPTIONS: &[(&str, &str)] = &[("tsflags", "nodocs"), ("install_weak_deps", "False")];

/// Caches, history and logs removed after every transaction.
pub const CLEANUP_PATHS: &[&str] = &[
    "/var/cache/dnf",
    "/var/cache/yum",
    "/var/lib/dnf/history*",
    "/var/log/dnf*",
    "/var/log/hawkey.log",
];

/// Current package manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManager {
    /// Executable, `dnf` or `microdnf`.
    pub tool: String,
    /// Persistent configuration file inside the snapshot.
    pub conf_path: String,
    /// Options set so far, sorted by key.
    options: BTreeMap<String, String>,
}

impl PackageManager {
    /// dnf with distribution defaults: docs and weak dependencies enabled.
    pub fn dnf() -> Self {
        Self {
            tool: "dnf".to_string(),
            conf_path: "/etc/dnf/dnf.conf".to_string(),
            options: BTreeMap::new(),
        }
    }

    /// Record an option. Later invocations pass it on the command line.
    pub fn apply(&mut self, key: &str, value: &str) {
        self.options.insert(key.to_string(), value.to_string());
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Whether documentation files get installed.
    pub fn installs_docs(&self) -> bool {
        !self
            .option("tsflags")
            .is_some_and(|flags| flags.split(',').any(|f| f.trim() == "nodocs"))
    }

    /// Whether weak dependencies (Recommends) get pulled in.
    pub fn installs_weak_deps(&self) -> bool {
        match self.option("install_weak_deps") {
            Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"),
            None => true,
        }
    }

    /// `--setopt=key=value` for every applied option.
    pub fn setopts(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|(k, v)| format!("--setopt={}={}", k, v))
            .collect()
    }

    fn transaction(&self, verb: &str, packages: &[String]) -> Vec<String> {
        let mut cmd = vec![self.tool.clone(), "-y".to_string()];
        cmd.extend(self.setopts());
        cmd.push(verb.to_string());
        cmd.extend(packages.iter().cloned());
        cmd
    }

    pub fn install_argv(&self, packages: &[String]) -> Vec<String> {
        self.transaction("install", packages)
    }

    pub fn remove_argv(&self, packages: &[String]) -> Vec<String> {
        self.transaction("remove", packages)
    }

    pub fn clean_argv(&self) -> Vec<String> {
        argv([self.tool.as_str(), "clean", "all"])
    }

    /// Install packages, then clean up.
    pub fn install(&self, snapshot: &dyn Snapshot, packages: &[String]) -> Result<()> {
        tracing::info!(packages = %packages.join(" "), "installing");
        snapshot.exec(&self.install_argv(packages))?;
        self.cleanup(snapshot)
    }

    /// Remove packages, then clean up.
    pub fn remove(&self, snapshot: &dyn Snapshot, packages: &[String]) -> Result<()> {
        tracing::info!(packages = %packages.join(" "), "removing");
        snapshot.exec(&self.remove_argv(packages))?;
        self.cleanup(snapshot)
    }

    /// Clear caches, transaction history and logs. Safe to run repeatedly.
    pub fn cleanup(&self, snapshot: &dyn Snapshot) -> Result<()> {
        snapshot.exec(&self.clean_argv())?;
        snapshot.remove_paths(CLEANUP_PATHS)
    }
}

/// Set `key=value` in the `[main]` section of an ini-style config.
///
/// An existing assignment is rewritten in place; otherwise the line is added
/// at the end of `[main]`, creating the section if needed.
pub fn set_conf_option(conf: &str, key: &str, value: &str) -> String {
    let assignment = format!("{}={}", key, value);
    let mut lines: Vec<String> = conf.lines().map(str::to_string).collect();

    let main_start = lines.iter().position(|l| l.trim() == "[main]");
    let Some(start) = main_start else {
        let mut out = vec!["[main]".to_string(), assignment];
        if !lines.is_empty() {
            out.push(String::new());
            out.extend(lines);
        }
        return finish(out);
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with('['))
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());

    let existing = lines[start + 1..end].iter().position(|l| {
        l.split_once('=')
            .is_some_and(|(k, _)| k.trim() == key && !l.trim_start().starts_with('#'))
    });

    match existing {
        Some(i) => lines[start + 1 + i] = assignment,
        None => {
            // Keep blank lines that separate sections after the new option.
            let mut insert_at = end;
            while insert_at > start + 1 && lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            lines.insert(insert_at, assignment);
        }
    }
    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
