//! The image plan - WHAT gets built, as data.
//!
//! One step per [`Phase`]. Adding a package means editing a constant here,
//! never the executor.

use super::package_manager::MINIMAL_OPTIONS;
use super::{Op, Phase, Step, ToolBuild};
use crate::config::Config;

/// Versioned interpreter. The base distribution's `python3` is left alone.
pub const PYTHON: &str = "python3.11";

/// Runtime packages that stay in the image.
pub const BASE_RUNTIME: &[&str] = &["python3.11", "python3.11-pip", "glibc-langpack-en"];

/// Build-only packages. Present only while the pinned tool is being built.
pub const TOOLCHAIN: &[&str] = &["gcc", "python3.11-devel"];

/// Where pip puts console scripts for the versioned interpreter.
pub const TOOL_BIN_DIR: &str = "/usr/local/bin";

/// Install location of a host-provided `pyinit`.
pub const BUILTIN_WRAPPER_PATH: &str = "/usr/local/bin/pyinit";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Entrypoint of the final image: the init wrapper followed by `--`, so
/// `run IMAGE CMD...` becomes `wrapper -- CMD...`.
pub fn entrypoint(config: &Config) -> Vec<String> {
    let wrapper = match &config.pyinit_binary {
        Some(_) => BUILTIN_WRAPPER_PATH.to_string(),
        None => format!("{}/{}", TOOL_BIN_DIR, config.wrapper_tool),
    };
    vec![wrapper, "--".to_string()]
}

/// Build-only packages as owned strings.
pub fn toolchain_packages() -> Vec<String> {
    strings(TOOLCHAIN)
}

/// The full plan for `config`.
pub fn plan(config: &Config) -> Vec<Step> {
    let dest = config.dest_dir_normalized();

    let mut entrypoint_ops = Vec::new();
    if let Some(binary) = &config.pyinit_binary {
        entrypoint_ops.push(Op::CopyHostFile {
            from: binary.clone(),
            to: BUILTIN_WRAPPER_PATH.to_string(),
            mode: 0o755,
        });
    }
    entrypoint_ops.push(Op::Entrypoint(entrypoint(config)));

    vec![
        Step {
            name: "source",
            phase: Phase::Stage,
            ops: vec![Op::CopySource {
                from: config.src_dir.clone(),
                to: dest.clone(),
            }],
        },
        Step {
            name: "package-manager",
            phase: Phase::Configure,
            ops: MINIMAL_OPTIONS
                .iter()
                .map(|(key, value)| Op::SetOption {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        },
        Step {
            name: "python-runtime",
            phase: Phase::InstallBase,
            ops: vec![Op::Install(strings(BASE_RUNTIME))],
        },
        Step {
            name: "pip",
            phase: Phase::UpgradeInstaller,
            ops: vec![Op::PipUpgrade {
                python: PYTHON.to_string(),
                package: "pip".to_string(),
            }],
        },
        Step {
            name: "wrapper-tool",
            phase: Phase::Toolchain,
            ops: vec![Op::WithToolchain {
                packages: toolchain_packages(),
                build: ToolBuild {
                    python: PYTHON.to_string(),
                    tool: config.wrapper_tool.clone(),
                    constraints: config.constraints_in_snapshot(),
                },
            }],
        },
        Step {
            name: "source-cleanup",
            phase: Phase::DiscardSource,
            ops: vec![Op::RemovePath(dest)],
        },
        Step {
            name: "entrypoint",
            phase: Phase::Entrypoint,
            ops: entrypoint_ops,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validate;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn config() -> Config {
        Config::from_vars(&HashMap::new(), Path::new("/work"))
    }

    #[test]
    fn test_plan_is_valid() {
        validate(&plan(&config())).unwrap();
    }

    #[test]
    fn test_plan_follows_phase_order() {
        let phases: Vec<Phase> = plan(&config()).iter().map(|s| s.phase).collect();
        assert_eq!(phases, Phase::ALL);
    }

    #[test]
    fn test_toolchain_not_in_runtime() {
        for package in TOOLCHAIN {
            assert!(!BASE_RUNTIME.contains(package));
        }
        let steps = plan(&config());
        for step in &steps {
            for op in &step.ops {
                if let Op::Install(pkgs) = op {
                    assert!(!pkgs.iter().any(|p| TOOLCHAIN.contains(&p.as_str())));
                }
            }
        }
    }

    #[test]
    fn test_default_entrypoint_is_wrapper_tool() {
        let steps = plan(&config());
        let last = steps.last().unwrap();
        assert_eq!(
            last.ops,
            vec![Op::Entrypoint(vec![
                "/usr/local/bin/dumb-init".into(),
                "--".into()
            ])]
        );
    }

    #[test]
    fn test_pyinit_binary_replaces_entrypoint() {
        let mut config = config();
        config.pyinit_binary = Some(PathBuf::from("/work/target/release/pyinit"));
        let steps = plan(&config);
        let last = steps.last().unwrap();
        assert_eq!(last.ops.len(), 2);
        assert!(matches!(
            &last.ops[0],
            Op::CopyHostFile { to, mode: 0o755, .. } if to == BUILTIN_WRAPPER_PATH
        ));
        assert_eq!(
            last.ops[1],
            Op::Entrypoint(vec![BUILTIN_WRAPPER_PATH.into(), "--".into()])
        );
        // The pinned tool is still built.
        assert!(steps[4]
            .ops
            .iter()
            .any(|op| matches!(op, Op::WithToolchain { build, .. } if build.tool == "dumb-init")));
    }

    #[test]
    fn test_dest_dir_trailing_slash_normalized() {
        let mut config = config();
        config.dest_dir = "/opt/src/".into();
        let steps = plan(&config);
        assert_eq!(steps[5].ops, vec![Op::RemovePath("/opt/src".into())]);
        validate(&steps).unwrap();
    }
}
