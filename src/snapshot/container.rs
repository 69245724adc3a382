//! Working container backed by an OCI engine (`podman` or `docker`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::cell::Cell;
use std::path::Path;

use super::Snapshot;
use crate::image::ImageConfig;
use crate::process::{Cmd, CommandResult};

/// A running container that holds the snapshot between steps.
///
/// The container is removed on drop. With [`WorkContainer::keep_on_failure`]
/// an uncommitted container survives for inspection.
pub struct WorkContainer {
    engine: String,
    name: String,
    keep_on_failure: bool,
    committed: Cell<bool>,
    /// CMD of the base image. The container itself runs `sleep infinity`.
    base_cmd: Option<Vec<String>>,
}

impl WorkContainer {
    /// Start a container from `image`, idling so steps can `exec` into it.
    ///
    /// A failure here means the base reference could not be pulled or run.
    pub fn start(engine: &str, image: &str, name: &str) -> Result<Self> {
        tracing::info!(%engine, %image, container = %name, "starting working container");

        // Leftover from an interrupted build with the same name.
        Cmd::new(engine)
            .args(["rm", "-f", name])
            .allow_fail()
            .run()?;

        start_cmd(engine, image, name)
            .error_msg(format!(
                "Could not start base image '{}' with {}. Check the reference and registry access",
                image, engine
            ))
            .run()?;

        let mut container = Self {
            engine: engine.to_string(),
            name: name.to_string(),
            keep_on_failure: false,
            committed: Cell::new(false),
            base_cmd: None,
        };
        // The base is local now that `run` pulled it.
        container.base_cmd = inspect_image(engine, image)?.cmd;
        Ok(container)
    }

    /// Keep the container around if it is dropped without being committed.
    pub fn keep_on_failure(mut self, keep: bool) -> Self {
        self.keep_on_failure = keep;
        self
    }

    /// Publish the container's filesystem as `tag` with the image config
    /// applied. An unset CMD is taken from the base image.
    pub fn commit(&self, config: &ImageConfig, tag: &str) -> Result<()> {
        tracing::info!(container = %self.name, %tag, "committing image");
        let config = config.clone().with_cmd_if_unset(self.base_cmd.clone());
        commit_cmd(&self.engine, &self.name, &config, tag)?
            .error_msg(format!("Failed to commit {} as {}", self.name, tag))
            .run()?;
        self.committed.set(true);
        Ok(())
    }

    fn exec_cmd(&self, argv: &[String]) -> Cmd {
        exec_cmd(&self.engine, &self.name, argv)
    }
}

impl Drop for WorkContainer {
    fn drop(&mut self) {
        if self.keep_on_failure && !self.committed.get() {
            tracing::warn!(container = %self.name, "build failed, keeping container for inspection");
            return;
        }
        if let Err(e) = Cmd::new(&self.engine)
            .args(["rm", "-f", self.name.as_str()])
            .run()
        {
            tracing::warn!(container = %self.name, "failed to remove working container: {:#}", e);
        }
    }
}

impl Snapshot for WorkContainer {
    fn id(&self) -> &str {
        &self.name
    }

    fn exec(&self, argv: &[String]) -> Result<CommandResult> {
        self.exec_cmd(argv).run()
    }

    fn probe(&self, argv: &[String]) -> Result<CommandResult> {
        self.exec_cmd(argv).allow_fail().run()
    }

    fn copy_in(&self, src: &Path, dest: &str) -> Result<()> {
        if src.is_dir() {
            self.exec(&super::argv(["mkdir", "-p", dest]))?;
            // "src/." copies the directory's contents, not the directory itself.
            let contents = src.join(".");
            Cmd::new(&self.engine)
                .arg("cp")
                .arg_path(&contents)
                .arg(format!("{}:{}", self.name, dest))
                .run()
                .with_context(|| format!("copying {} into {}", src.display(), dest))?;
        } else {
            if let Some(parent) = Path::new(dest).parent() {
                let parent = parent.to_string_lossy();
                self.exec(&super::argv(["mkdir", "-p", parent.as_ref()]))?;
            }
            Cmd::new(&self.engine)
                .arg("cp")
                .arg_path(src)
                .arg(format!("{}:{}", self.name, dest))
                .run()
                .with_context(|| format!("copying {} into {}", src.display(), dest))?;
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>> {
        let result = self.probe(&super::argv(["cat", path]))?;
        Ok(result.success().then_some(result.stdout))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        // Content and path are passed as positional arguments, never
        // interpolated into the script.
        self.exec(&super::argv([
            "sh",
            "-c",
            "printf '%s' \"$1\" > \"$2\"",
            "sh",
            content,
            path,
        ]))?;
        Ok(())
    }

    fn remove_paths(&self, paths: &[&str]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        // Unquoted $@ so the shell expands trailing globs.
        let mut argv = super::argv(["sh", "-c", "rm -rf -- $@", "rm"]);
        argv.extend(paths.iter().map(|p| p.to_string()));
        self.exec(&argv)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.probe(&super::argv(["test", "-e", path]))?.success())
    }
}

fn start_cmd(engine: &str, image: &str, name: &str) -> Cmd {
    Cmd::new(engine).args([
        "run",
        "-d",
        "--name",
        name,
        "--entrypoint",
        "sleep",
        image,
        "infinity",
    ])
}

fn exec_cmd(engine: &str, name: &str, argv: &[String]) -> Cmd {
    Cmd::new(engine).args(["exec", name]).args(argv)
}

fn commit_cmd(engine: &str, name: &str, config: &ImageConfig, tag: &str) -> Result<Cmd> {
    let mut cmd = Cmd::new(engine).arg("commit");
    for change in config.changes()? {
        cmd = cmd.arg("--change").arg(change);
    }
    Ok(cmd.args([name, tag]))
}

/// Whether `tag` exists in the engine's local image store.
pub fn image_exists(engine: &str, tag: &str) -> Result<bool> {
    let result = Cmd::new(engine)
        .args(["image", "inspect", tag])
        .allow_fail()
        .run()?;
    Ok(result.success())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    config: Option<InspectConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    entrypoint: Option<Vec<String>>,
    cmd: Option<Vec<String>>,
}

fn inspect_image(engine: &str, tag: &str) -> Result<InspectConfig> {
    let result = Cmd::new(engine)
        .args(["image", "inspect", tag])
        .error_msg(format!("Image '{}' not found", tag))
        .run()?;
    parse_inspect(&result.stdout)
}

/// Read the entrypoint of a local image.
pub fn inspect_entrypoint(engine: &str, tag: &str) -> Result<Option<Vec<String>>> {
    Ok(inspect_image(engine, tag)?.entrypoint)
}

fn parse_inspect(inspect_json: &str) -> Result<InspectConfig> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(inspect_json).context("Unexpected 'image inspect' output")?;
    let Some(entry) = entries.into_iter().next() else {
        bail!("'image inspect' returned no entries");
    };
    Ok(entry.config.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_cmd_overrides_entrypoint() {
        let cmd = start_cmd("podman", "quay.io/rockylinux/rockylinux:9", "pyimage-work");
        assert_eq!(
            cmd.to_string(),
            "podman run -d --name pyimage-work --entrypoint sleep quay.io/rockylinux/rockylinux:9 infinity"
        );
    }

    #[test]
    fn test_exec_cmd_prefixes_container() {
        let cmd = exec_cmd("docker", "work", &super::super::argv(["rpm", "-q", "gcc"]));
        assert_eq!(cmd.argv(), vec!["docker", "exec", "work", "rpm", "-q", "gcc"]);
    }

    #[test]
    fn test_commit_cmd_carries_changes() {
        let config = ImageConfig::new(vec!["/usr/local/bin/dumb-init".into(), "--".into()]);
        let cmd = commit_cmd("podman", "work", &config, "localhost/python311:latest").unwrap();
        let argv = cmd.argv();
        assert_eq!(argv[1], "commit");
        assert!(argv
            .iter()
            .any(|a| a == "ENTRYPOINT [\"/usr/local/bin/dumb-init\",\"--\"]"));
        assert_eq!(argv[argv.len() - 2], "work");
        assert_eq!(argv[argv.len() - 1], "localhost/python311:latest");
    }

    #[test]
    fn test_commit_cmd_always_sets_cmd() {
        // Without an explicit CMD the commit would inherit "sleep infinity"'s
        // argument from the working container.
        let config = ImageConfig::new(vec!["/usr/local/bin/dumb-init".into(), "--".into()]);
        let argv = commit_cmd("podman", "work", &config, "t").unwrap().argv();
        let cmds: Vec<_> = argv.iter().filter(|a| a.starts_with("CMD ")).collect();
        assert_eq!(cmds, vec![r#"CMD ["python3.11"]"#]);
        assert!(!argv.iter().any(|a| a.contains("infinity")));

        let config = config.with_cmd_if_unset(Some(vec!["/bin/bash".into()]));
        let argv = commit_cmd("podman", "work", &config, "t").unwrap().argv();
        assert!(argv.iter().any(|a| a == r#"CMD ["/bin/bash"]"#));
    }

    #[test]
    fn test_parse_inspect() {
        let json = r#"[{"Id":"abc","Config":{"Entrypoint":["/usr/local/bin/dumb-init","--"],"Cmd":["/bin/bash"]}}]"#;
        let config = parse_inspect(json).unwrap();
        assert_eq!(
            config.entrypoint,
            Some(vec!["/usr/local/bin/dumb-init".to_string(), "--".to_string()])
        );
        assert_eq!(config.cmd, Some(vec!["/bin/bash".to_string()]));

        let none = r#"[{"Config":{"Entrypoint":null}}]"#;
        let config = parse_inspect(none).unwrap();
        assert_eq!(config.entrypoint, None);
        assert_eq!(config.cmd, None);

        assert!(parse_inspect("[]").is_err());
    }
}
