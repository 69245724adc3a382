//! Runtime configuration applied to the committed image.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locale made available by `glibc-langpack-en`.
pub const DEFAULT_LANG: &str = "C.UTF-8";

/// Command used when neither the plan nor the base image provides one.
pub const DEFAULT_CMD: &[&str] = &["python3.11"];

/// Entrypoint, default command, environment and labels of the final image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    /// `None` falls back to [`DEFAULT_CMD`]. A CMD is always written at
    /// commit so the working container's own command never leaks into the
    /// image.
    pub cmd: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageConfig {
    pub fn new(entrypoint: Vec<String>) -> Self {
        let mut env = BTreeMap::new();
        env.insert("LANG".to_string(), DEFAULT_LANG.to_string());
        Self {
            entrypoint,
            cmd: None,
            env,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Fill in `cmd` when the plan left it unset. Empty commands are ignored.
    pub fn with_cmd_if_unset(mut self, cmd: Option<Vec<String>>) -> Self {
        if self.cmd.is_none() {
            self.cmd = cmd.filter(|c| !c.is_empty());
        }
        self
    }

    /// The CMD that will be committed.
    pub fn effective_cmd(&self) -> Vec<String> {
        match &self.cmd {
            Some(cmd) => cmd.clone(),
            None => DEFAULT_CMD.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Dockerfile-style instructions understood by `podman/docker commit --change`.
    pub fn changes(&self) -> Result<Vec<String>> {
        let mut changes = Vec::new();
        if !self.entrypoint.is_empty() {
            changes.push(format!("ENTRYPOINT {}", serde_json::to_string(&self.entrypoint)?));
        }
        changes.push(format!("CMD {}", serde_json::to_string(&self.effective_cmd())?));
        for (key, value) in &self.env {
            changes.push(format!("ENV {}={}", key, value));
        }
        for (key, value) in &self.labels {
            changes.push(format!("LABEL {}={}", key, serde_json::to_string(value)?));
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_render_exec_form() {
        let config = ImageConfig::new(vec!["/usr/local/bin/pyinit".into(), "--".into()])
            .with_label("org.opencontainers.image.base.name", "quay.io/rockylinux/rockylinux:9");
        let changes = config.changes().unwrap();

        assert_eq!(changes[0], r#"ENTRYPOINT ["/usr/local/bin/pyinit","--"]"#);
        assert!(changes.contains(&"ENV LANG=C.UTF-8".to_string()));
        assert!(changes.contains(
            &r#"LABEL org.opencontainers.image.base.name="quay.io/rockylinux/rockylinux:9""#
                .to_string()
        ));
        assert!(changes.contains(&r#"CMD ["python3.11"]"#.to_string()));
    }

    #[test]
    fn test_base_cmd_fills_unset_cmd() {
        let config = ImageConfig::new(vec!["dumb-init".into()])
            .with_cmd_if_unset(Some(vec!["/bin/bash".into()]));
        assert_eq!(config.effective_cmd(), vec!["/bin/bash".to_string()]);

        let empty = ImageConfig::new(vec!["dumb-init".into()]).with_cmd_if_unset(Some(vec![]));
        assert_eq!(empty.effective_cmd(), vec!["python3.11".to_string()]);

        let mut explicit = ImageConfig::new(vec!["dumb-init".into()]);
        explicit.cmd = Some(vec!["python3.11".into(), "-V".into()]);
        let explicit = explicit.with_cmd_if_unset(Some(vec!["/bin/bash".into()]));
        assert_eq!(explicit.effective_cmd(), vec!["python3.11".to_string(), "-V".to_string()]);
    }

    #[test]
    fn test_explicit_cmd() {
        let mut config = ImageConfig::new(vec!["dumb-init".into()]);
        config.cmd = Some(vec!["python3.11".into()]);
        assert!(config
            .changes()
            .unwrap()
            .contains(&r#"CMD ["python3.11"]"#.to_string()));
    }
}
