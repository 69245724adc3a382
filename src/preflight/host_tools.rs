//! Host tool availability checks.

use crate::config::Config;
use crate::process::Cmd;

use super::types::CheckResult;

/// Check the container engine is installed and answers.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let engine = config.engine.as_str();
    match which::which(engine) {
        Ok(path) => {
            results.push(CheckResult::pass_with(engine, &path.display().to_string()));
            results.push(check_engine_responds(engine));
        }
        Err(_) => {
            results.push(CheckResult::fail(
                engine,
                &format!(
                    "Not found. Install '{}' or set CONTAINER_ENGINE to podman or docker.",
                    engine
                ),
            ));
        }
    }

    if !matches!(engine, "podman" | "docker") {
        results.push(CheckResult::warn(
            "CONTAINER_ENGINE",
            &format!("'{}' is neither podman nor docker; commit flags may differ", engine),
        ));
    }

    results
}

/// `<engine> version` fails when the daemon or socket is unavailable.
fn check_engine_responds(engine: &str) -> CheckResult {
    let name = format!("{} service", engine);
    match Cmd::new(engine)
        .args(["version", "--format", "{{.Client.Version}}"])
        .allow_fail()
        .run()
    {
        Ok(r) if r.success() => CheckResult::pass_with(&name, r.stdout_trimmed()),
        Ok(r) => CheckResult::fail(&name, first_line(r.stderr_trimmed())),
        Err(e) => CheckResult::fail(&name, &e.to_string()),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("no output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn test_missing_engine_fails() {
        let mut config = Config::from_vars(&HashMap::new(), Path::new("/work"));
        config.engine = "pyimage-no-such-engine".into();
        let results = check_host_tools(&config);
        assert_eq!(results[0].status, super::super::types::CheckStatus::Fail);
        assert!(results
            .iter()
            .any(|r| r.name == "CONTAINER_ENGINE"
                && r.status == super::super::types::CheckStatus::Warn));
    }
}
