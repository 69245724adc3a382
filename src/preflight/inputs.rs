//! Build input checks (parameters, source directory, constraints, output).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::config::{is_valid_reference, Config};
use crate::manifest::Constraints;

use super::types::CheckResult;

/// Check everything the build reads from the host.
pub fn check_inputs(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(check_reference("BASE_IMAGE", &config.base_image));
    results.push(check_reference("IMAGE_TAG", &config.image_tag));

    let dest = config.dest_dir.trim_end_matches('/');
    if config.dest_dir.starts_with('/') && !dest.is_empty() {
        results.push(CheckResult::pass_with("DEST_DIR", &config.dest_dir));
    } else {
        results.push(CheckResult::fail(
            "DEST_DIR",
            &format!("'{}' must be an absolute path below /", config.dest_dir),
        ));
    }

    if config.src_dir.is_dir() {
        results.push(CheckResult::pass_with(
            "source directory",
            &config.src_dir.display().to_string(),
        ));
        results.push(check_constraints(config));
    } else {
        results.push(CheckResult::fail(
            "source directory",
            &format!("{} does not exist", config.src_dir.display()),
        ));
        results.push(CheckResult::skip("constraints", "no source directory"));
    }

    match &config.pyinit_binary {
        Some(path) => results.push(check_executable("PYINIT_BINARY", path)),
        None => results.push(CheckResult::skip(
            "PYINIT_BINARY",
            &format!("unset, entrypoint is {}", config.wrapper_tool),
        )),
    }

    results.push(check_writable("output directory", &config.output_dir));

    results
}

fn check_reference(name: &str, reference: &str) -> CheckResult {
    if is_valid_reference(reference) {
        CheckResult::pass_with(name, reference)
    } else {
        CheckResult::fail(name, &format!("'{}' is not a valid image reference", reference))
    }
}

/// The manifest must parse and pin the wrapper tool.
fn check_constraints(config: &Config) -> CheckResult {
    let path = config.constraints_path();
    if !path.exists() {
        return CheckResult::fail(
            "constraints",
            &format!("{} not found", path.display()),
        );
    }
    match Constraints::load(&path) {
        Ok(constraints) => match constraints.pin(&config.wrapper_tool) {
            Some(version) => CheckResult::pass_with(
                "constraints",
                &format!(
                    "{} pins, {}=={}",
                    constraints.len(),
                    config.wrapper_tool,
                    version
                ),
            ),
            None => CheckResult::fail(
                "constraints",
                &format!("{} is not pinned in {}", config.wrapper_tool, path.display()),
            ),
        },
        Err(e) => CheckResult::fail("constraints", &format!("{:#}", e)),
    }
}

fn check_executable(name: &str, path: &Path) -> CheckResult {
    match fs::metadata(path) {
        Ok(meta) if !meta.is_file() => {
            CheckResult::fail(name, &format!("{} is not a file", path.display()))
        }
        Ok(meta) if meta.permissions().mode() & 0o111 == 0 => CheckResult::fail(
            name,
            &format!("{} is not executable (missing +x permission)", path.display()),
        ),
        Ok(_) => CheckResult::pass_with(name, &path.display().to_string()),
        Err(e) => CheckResult::fail(name, &format!("{}: {}", path.display(), e)),
    }
}

/// Create the directory if needed and probe a write.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;
    use std::collections::HashMap;

    fn status(results: &[CheckResult], name: &str) -> CheckStatus {
        results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap_or_else(|| panic!("no check named {}", name))
    }

    #[test]
    fn test_good_inputs_pass() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("constraints.txt"), "dumb-init==1.2.5\n").unwrap();
        let config = Config::from_vars(&HashMap::new(), dir.path());

        let results = check_inputs(&config);
        assert_eq!(status(&results, "constraints"), CheckStatus::Pass);
        assert_eq!(status(&results, "source directory"), CheckStatus::Pass);
        assert_eq!(status(&results, "PYINIT_BINARY"), CheckStatus::Skip);
        assert_eq!(status(&results, "output directory"), CheckStatus::Pass);
        assert!(dir.path().join("output").is_dir());
    }

    #[test]
    fn test_unpinned_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("constraints.txt"), "dumb-init>=1.2\n").unwrap();
        let config = Config::from_vars(&HashMap::new(), dir.path());
        assert_eq!(status(&check_inputs(&config), "constraints"), CheckStatus::Fail);
    }

    #[test]
    fn test_non_executable_pyinit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("pyinit");
        fs::write(&bin, "").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(check_executable("PYINIT_BINARY", &bin).status, CheckStatus::Fail);

        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(check_executable("PYINIT_BINARY", &bin).status, CheckStatus::Pass);
    }
}
