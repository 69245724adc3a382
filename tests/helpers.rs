//! Shared test utilities for pyimage tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use pyimage::config::Config;

/// Test environment with a source directory and scratch space.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Base directory (project root simulation)
    pub base_dir: PathBuf,
    /// Source directory copied into the snapshot
    pub src_dir: PathBuf,
}

impl TestEnv {
    /// Create a source directory pinning dumb-init, with a small app.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let src_dir = base_dir.join("context");

        fs::create_dir_all(src_dir.join("app")).expect("Failed to create source dir");
        fs::write(
            src_dir.join("constraints.txt"),
            "# runtime pins\ndumb-init==1.2.5\nrequests==2.31.0 ; python_version >= \"3.8\"\n",
        )
        .expect("Failed to write constraints");
        fs::write(src_dir.join("app/main.py"), "print('hello')\n").expect("Failed to write app");

        Self {
            _temp_dir: temp_dir,
            base_dir,
            src_dir,
        }
    }

    /// Config resolved from `vars` plus `SRC_DIR` pointing at the test source.
    pub fn config_with(&self, vars: &[(&str, &str)]) -> Config {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("SRC_DIR".to_string())
            .or_insert_with(|| self.src_dir.display().to_string());
        map.entry("PYIMAGE_CACHE_DIR".to_string())
            .or_insert_with(|| self.base_dir.join("cache").display().to_string());
        Config::from_vars(&map, &self.base_dir)
    }

    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    /// Write an executable stand-in for a host `pyinit` binary.
    pub fn fake_pyinit(&self) -> PathBuf {
        let path = self.base_dir.join("bin/pyinit");
        create_mock_binary(&path);
        path
    }
}

/// Create a mock executable file.
pub fn create_mock_binary(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir for binary");
    }
    fs::write(path, "#!/bin/sh\nexec \"$@\"\n").expect("Failed to create mock binary");

    let mut perms = fs::metadata(path).expect("Failed to get metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to set permissions");
}

/// Position of the first logged command containing `needle`.
pub fn position_of(commands: &[String], needle: &str) -> usize {
    commands
        .iter()
        .position(|c| c.contains(needle))
        .unwrap_or_else(|| panic!("no command containing '{}' in {:#?}", needle, commands))
}
