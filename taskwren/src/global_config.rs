// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Name of the run directory below the temp root.
pub const LOCAL_RUN_DIR_NAME: &str = "taskwren-task";

#[derive(Debug)]
pub struct GlobalConfig {
    /// Root below which local execution materializes its artifacts.
    pub temp_dir: PathBuf,
    /// Skip the exit cleanup, leaving artifacts for inspection.
    pub keep_artifacts: bool,
}

// The actual static variable. It is set once in main() or falls back to the defaults on first use.
pub static CONFIG: OnceLock<GlobalConfig> = OnceLock::new();

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            keep_artifacts: false,
        }
    }
}

pub fn initialize_global_config(temp_dir: Option<&Path>, keep_artifacts: bool) -> Result<(), String> {
    let config = GlobalConfig {
        temp_dir: temp_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir),
        keep_artifacts,
    };
    CONFIG
        .set(config)
        .map_err(|_| "global config was already initialized".to_string())
}

fn get_config<'a>() -> &'a GlobalConfig {
    CONFIG.get_or_init(GlobalConfig::default)
}

pub fn get_temp_dir<'a>() -> &'a Path {
    &get_config().temp_dir
}

pub fn get_keep_artifacts() -> bool {
    get_config().keep_artifacts
}

/// Default run directory handed to the job runner by the local invokers.
pub fn local_run_dir() -> PathBuf {
    get_temp_dir().join(LOCAL_RUN_DIR_NAME)
}

/// Points the test process at a private temp root, so invokers built by unit
/// tests never register the exit cleanup against the shared temp directory.
#[cfg(test)]
pub(crate) fn use_scratch_temp_dir() {
    static SCRATCH: OnceLock<tempfile::TempDir> = OnceLock::new();
    CONFIG.get_or_init(|| GlobalConfig {
        temp_dir: SCRATCH
            .get_or_init(|| tempfile::tempdir().expect("could not create scratch temp root"))
            .path()
            .to_path_buf(),
        keep_artifacts: false,
    });
}
