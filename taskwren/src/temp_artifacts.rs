// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Residue of local execution and its removal at process exit.
//!
//! Local invokers hand a run directory to the job runner, and the job runner
//! leaves module caches, downloaded runtimes, a download lock and scratch job
//! files below the temp root. [`CleanupManifest`] names all of them. The
//! process-wide [`TempArtifactRegistry`] removes them once, either when
//! [`TempArtifactRegistry::run_cleanup`] is called explicitly or from the exit
//! hook installed by [`register_exit_cleanup`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once, OnceLock};

use log::{debug, info, warn};

use crate::global_config::{self, LOCAL_RUN_DIR_NAME};

/// Prefix of the scratch files written by the job runner.
pub const JOB_RUNNER_SCRATCH_PREFIX: &str = "taskwren-jobrunner";

/// Fixed description of what local execution leaves behind below a temp root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupManifest {
    root: PathBuf,
    dirs: Vec<PathBuf>,
    /// Name patterns matched against the entries of `root`.
    dir_patterns: Vec<String>,
    files: Vec<PathBuf>,
    file_patterns: Vec<String>,
}

/// What a single cleanup pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_dirs: Vec<PathBuf>,
    pub removed_files: Vec<PathBuf>,
    /// Paths that existed but could not be removed.
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn removed_count(&self) -> usize {
        self.removed_dirs.len() + self.removed_files.len()
    }
}

impl CleanupManifest {
    pub fn for_temp_dir(temp_dir: &Path) -> Self {
        Self {
            root: temp_dir.to_path_buf(),
            dirs: vec![
                temp_dir.join(LOCAL_RUN_DIR_NAME),
                temp_dir.join("taskwren-runtimes"),
            ],
            dir_patterns: vec!["taskwren-modules*".to_string()],
            files: vec![temp_dir.join("taskwren-runtime-download.lock")],
            file_patterns: vec![
                format!("{JOB_RUNNER_SCRATCH_PREFIX}*"),
                "taskwren-runtime_*".to_string(),
            ],
        }
    }

    /// Expands the glob patterns against the current filesystem.
    pub fn resolve(&self) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut dirs = self.dirs.clone();
        dirs.extend(self.dir_patterns.iter().flat_map(|p| self.expand(p)));
        let mut files = self.files.clone();
        files.extend(self.file_patterns.iter().flat_map(|p| self.expand(p)));
        (dirs, files)
    }

    /// Entries of the root whose name matches `pattern`. The root itself is
    /// never interpreted as a pattern, so it may contain glob characters or
    /// bytes that are not UTF-8.
    fn expand(&self, pattern: &str) -> Vec<PathBuf> {
        let pattern = match glob::Pattern::new(pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("invalid cleanup pattern {pattern}: {e}");
                return Vec::new();
            }
        };
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("could not list {}: {e}", self.root.display());
                return Vec::new();
            }
        };
        let mut matched: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_str().is_some_and(|name| pattern.matches(name)))
            .map(|entry| entry.path())
            .collect();
        matched.sort();
        matched
    }

    /// Removes every directory (recursively) and file of the manifest.
    /// Absent paths are skipped, other failures are logged and recorded in the report.
    pub fn remove_all(&self) -> CleanupReport {
        let (dirs, files) = self.resolve();
        let mut report = CleanupReport::default();

        for dir in dirs {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    debug!("removed directory {}", dir.display());
                    report.removed_dirs.push(dir);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("could not remove directory {}: {e}", dir.display());
                    report.failed.push(dir);
                }
            }
        }

        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => {
                    debug!("removed file {}", file.display());
                    report.removed_files.push(file);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("could not remove file {}: {e}", file.display());
                    report.failed.push(file);
                }
            }
        }

        report
    }
}

/// Owner of a manifest whose cleanup runs at most once.
#[derive(Debug)]
pub struct TempArtifactRegistry {
    manifest: CleanupManifest,
    cleaned: Once,
    last_report: Mutex<Option<CleanupReport>>,
}

static REGISTRY: OnceLock<TempArtifactRegistry> = OnceLock::new();
static EXIT_HOOK: Once = Once::new();

impl TempArtifactRegistry {
    pub fn new(manifest: CleanupManifest) -> Self {
        Self {
            manifest,
            cleaned: Once::new(),
            last_report: Mutex::new(None),
        }
    }

    /// The process-wide registry, built from the configured temp root on first use.
    pub fn global() -> &'static TempArtifactRegistry {
        REGISTRY.get_or_init(|| {
            TempArtifactRegistry::new(CleanupManifest::for_temp_dir(global_config::get_temp_dir()))
        })
    }

    pub fn manifest(&self) -> &CleanupManifest {
        &self.manifest
    }

    /// Runs the cleanup. Returns the report of the pass that did the work, or
    /// `None` if an earlier call already cleaned up.
    pub fn run_cleanup(&self) -> Option<CleanupReport> {
        let mut ran_now = false;
        self.cleaned.call_once(|| {
            let report = self.manifest.remove_all();
            info!(
                "cleaned up {} local execution artifacts ({} failed)",
                report.removed_count(),
                report.failed.len()
            );
            if let Ok(mut last) = self.last_report.lock() {
                *last = Some(report);
            }
            ran_now = true;
        });
        if !ran_now {
            debug!("local execution artifacts were already cleaned up");
            return None;
        }
        self.last_report.lock().ok().and_then(|last| last.clone())
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.is_completed()
    }
}

extern "C" fn cleanup_at_exit() {
    // a panic must not unwind across the C boundary
    let _ = std::panic::catch_unwind(|| {
        TempArtifactRegistry::global().run_cleanup();
    });
}

/// Installs the exit hook for the process-wide registry. Safe to call from
/// every invoker constructor, the hook is installed only once.
pub fn register_exit_cleanup() {
    if global_config::get_keep_artifacts() {
        debug!("keeping local execution artifacts, exit cleanup not registered");
        return;
    }
    EXIT_HOOK.call_once(|| {
        // build the registry now, so the exit hook does not race the config
        let registry = TempArtifactRegistry::global();
        let rc = unsafe { libc::atexit(cleanup_at_exit) };
        if rc == 0 {
            debug!(
                "registered exit cleanup for {} paths and patterns",
                registry.manifest.dirs.len()
                    + registry.manifest.dir_patterns.len()
                    + registry.manifest.files.len()
                    + registry.manifest.file_patterns.len()
            );
        } else {
            warn!("could not register exit cleanup, local execution artifacts will remain");
        }
    });
}
