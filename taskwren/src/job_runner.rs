// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::global_config;
use crate::payload::{InvocationMetadata, Payload};
use crate::temp_artifacts::JOB_RUNNER_SCRATCH_PREFIX;

/// Executes a list of payloads. The run directory belongs to the invoker
/// that handed it over and may be removed once `run` has returned.
pub trait JobRunner: Send + Sync + 'static {
    /// Free-form description, used for logging
    fn desc(&self) -> &str;

    fn run(&self, jobs: &[Payload], run_dir: &Path, metadata: &InvocationMetadata)
        -> anyhow::Result<()>;
}

type RunFn = dyn Fn(&[Payload], &Path, &InvocationMetadata) -> anyhow::Result<()> + Send + Sync;

pub struct ClosureJobRunner {
    desc: String,
    f: Box<RunFn>,
}

impl ClosureJobRunner {
    pub fn new(
        desc: impl Into<String>,
        f: impl Fn(&[Payload], &Path, &InvocationMetadata) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            desc: desc.into(),
            f: Box::new(f),
        }
    }
}

impl JobRunner for ClosureJobRunner {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(
        &self,
        jobs: &[Payload],
        run_dir: &Path,
        metadata: &InvocationMetadata,
    ) -> anyhow::Result<()> {
        (self.f)(jobs, run_dir, metadata)
    }
}

/// Content of the scratch file handed to an external job runner command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobFile {
    pub jobs: Vec<Payload>,
    pub run_dir: PathBuf,
    pub metadata: InvocationMetadata,
}

impl JobFile {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read job file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid job file {}", path.display()))
    }
}

/// Runs jobs by executing an external command as `<program> <args..> --job-file <path>`.
pub struct CommandJobRunner {
    desc: String,
    program: PathBuf,
    args: Vec<String>,
    scratch_dir: PathBuf,
    counter: AtomicU64,
}

impl CommandJobRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            desc: format!("command {}", program.display()),
            program,
            args: Vec::new(),
            scratch_dir: global_config::get_temp_dir().to_path_buf(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Directory for the scratch job files. Defaults to the configured temp root,
    /// where the exit cleanup picks up leftovers.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn next_job_file(&self) -> PathBuf {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        self.scratch_dir.join(format!(
            "{JOB_RUNNER_SCRATCH_PREFIX}-{}-{seq}.json",
            process::id()
        ))
    }
}

impl JobRunner for CommandJobRunner {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(
        &self,
        jobs: &[Payload],
        run_dir: &Path,
        metadata: &InvocationMetadata,
    ) -> anyhow::Result<()> {
        let job_file = JobFile {
            jobs: jobs.to_vec(),
            run_dir: run_dir.to_path_buf(),
            metadata: metadata.clone(),
        };
        let path = self.next_job_file();
        fs::write(&path, serde_json::to_vec(&job_file)?)
            .with_context(|| format!("could not write job file {}", path.display()))?;

        debug!(
            "running {} job(s) with {} ({})",
            jobs.len(),
            self.program.display(),
            path.display()
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--job-file")
            .arg(&path)
            .current_dir(run_dir)
            .status()
            .with_context(|| format!("could not start {}", self.program.display()))?;

        if !status.success() {
            // the job file stays for inspection, the exit cleanup removes it
            bail!("{} exited with {status}", self.program.display());
        }
        fs::remove_file(&path)
            .with_context(|| format!("could not remove job file {}", path.display()))?;
        Ok(())
    }
}
