// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use taskwren::global_config;
use taskwren::invoker::batch::{BatchInvoker, DrainLimit};
use taskwren::invoker::Invoker;
use taskwren::job_runner::{ClosureJobRunner, JobRunner};
use taskwren::payload::Payload;

/// Builds local invokers against a temp root, leaves residue behind and exits
/// normally, so the exit hook is the only thing that can remove it.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long)]
    temp_dir: PathBuf,

    /// Also construct a queued invoker and run a payload through it
    #[arg(long)]
    queued: bool,

    #[arg(long)]
    keep_artifacts: bool,
}

fn leave_residue(jobs: &[Payload], run_dir: &std::path::Path) -> anyhow::Result<()> {
    let temp_dir = global_config::get_temp_dir();
    fs::create_dir_all(run_dir)?;
    for (i, _) in jobs.iter().enumerate() {
        File::create(run_dir.join(format!("job-{i}.out")))?;
    }
    fs::create_dir_all(temp_dir.join("taskwren-modules-x").join("cache"))?;
    fs::create_dir_all(temp_dir.join("taskwren-runtimes").join("default"))?;
    File::create(temp_dir.join("taskwren-runtime-download.lock"))?;
    File::create(temp_dir.join(format!("taskwren-jobrunner-{}-0.json", std::process::id())))?;
    File::create(temp_dir.join("taskwren-runtime_default.tar.gz"))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    global_config::initialize_global_config(Some(&args.temp_dir), args.keep_artifacts)
        .map_err(anyhow::Error::msg)?;

    let runner: Arc<dyn JobRunner> = Arc::new(ClosureJobRunner::new("residue", |jobs, run_dir, _| {
        leave_residue(jobs, run_dir)
    }));

    let mut batch = BatchInvoker::new(runner.clone());
    batch.invoke(Payload::new().with("task", 1))?;
    batch.drain_default(DrainLimit::All)?;

    #[cfg(target_os = "linux")]
    if args.queued {
        let mut queued = taskwren::invoker::queued::QueuedInvoker::new(runner)?;
        queued.invoke(Payload::new().with("task", 2))?;
        queued.wait_until_idle();
        queued.wait_until_finished();
    }

    Ok(())
}
