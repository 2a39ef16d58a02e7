// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;

use clap::Parser;
use taskwren::job_runner::JobFile;
use taskwren_tests::executed_log::{self, ExecutedBatch};

/// Job runner used by the integration tests: records every call in the run directory.
#[derive(Debug, Parser)]
struct Args {
    /// Exit with a failure for jobs containing this key
    #[arg(long)]
    fail_on: Option<String>,

    #[arg(long)]
    job_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let job_file = JobFile::read(&args.job_file)?;

    if let Some(key) = &args.fail_on {
        if job_file.jobs.iter().any(|job| job.get(key).is_some()) {
            eprintln!("failing on purpose, a job contains {key}");
            std::process::exit(3);
        }
    }

    executed_log::append(
        &job_file.run_dir,
        &ExecutedBatch {
            pid: std::process::id(),
            invoker: job_file.metadata.invoker,
            jobs: job_file.jobs,
        },
    )?;
    Ok(())
}
