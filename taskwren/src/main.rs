// SPDX-License-Identifier: MIT
// taskwren: submit job payloads to a remote, batch or queued invoker
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use clap::Parser;
use log::{error, info};

use taskwren::global_config;
use taskwren::invoker::batch::{BatchInvoker, DrainLimit};
use taskwren::invoker::queued::QueuedInvoker;
use taskwren::invoker::remote::RemoteFunctionInvoker;
use taskwren::invoker::{AnyInvoker, Invoker};
use taskwren::job_runner::{CommandJobRunner, JobRunner};
use taskwren::payload::{InvokerKind, Payload};
use taskwren::remote_client::HttpFunctionClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Backend that executes the payloads
    #[arg(long, value_enum, default_value_t)]
    invoker: InvokerKind,

    /// Payload to submit (JSON object). May be repeated. Without any payload
    /// arguments, one JSON object per line is read from stdin.
    #[arg(long = "payload", value_name = "JSON")]
    payloads: Vec<String>,

    /// Payload to submit (base64-encoded JSON object). May be repeated.
    #[arg(long = "payload-base64", value_name = "BASE64")]
    payloads_base64: Vec<String>,

    /// Name of the remote function (remote invoker)
    #[arg(long)]
    function: Option<String>,

    /// Region of the remote function (remote invoker)
    #[arg(long)]
    region: Option<String>,

    /// Base URL of the compute service invocation API (remote invoker)
    #[arg(long, env = "TASKWREN_ENDPOINT")]
    endpoint: Option<String>,

    /// Timeout of a single invocation request, in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// Job runner command, called as `<command> <runner-arg>.. --job-file <path>` (local invokers)
    #[arg(long, value_name = "PROGRAM")]
    runner_command: Option<PathBuf>,

    /// Extra argument for the job runner command. May be repeated.
    #[arg(long = "runner-arg", value_name = "ARG", allow_hyphen_values = true)]
    runner_args: Vec<String>,

    /// Run directory handed to the job runner (local invokers)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Number of payloads drained by the batch invoker, -1 drains all
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    max_jobs: i64,

    /// Root of the local execution artifacts
    #[arg(long, env = "TASKWREN_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Leave local execution artifacts behind at exit
    #[arg(long)]
    keep_artifacts: bool,
}

fn validate_args(args: &Args) -> Result<(), String> {
    match args.invoker {
        InvokerKind::Remote => {
            if args.function.is_none() || args.region.is_none() || args.endpoint.is_none() {
                return Err("--function, --region and --endpoint are required by the remote invoker".into());
            }
            if args.runner_command.is_some() || args.run_dir.is_some() {
                return Err("--runner-command and --run-dir only apply to local invokers".into());
            }
        }
        InvokerKind::Batch | InvokerKind::Queued => {
            if args.runner_command.is_none() {
                return Err(format!("--runner-command is required by the {} invoker", args.invoker));
            }
            if args.function.is_some() || args.region.is_some() {
                return Err("--function and --region only apply to the remote invoker".into());
            }
        }
    }

    if args.invoker != InvokerKind::Batch && args.max_jobs != -1 {
        return Err("--max-jobs only applies to the batch invoker".into());
    }

    if args.request_timeout == 0 {
        return Err("--request-timeout must be at least one second".into());
    }

    Ok(())
}

fn collect_payloads(args: &Args) -> anyhow::Result<Vec<Payload>> {
    let mut payloads = Vec::new();
    for json in &args.payloads {
        payloads.push(Payload::from_json(json)?);
    }
    for b64 in &args.payloads_base64 {
        let decoded = String::from_utf8(BASE64_STANDARD.decode(b64)?)?;
        payloads.push(Payload::from_json(&decoded)?);
    }

    if args.payloads.is_empty() && args.payloads_base64.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                payloads.push(Payload::from_json(&line)?);
            }
        }
    }
    Ok(payloads)
}

/// Run directory handed to the job runner by the local invokers.
fn run_dir(args: &Args) -> PathBuf {
    args.run_dir
        .clone()
        .unwrap_or_else(global_config::local_run_dir)
}

fn build_invoker(args: &Args) -> anyhow::Result<AnyInvoker> {
    let invoker: AnyInvoker = match args.invoker {
        InvokerKind::Remote => {
            let (Some(function), Some(region), Some(endpoint)) =
                (&args.function, &args.region, &args.endpoint)
            else {
                unreachable!("validate_args requires function, region and endpoint");
            };
            let client =
                HttpFunctionClient::new(endpoint.as_str(), Duration::from_secs(args.request_timeout))?;
            RemoteFunctionInvoker::new(region.as_str(), function.as_str(), Box::new(client)).into()
        }
        InvokerKind::Batch | InvokerKind::Queued => {
            let Some(program) = &args.runner_command else {
                unreachable!("validate_args requires a runner command");
            };
            let runner: Arc<dyn JobRunner> =
                Arc::new(CommandJobRunner::new(program).with_args(args.runner_args.iter().cloned()));
            if args.invoker == InvokerKind::Batch {
                BatchInvoker::new(runner).into()
            } else {
                QueuedInvoker::with_run_dir(runner, run_dir(args))?.into()
            }
        }
    };
    Ok(invoker)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let payloads = collect_payloads(args)?;
    let mut invoker = build_invoker(args)?;
    info!(
        "Submitting {} payload(s) to the {} invoker {:?}",
        payloads.len(),
        invoker.kind(),
        invoker.config()
    );

    for payload in payloads {
        invoker.invoke(payload)?;
    }

    if let Some(batch) = invoker.as_batch_mut() {
        let drained = batch.drain(DrainLimit::from(args.max_jobs), &run_dir(args))?;
        info!("Drained {drained} payload(s), {} left in the backlog", batch.len());
    }

    if let Some(queued) = invoker.as_queued_mut() {
        queued.wait_until_idle();
        queued.wait_until_finished();
        info!("Queued invoker finished");
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = global_config::initialize_global_config(args.temp_dir.as_deref(), args.keep_artifacts) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = run(&args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
