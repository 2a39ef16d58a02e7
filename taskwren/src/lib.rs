// SPDX-License-Identifier: MIT
// taskwren: uniform dispatch of job payloads to execution backends
//
// - Remote: fire-and-forget invocation of a function on a compute service.
// - Batch: in-memory backlog, drained explicitly into a job runner.
// - Queued: background consumer feeding a job runner one payload at a time.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod error;
pub mod global_config;
pub mod invoker;
pub mod job_runner;
pub mod payload;
pub mod platform;
pub mod remote_client;
pub mod temp_artifacts;

pub use error::InvokerError;
pub use invoker::batch::{BatchInvoker, DrainLimit};
pub use invoker::queued::{QueuedInvoker, QueuedState};
pub use invoker::remote::RemoteFunctionInvoker;
pub use invoker::{Acknowledgment, AnyInvoker, Invoker};
pub use job_runner::{ClosureJobRunner, CommandJobRunner, JobRunner};
pub use payload::{InvocationConfig, InvocationMetadata, InvokerKind, Payload};
