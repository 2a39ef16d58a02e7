// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;

use thiserror::Error;

use crate::payload::InvokerKind;
use crate::remote_client::TransportError;

/// Errors surfaced synchronously to the caller of an invoker.
#[derive(Error, Debug)]
pub enum InvokerError {
    /// The request never made it to the compute service.
    #[error("failed to invoke {function} in {region}: {source}")]
    Transport {
        function: String,
        region: String,
        #[source]
        source: TransportError,
    },

    /// The service answered, but did not accept the invocation.
    #[error("invocation of {function} was rejected (status {status}): {reason}")]
    InvocationRejected {
        function: String,
        status: u16,
        reason: String,
    },

    #[error("the {invoker} invoker requires a linux host, this host is {os}")]
    PlatformUnsupported { invoker: InvokerKind, os: String },

    #[error("payload could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job runner failed: {0:#}")]
    JobRunner(#[source] anyhow::Error),

    #[error("could not prepare run directory {}: {source}", .path.display())]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start the queued consumer thread: {0}")]
    ConsumerThread(#[source] std::io::Error),

    #[error("the queued invoker has been stopped")]
    Stopped,
}
