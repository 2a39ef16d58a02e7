// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Invokers
//!
//! ## Overview
//! An invoker accepts payloads and hands them to one execution backend.
//!
//! - Remote: one asynchronous request per payload to a function on a compute service.
//! - Batch: payloads wait in a backlog until the caller drains them into the job runner.
//! - Queued: a dedicated consumer thread feeds the job runner one payload at a time.
//! - Local invokers register the temp artifact cleanup on construction.
//!
//! ```text
//!         +-----------------------------------------+
//!         |               producers                 |
//!         +------+-------------+-------------+------+
//!                |             |             |
//!                v             v             v
//!         +------+-----+ +-----+------+ +----+-------+
//!         |   Remote   | |   Batch    | |   Queued   |
//!         |  (client)  | | (backlog)  | |  (queue)   |
//!         +------+-----+ +-----+------+ +----+-------+
//!                |             | drain()     | consumer thread
//!                v             v             v
//!         +------+-----+ +-----+-------------+-------+
//!         |  compute   | |        job runner         |
//!         |  service   | +---------------------------+
//!         +------------+
//! ```

use crate::error::InvokerError;
use crate::payload::{InvocationConfig, InvokerKind, Payload};

pub mod batch;
pub mod queued;
pub mod remote;

use batch::BatchInvoker;
use queued::QueuedInvoker;
use remote::RemoteFunctionInvoker;

/// What an invoker answers when it has taken a payload. Says nothing about
/// whether the work has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// The compute service accepted the invocation.
    Dispatched { request_id: Option<String> },
    /// Appended to the backlog, which now holds `backlog_len` payloads.
    Backlogged { backlog_len: usize },
    /// Pushed onto the queue of the background consumer.
    Enqueued,
}

pub trait Invoker: Send {
    fn kind(&self) -> InvokerKind;

    /// Accepts one payload for execution.
    fn invoke(&mut self, payload: Payload) -> Result<Acknowledgment, InvokerError>;

    /// Backend-identifying pairs, stable for the lifetime of the invoker.
    fn config(&self) -> &InvocationConfig;

    /// Whether the backend limits how long a single job may run.
    fn time_limit(&self) -> bool {
        false
    }
}

/// The closed set of backends, selected when the invoker is constructed.
pub enum AnyInvoker {
    Remote(RemoteFunctionInvoker),
    Batch(BatchInvoker),
    Queued(QueuedInvoker),
}

impl AnyInvoker {
    pub fn as_batch_mut(&mut self) -> Option<&mut BatchInvoker> {
        match self {
            AnyInvoker::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn as_queued_mut(&mut self) -> Option<&mut QueuedInvoker> {
        match self {
            AnyInvoker::Queued(queued) => Some(queued),
            _ => None,
        }
    }
}

impl Invoker for AnyInvoker {
    fn kind(&self) -> InvokerKind {
        match self {
            AnyInvoker::Remote(inner) => inner.kind(),
            AnyInvoker::Batch(inner) => inner.kind(),
            AnyInvoker::Queued(inner) => Invoker::kind(inner),
        }
    }

    fn invoke(&mut self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        match self {
            AnyInvoker::Remote(inner) => inner.invoke(payload),
            AnyInvoker::Batch(inner) => inner.invoke(payload),
            AnyInvoker::Queued(inner) => Invoker::invoke(inner, payload),
        }
    }

    fn config(&self) -> &InvocationConfig {
        match self {
            AnyInvoker::Remote(inner) => inner.config(),
            AnyInvoker::Batch(inner) => inner.config(),
            AnyInvoker::Queued(inner) => Invoker::config(inner),
        }
    }

    fn time_limit(&self) -> bool {
        match self {
            AnyInvoker::Remote(inner) => inner.time_limit(),
            AnyInvoker::Batch(inner) => inner.time_limit(),
            AnyInvoker::Queued(inner) => Invoker::time_limit(inner),
        }
    }
}

impl From<RemoteFunctionInvoker> for AnyInvoker {
    fn from(inner: RemoteFunctionInvoker) -> Self {
        AnyInvoker::Remote(inner)
    }
}

impl From<BatchInvoker> for AnyInvoker {
    fn from(inner: BatchInvoker) -> Self {
        AnyInvoker::Batch(inner)
    }
}

impl From<QueuedInvoker> for AnyInvoker {
    fn from(inner: QueuedInvoker) -> Self {
        AnyInvoker::Queued(inner)
    }
}

#[cfg(test)]
mod tests;
