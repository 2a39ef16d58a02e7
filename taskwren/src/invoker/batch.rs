// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::error::InvokerError;
use crate::global_config;
use crate::invoker::{Acknowledgment, Invoker};
use crate::job_runner::JobRunner;
use crate::payload::{InvocationConfig, InvocationMetadata, InvokerKind, Payload};
use crate::temp_artifacts;

/// How many backlog entries a drain hands to the job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainLimit {
    All,
    AtMost(usize),
}

/// Negative counts drain the whole backlog.
impl From<i64> for DrainLimit {
    fn from(count: i64) -> Self {
        match usize::try_from(count) {
            Ok(count) => DrainLimit::AtMost(count),
            Err(_) => DrainLimit::All,
        }
    }
}

/// Collects payloads in a backlog until the caller drains them.
///
/// Every operation that touches the backlog takes `&mut self`. There is no
/// internal locking: producers on several threads have to share the invoker
/// behind their own `Mutex`.
pub struct BatchInvoker {
    backlog: VecDeque<Payload>,
    runner: Arc<dyn JobRunner>,
    config: InvocationConfig,
}

impl BatchInvoker {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        temp_artifacts::register_exit_cleanup();
        Self {
            backlog: VecDeque::new(),
            runner,
            config: InvocationConfig::empty(),
        }
    }

    pub fn backlog(&self) -> impl Iterator<Item = &Payload> {
        self.backlog.iter()
    }

    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Hands the first `limit` payloads to the job runner in one call and
    /// removes them from the backlog once the runner returned successfully.
    /// On failure the backlog is left as it was. Returns the number of drained payloads.
    pub fn drain(&mut self, limit: DrainLimit, run_dir: &Path) -> Result<usize, InvokerError> {
        let count = match limit {
            DrainLimit::All => self.backlog.len(),
            DrainLimit::AtMost(max) => max.min(self.backlog.len()),
        };

        fs::create_dir_all(run_dir).map_err(|source| InvokerError::RunDirectory {
            path: run_dir.to_path_buf(),
            source,
        })?;

        debug!(
            "draining {count} of {} payloads into {} at {}",
            self.backlog.len(),
            self.runner.desc(),
            run_dir.display()
        );
        let metadata = InvocationMetadata::for_invoker(InvokerKind::Batch);
        let jobs = &self.backlog.make_contiguous()[..count];
        self.runner
            .run(jobs, run_dir, &metadata)
            .map_err(InvokerError::JobRunner)?;

        self.backlog.drain(..count);
        Ok(count)
    }

    /// Drains into the default run directory below the configured temp root.
    pub fn drain_default(&mut self, limit: DrainLimit) -> Result<usize, InvokerError> {
        self.drain(limit, &global_config::local_run_dir())
    }
}

impl Invoker for BatchInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::Batch
    }

    fn invoke(&mut self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        self.backlog.push_back(payload);
        Ok(Acknowledgment::Backlogged {
            backlog_len: self.backlog.len(),
        })
    }

    fn config(&self) -> &InvocationConfig {
        &self.config
    }
}
