// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::InvokerError;
use crate::global_config;
use crate::invoker::{Acknowledgment, Invoker};
use crate::job_runner::JobRunner;
use crate::payload::{InvocationConfig, InvocationMetadata, InvokerKind, Payload};
use crate::{platform, temp_artifacts};

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum QueuedState {
    /// The consumer thread is active and the queue accepts payloads.
    Running,
    /// The queue is closed or the consumer thread has ended.
    Stopped,
}

/// Number of payloads that were enqueued but not yet fully processed.
#[derive(Debug, Default)]
struct Progress {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Progress {
    fn add(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn pending(&self) -> usize {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle(&self) {
        // pattern is described on https://doc.rust-lang.org/stable/std/sync/struct.Condvar.html
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self
                .idle
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn enqueue(tx: &Sender<Payload>, progress: &Progress, payload: Payload) -> Result<Acknowledgment, InvokerError> {
    progress.add();
    match tx.try_send(payload) {
        Ok(()) => Ok(Acknowledgment::Enqueued),
        Err(TrySendError::Closed(_)) | Err(TrySendError::Full(_)) => {
            progress.done();
            Err(InvokerError::Stopped)
        }
    }
}

/// Runs payloads one at a time on a dedicated consumer thread.
///
/// The consumer starts with the invoker and keeps running until the queue is
/// closed by [`QueuedInvoker::stop`], [`QueuedInvoker::cancel`] or by
/// dropping the invoker. Failures of the job runner are logged and never
/// reach the producers.
#[derive(Debug)]
pub struct QueuedInvoker {
    tx: Sender<Payload>,
    thread_handle: Option<JoinHandle<()>>,
    progress: Arc<Progress>,
    cancelled: Arc<AtomicBool>,
    run_dir: PathBuf,
    config: InvocationConfig,
}

/// Cloneable handle for producers on other threads.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<Payload>,
    progress: Arc<Progress>,
}

impl QueueProducer {
    pub fn invoke(&self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        enqueue(&self.tx, &self.progress, payload)
    }
}

impl QueuedInvoker {
    /// Starts the consumer with the default run directory below the configured temp root.
    pub fn new(runner: Arc<dyn JobRunner>) -> Result<Self, InvokerError> {
        Self::with_run_dir(runner, global_config::local_run_dir())
    }

    pub fn with_run_dir(
        runner: Arc<dyn JobRunner>,
        run_dir: impl Into<PathBuf>,
    ) -> Result<Self, InvokerError> {
        platform::ensure_supported(InvokerKind::Queued)?;

        let run_dir = run_dir.into();
        let (tx, rx) = async_channel::unbounded();
        let progress = Arc::new(Progress::default());
        let cancelled = Arc::new(AtomicBool::new(false));

        let progress_for_thread = progress.clone();
        let cancelled_for_thread = cancelled.clone();
        let run_dir_for_thread = run_dir.clone();
        // run the consumer in a dedicated thread
        let thread_handle = thread::Builder::new()
            .name("taskwren-queued".to_string())
            .spawn(move || {
                futures::executor::block_on(consumer_loop(
                    rx,
                    runner,
                    run_dir_for_thread,
                    progress_for_thread,
                    cancelled_for_thread,
                ));
            })
            .map_err(InvokerError::ConsumerThread)?;

        temp_artifacts::register_exit_cleanup();

        Ok(Self {
            tx,
            thread_handle: Some(thread_handle),
            progress,
            cancelled,
            run_dir,
            config: InvocationConfig::empty(),
        })
    }

    /// Pushes the payload onto the queue and returns immediately.
    pub fn invoke(&self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        enqueue(&self.tx, &self.progress, payload)
    }

    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            tx: self.tx.clone(),
            progress: self.progress.clone(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> QueuedState {
        let consumer_alive = self
            .thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if consumer_alive && !self.tx.is_closed() {
            QueuedState::Running
        } else {
            QueuedState::Stopped
        }
    }

    /// Payloads enqueued but not yet processed, including the one in the runner.
    pub fn pending(&self) -> usize {
        self.progress.pending()
    }

    /// Blocks until every enqueued payload has been processed.
    pub fn wait_until_idle(&self) {
        self.progress.wait_idle();
    }

    /// Closes the queue. Payloads already enqueued are still processed, new ones are refused.
    pub fn stop(&self) {
        if self.tx.close() {
            debug!("queue closed, consumer finishes the remaining payloads");
        }
    }

    /// Closes the queue and discards every payload the consumer has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop();
        debug!("pending payloads canceled");
    }

    /// Closes the queue and waits for the consumer thread to end.
    pub fn wait_until_finished(&mut self) {
        self.stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("queued consumer thread ended with a panic");
            }
        }
    }
}

impl Drop for QueuedInvoker {
    fn drop(&mut self) {
        // the consumer drains what is left and exits, nobody waits for it
        self.stop();
    }
}

impl Invoker for QueuedInvoker {
    fn kind(&self) -> InvokerKind {
        InvokerKind::Queued
    }

    fn invoke(&mut self, payload: Payload) -> Result<Acknowledgment, InvokerError> {
        QueuedInvoker::invoke(self, payload)
    }

    fn config(&self) -> &InvocationConfig {
        &self.config
    }
}

/// The consumer: one payload per job runner call, strictly in queue order.
async fn consumer_loop(
    rx: Receiver<Payload>,
    runner: Arc<dyn JobRunner>,
    run_dir: PathBuf,
    progress: Arc<Progress>,
    cancelled: Arc<AtomicBool>,
) {
    info!("Starting queued consumer for {}", runner.desc());
    let metadata = InvocationMetadata::for_invoker(InvokerKind::Queued);
    while let Ok(payload) = rx.recv().await {
        if cancelled.load(Ordering::SeqCst) {
            debug!("discarding payload, the queued invoker was canceled");
            progress.done();
            continue;
        }

        if let Err(e) = fs::create_dir_all(&run_dir) {
            warn!("could not create run directory {}: {e}", run_dir.display());
        }

        let jobs = [payload];
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.run(&jobs, &run_dir, &metadata)
        }));
        match outcome {
            Ok(Ok(())) => debug!("Executed job with {}", runner.desc()),
            Ok(Err(e)) => warn!("job runner {} failed: {e:#}", runner.desc()),
            Err(_) => warn!("job runner {} panicked", runner.desc()),
        }
        progress.done();
    }
    info!("Queued consumer ended, queue closed");
}
