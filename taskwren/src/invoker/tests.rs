use crate::global_config;
use crate::invoker::batch::{BatchInvoker, DrainLimit};
use crate::invoker::queued::{QueuedInvoker, QueuedState};
use crate::invoker::remote::RemoteFunctionInvoker;
use crate::job_runner::{ClosureJobRunner, JobRunner};
use crate::payload::{InvocationMetadata, InvokerKind, Payload};
use crate::remote_client::{RemoteAcknowledgment, RemoteFunctionClient, TransportError};

use super::*;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

/// One recorded job runner call
#[derive(Debug, Clone, PartialEq)]
struct RunnerCall {
    jobs: Vec<Payload>,
    run_dir: PathBuf,
    metadata: InvocationMetadata,
}

fn recording_runner() -> (Arc<dyn JobRunner>, Arc<Mutex<Vec<RunnerCall>>>) {
    global_config::use_scratch_temp_dir();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_for_runner = calls.clone();
    let runner = ClosureJobRunner::new("recording runner", move |jobs, run_dir, metadata| {
        calls_for_runner.lock().unwrap().push(RunnerCall {
            jobs: jobs.to_vec(),
            run_dir: run_dir.to_path_buf(),
            metadata: metadata.clone(),
        });
        Ok(())
    });
    (Arc::new(runner), calls)
}

fn task(n: i64) -> Payload {
    Payload::new().with("task", n)
}

//
// Batch
//
#[test]
fn test_batch_end_to_end() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let mut invoker = BatchInvoker::new(runner);

    invoker.invoke(task(1)).unwrap();
    let ack = invoker.invoke(task(2)).unwrap();
    assert_eq!(ack, Acknowledgment::Backlogged { backlog_len: 2 });

    assert_eq!(invoker.drain(DrainLimit::AtMost(1), run_dir.path()).unwrap(), 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(calls.lock().unwrap()[0].jobs, vec![task(1)]);

    assert_eq!(invoker.drain(DrainLimit::from(-1), run_dir.path()).unwrap(), 1);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].jobs, vec![task(2)]);
    assert_eq!(calls[1].run_dir, run_dir.path());
    assert_eq!(calls[1].metadata.invoker, InvokerKind::Batch);
    assert!(invoker.is_empty());
}

#[test]
fn test_batch_drain_takes_prefix_in_order() {
    let run_dir = tempfile::tempdir().unwrap();
    for k in 0..=5 {
        let (runner, calls) = recording_runner();
        let mut invoker = BatchInvoker::new(runner);
        for i in 0..5 {
            invoker.invoke(task(i)).unwrap();
        }

        let drained = invoker.drain(DrainLimit::AtMost(k), run_dir.path()).unwrap();

        assert_eq!(drained, k);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].jobs, (0..k as i64).map(task).collect::<Vec<_>>());
        assert_eq!(
            invoker.backlog().cloned().collect::<Vec<_>>(),
            (k as i64..5).map(task).collect::<Vec<_>>()
        );
    }
}

#[test]
fn test_batch_drain_more_than_backlog() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let mut invoker = BatchInvoker::new(runner);
    invoker.invoke(task(1)).unwrap();
    invoker.invoke(task(2)).unwrap();

    assert_eq!(invoker.drain(DrainLimit::AtMost(10), run_dir.path()).unwrap(), 2);
    assert_eq!(calls.lock().unwrap()[0].jobs, vec![task(1), task(2)]);
    assert!(invoker.is_empty());
}

#[test]
fn test_batch_failed_drain_keeps_backlog() {
    let run_dir = tempfile::tempdir().unwrap();
    global_config::use_scratch_temp_dir();
    let runner = ClosureJobRunner::new("failing runner", |_, _, _| anyhow::bail!("no runtime"));
    let mut invoker = BatchInvoker::new(Arc::new(runner));
    invoker.invoke(task(1)).unwrap();
    invoker.invoke(task(2)).unwrap();

    let result = invoker.drain(DrainLimit::All, run_dir.path());

    assert!(matches!(result, Err(InvokerError::JobRunner(_))));
    assert_eq!(invoker.len(), 2);
}

#[test]
fn test_batch_drain_creates_run_dir() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("task");
    let (runner, _calls) = recording_runner();
    let mut invoker = BatchInvoker::new(runner);
    invoker.invoke(task(1)).unwrap();

    invoker.drain(DrainLimit::All, &run_dir).unwrap();

    assert!(run_dir.is_dir());
}

#[test]
fn test_batch_config_is_empty() {
    let (runner, _calls) = recording_runner();
    let invoker = BatchInvoker::new(runner);
    assert!(invoker.config().is_empty());
    assert!(!invoker.time_limit());
}

//
// Queued
//
#[cfg(target_os = "linux")]
#[test]
fn test_queued_ordering_one_payload_per_call() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let mut invoker = QueuedInvoker::with_run_dir(runner, run_dir.path()).unwrap();
    assert_eq!(invoker.state(), QueuedState::Running);

    for i in 0..50 {
        assert_eq!(invoker.invoke(task(i)).unwrap(), Acknowledgment::Enqueued);
    }
    invoker.wait_until_idle();

    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 50);
        for (i, call) in calls.iter().enumerate() {
            assert_eq!(call.jobs, vec![task(i as i64)]);
            assert_eq!(call.run_dir, run_dir.path());
            assert_eq!(call.metadata.invoker, InvokerKind::Queued);
        }
    }

    invoker.wait_until_finished();
    assert_eq!(invoker.state(), QueuedState::Stopped);
}

#[cfg(target_os = "linux")]
#[test]
fn test_queued_concurrent_producers_lose_nothing() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let invoker = QueuedInvoker::with_run_dir(runner, run_dir.path()).unwrap();

    thread::scope(|s| {
        for producer in 0..4 {
            let handle = invoker.producer();
            s.spawn(move || {
                for i in 0..100 {
                    handle.invoke(task(producer * 1000 + i)).unwrap();
                }
            });
        }
        // the invoker itself is shared by reference as well
        s.spawn(|| {
            for i in 0..100 {
                invoker.invoke(task(9000 + i)).unwrap();
            }
        });
    });
    invoker.wait_until_idle();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 500);
    assert!(calls.iter().all(|call| call.jobs.len() == 1));

    // each producer's payloads keep their relative order
    for producer in [0, 1, 2, 3, 9] {
        let seen: Vec<i64> = calls
            .iter()
            .map(|call| call.jobs[0].get("task").unwrap().as_i64().unwrap())
            .filter(|n| n / 1000 == producer)
            .collect();
        assert_eq!(seen, (0..100).map(|i| producer * 1000 + i).collect::<Vec<_>>());
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_queued_runner_failures_do_not_stop_consumer() {
    let run_dir = tempfile::tempdir().unwrap();
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executed_for_runner = executed.clone();
    global_config::use_scratch_temp_dir();
    let runner = ClosureJobRunner::new("flaky runner", move |jobs, _, _| {
        let n = jobs[0].get("task").unwrap().as_i64().unwrap();
        match n {
            1 => anyhow::bail!("intentional failure"),
            2 => panic!("intentional test panic"),
            _ => {
                executed_for_runner.lock().unwrap().push(n);
                Ok(())
            }
        }
    });
    let invoker = QueuedInvoker::with_run_dir(Arc::new(runner), run_dir.path()).unwrap();

    for i in 0..4 {
        invoker.invoke(task(i)).unwrap();
    }
    invoker.wait_until_idle();

    assert_eq!(*executed.lock().unwrap(), vec![0, 3]);
    assert_eq!(invoker.state(), QueuedState::Running);
}

#[cfg(target_os = "linux")]
#[test]
fn test_queued_stop_finishes_remaining_payloads() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let mut invoker = QueuedInvoker::with_run_dir(runner, run_dir.path()).unwrap();

    for i in 0..20 {
        invoker.invoke(task(i)).unwrap();
    }
    invoker.stop();
    assert!(matches!(invoker.invoke(task(99)), Err(InvokerError::Stopped)));

    invoker.wait_until_finished();

    assert_eq!(calls.lock().unwrap().len(), 20);
    assert_eq!(invoker.pending(), 0);
    assert_eq!(invoker.state(), QueuedState::Stopped);
}

#[cfg(target_os = "linux")]
#[test]
fn test_queued_cancel_discards_unstarted_payloads() {
    let run_dir = tempfile::tempdir().unwrap();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executed_for_runner = executed.clone();
    global_config::use_scratch_temp_dir();
    let runner = ClosureJobRunner::new("gated runner", move |jobs, _, _| {
        let n = jobs[0].get("task").unwrap().as_i64().unwrap();
        if n == 0 {
            started_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
        executed_for_runner.lock().unwrap().push(n);
        Ok(())
    });
    let mut invoker = QueuedInvoker::with_run_dir(Arc::new(runner), run_dir.path()).unwrap();

    for i in 0..5 {
        invoker.invoke(task(i)).unwrap();
    }
    started_rx.recv().unwrap();
    invoker.cancel();
    release_tx.send(()).unwrap();
    invoker.wait_until_finished();

    assert_eq!(*executed.lock().unwrap(), vec![0]);
    assert_eq!(invoker.pending(), 0);
}

#[cfg(target_os = "linux")]
#[test]
fn test_queued_config_is_empty() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, _calls) = recording_runner();
    let invoker = QueuedInvoker::with_run_dir(runner, run_dir.path()).unwrap();
    assert!(Invoker::config(&invoker).is_empty());
    assert_eq!(Invoker::kind(&invoker), InvokerKind::Queued);
    assert_eq!(invoker.run_dir(), run_dir.path());
}

#[cfg(not(target_os = "linux"))]
#[test]
fn test_queued_requires_linux() {
    let (runner, _calls) = recording_runner();
    let result = QueuedInvoker::new(runner);
    assert!(matches!(result, Err(InvokerError::PlatformUnsupported { .. })));
}

//
// Remote
//
#[derive(Default)]
struct FakeClient {
    calls: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
    answer: Option<RemoteAcknowledgment>,
    unavailable: bool,
}

impl RemoteFunctionClient for FakeClient {
    fn invoke_async(
        &self,
        function: &str,
        region: &str,
        payload: &[u8],
    ) -> Result<RemoteAcknowledgment, TransportError> {
        self.calls.lock().unwrap().push((
            function.to_string(),
            region.to_string(),
            serde_json::from_slice(payload).unwrap(),
        ));
        if self.unavailable {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        Ok(self.answer.clone().unwrap_or_else(RemoteAcknowledgment::accepted))
    }
}

#[test]
fn test_remote_config_has_exactly_identity_keys() {
    let invoker = RemoteFunctionInvoker::new("us-east-1", "f1", Box::new(FakeClient::default()));
    let config = invoker.config();
    assert_eq!(config.len(), 2);
    assert_eq!(config.get("region_identity"), Some("us-east-1"));
    assert_eq!(config.get("function_identity"), Some("f1"));
    assert!(invoker.time_limit());
}

#[test]
fn test_remote_invoke_issues_one_request() {
    let client = FakeClient {
        answer: Some(RemoteAcknowledgment {
            request_id: Some("req-1".into()),
            ..RemoteAcknowledgment::accepted()
        }),
        ..FakeClient::default()
    };
    let calls = client.calls.clone();
    let mut invoker = RemoteFunctionInvoker::new("eu-west-1", "worker", Box::new(client));

    let ack = invoker.invoke(task(7)).unwrap();

    assert_eq!(
        ack,
        Acknowledgment::Dispatched {
            request_id: Some("req-1".into())
        }
    );
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        ("worker".to_string(), "eu-west-1".to_string(), serde_json::json!({"task": 7}))
    );
}

#[test]
fn test_remote_transport_error_propagates() {
    let client = FakeClient {
        unavailable: true,
        ..FakeClient::default()
    };
    let calls = client.calls.clone();
    let mut invoker = RemoteFunctionInvoker::new("us-east-1", "f1", Box::new(client));

    let result = invoker.invoke(task(1));

    assert!(matches!(result, Err(InvokerError::Transport { .. })));
    // no retry
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn test_remote_rejection_is_distinguishable() {
    let throttled = FakeClient {
        answer: Some(RemoteAcknowledgment {
            status_code: 429,
            request_id: None,
            function_error: None,
        }),
        ..FakeClient::default()
    };
    let mut invoker = RemoteFunctionInvoker::new("us-east-1", "f1", Box::new(throttled));
    match invoker.invoke(task(1)) {
        Err(InvokerError::InvocationRejected { status, function, .. }) => {
            assert_eq!(status, 429);
            assert_eq!(function, "f1");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    let failed = FakeClient {
        answer: Some(RemoteAcknowledgment {
            function_error: Some("Unhandled".into()),
            ..RemoteAcknowledgment::accepted()
        }),
        ..FakeClient::default()
    };
    let mut invoker = RemoteFunctionInvoker::new("us-east-1", "f1", Box::new(failed));
    assert!(matches!(
        invoker.invoke(task(1)),
        Err(InvokerError::InvocationRejected { status: 202, .. })
    ));
}

//
// Closed set of variants
//
#[test]
fn test_any_invoker_delegates() {
    let run_dir = tempfile::tempdir().unwrap();
    let (runner, calls) = recording_runner();
    let mut invokers: Vec<AnyInvoker> = vec![
        RemoteFunctionInvoker::new("us-east-1", "f1", Box::new(FakeClient::default())).into(),
        BatchInvoker::new(runner).into(),
    ];

    for invoker in invokers.iter_mut() {
        invoker.invoke(task(1)).unwrap();
    }

    assert_eq!(invokers[0].kind(), InvokerKind::Remote);
    assert_eq!(invokers[0].config().len(), 2);
    assert!(invokers[0].as_batch_mut().is_none());
    let batch = invokers[1].as_batch_mut().unwrap();
    assert_eq!(batch.len(), 1);
    batch.drain(DrainLimit::All, run_dir.path()).unwrap();
    assert_eq!(calls.lock().unwrap()[0].jobs, vec![task(1)]);
}
