//! Tests for the exporter run loop.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use crate::catalog::Catalog;
use crate::credentials::StaticCredential;
use crate::error::{Error, ExportError, FailureReason};
use crate::types::{Batch, Event};

use super::test_helpers::{
    RotatingCredential, ScriptedClient, files, payload, test_config, unauthorized,
};
use super::{Exporter, RunOptions};

fn static_token() -> Arc<StaticCredential> {
    Arc::new(StaticCredential::new("token-0"))
}

fn zip_files_in(dir: &std::path::Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

// -----------------------------------------------------------------------
// End-to-end scenarios
// -----------------------------------------------------------------------

#[tokio::test]
async fn scenario_all_batches_succeed() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok());
    let exporter = Exporter::new(test_config(dir.path()), client.clone(), static_token())
        .unwrap()
        .with_run_id("run-a");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);
    let options = RunOptions::with_progress(move |completed, total| {
        seen.lock().unwrap().push((completed, total));
    });

    let catalog = Catalog::new(files(250)).unwrap();
    let report = exporter.export_catalog(&catalog, options).await.unwrap();

    assert_eq!(report.total_batches, 3);
    assert_eq!(report.succeeded.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(report.failed.is_empty());
    assert!(report.is_complete_success());
    assert!(report.finished_at.is_some());
    assert_eq!(client.total_calls(), 3);

    assert_eq!(
        zip_files_in(dir.path()),
        vec!["OneDrive_run-a_1.zip", "OneDrive_run-a_2.zip", "OneDrive_run-a_3.zip"]
    );
    let second = std::fs::read(&report.artifacts[&2]).unwrap();
    assert_eq!(second, payload(2).to_vec());
    assert_eq!(
        report.bytes_written,
        (1..=3).map(|n| payload(n).len() as u64).sum::<u64>()
    );

    let progress = progress.lock().unwrap();
    assert_eq!(*progress, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn scenario_rejected_batch_writes_nothing() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|_, _, _| {
        Err(ExportError::ServerRejected {
            status: 400,
            message: "malformed items".to_string(),
        })
    }));
    let exporter = Exporter::new(test_config(dir.path()), client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(5)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.total_batches, 1);
    assert!(report.succeeded.is_empty());
    assert!(matches!(
        report.failed[&1],
        FailureReason::ServerRejected {
            http_status: 400,
            ..
        }
    ));
    assert_eq!(client.calls_for(1), 1, "rejected payloads are not retried");
    assert!(zip_files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn scenario_empty_catalog_makes_no_calls() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok());
    let exporter = Exporter::new(test_config(dir.path()), client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(vec![]).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.total_batches, 0);
    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(client.total_calls(), 0);
}

// -----------------------------------------------------------------------
// Isolation and retry
// -----------------------------------------------------------------------

#[tokio::test]
async fn auth_failure_on_one_batch_does_not_stop_others() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, _, _| {
        if batch == 2 {
            Err(unauthorized())
        } else {
            Ok(payload(batch))
        }
    }));
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 10;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(50)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded.iter().copied().collect::<Vec<_>>(), vec![1, 3, 4, 5]);
    assert_eq!(report.failed_batch_numbers(), vec![2]);
    assert!(report.failed[&2].is_auth());
    assert_eq!(report.failed[&2].http_status(), Some(401));
    assert_eq!(client.calls_for(2), 1, "auth failures are not retried");
}

#[tokio::test]
async fn first_batch_auth_failure_does_not_stop_a_sequential_run() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, _, _| {
        if batch == 1 {
            Err(unauthorized())
        } else {
            Ok(payload(batch))
        }
    }));
    let provider = Arc::new(RotatingCredential::new());
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    config.export.concurrency = 1;
    let exporter = Exporter::new(config, client.clone(), provider.clone()).unwrap();

    let catalog = Catalog::new(files(5)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.failed_batch_numbers(), vec![1]);
    assert!(report.failed[&1].is_auth());
    assert_eq!(
        report.succeeded.iter().copied().collect::<Vec<_>>(),
        vec![2, 3, 4, 5]
    );
    assert_eq!(client.total_calls(), 5);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_batch_auth_failure_with_unrefreshable_token_does_not_stop_a_sequential_run() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, _, _| {
        if batch == 1 {
            Err(unauthorized())
        } else {
            Ok(payload(batch))
        }
    }));
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    config.export.concurrency = 1;
    config.export.auth_failure_sample = Some(1);
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(5)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.failed_batch_numbers(), vec![1]);
    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(client.total_calls(), 5);
}

#[tokio::test]
async fn transient_failures_are_retried_exactly_max_attempts_times() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, _, _| {
        if batch == 1 {
            Err(ExportError::Transient {
                status: Some(503),
                message: "busy".to_string(),
            })
        } else {
            Ok(payload(batch))
        }
    }));
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 2;
    config.retry.max_attempts = 4;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();
    let mut events = exporter.subscribe();

    let catalog = Catalog::new(files(4)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(client.calls_for(1), 4);
    assert_eq!(client.calls_for(2), 1);
    assert!(matches!(
        report.failed[&1],
        FailureReason::Transient {
            http_status: Some(503),
            ..
        }
    ));
    assert!(report.succeeded.contains(&2));

    let mut retries = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::BatchRetrying { batch, attempt, .. } = event {
            retries.push((batch, attempt));
        }
    }
    assert_eq!(retries, vec![(1, 1), (1, 2), (1, 3)]);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, call, _| {
        if call == 1 {
            Err(ExportError::Network("connection reset".to_string()))
        } else {
            Ok(payload(batch))
        }
    }));
    let exporter = Exporter::new(test_config(dir.path()), client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(3)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_complete_success());
    assert_eq!(client.calls_for(1), 2);
}

#[tokio::test]
async fn slow_calls_time_out_and_are_retried() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok().with_delay(Duration::from_millis(500)));
    let mut config = test_config(dir.path());
    config.export.request_timeout = Duration::from_millis(50);
    config.retry.max_attempts = 2;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(1)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(client.calls_for(1), 2);
    match &report.failed[&1] {
        FailureReason::Transient {
            message,
            http_status,
        } => {
            assert!(message.contains("timed out"), "got {message}");
            assert_eq!(*http_status, None);
        }
        other => panic!("expected transient timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrency_limit_is_respected() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok().with_delay(Duration::from_millis(20)));
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    config.export.concurrency = 3;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(12)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 12);
    assert!(client.max_in_flight() <= 3, "saw {} in flight", client.max_in_flight());
    assert!(client.max_in_flight() > 1, "batches ran one at a time");
}

// -----------------------------------------------------------------------
// Credentials
// -----------------------------------------------------------------------

#[tokio::test]
async fn auth_failure_refreshes_credential_for_later_batches() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|batch, _, credential| {
        if credential.expose() == "token-0" {
            Err(unauthorized())
        } else {
            Ok(payload(batch))
        }
    }));
    let provider = Arc::new(RotatingCredential::new());
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    config.export.concurrency = 1;
    let exporter = Exporter::new(config, client.clone(), provider.clone()).unwrap();

    let catalog = Catalog::new(files(3)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.failed_batch_numbers(), vec![1]);
    assert_eq!(report.succeeded.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn globally_rejected_credential_stops_the_run() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::new(|_, _, _| Err(unauthorized())));
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    config.export.concurrency = 2;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(20)).unwrap();
    let err = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::CredentialRejected { attempted, report } => {
            assert_eq!(report.completed(), 20, "every batch still has an outcome");
            assert!(report.succeeded.is_empty());
            assert_eq!(report.attempted(), attempted);
            assert!(attempted < 20, "dispatch should stop after the sample");
            assert!(
                report
                    .failed
                    .values()
                    .any(|reason| matches!(reason, FailureReason::Cancelled))
            );
            assert_eq!(client.total_calls() as usize, attempted);
        }
        other => panic!("expected CredentialRejected, got {other:?}"),
    }
}

// -----------------------------------------------------------------------
// Cancellation, persistence, validation
// -----------------------------------------------------------------------

#[tokio::test]
async fn cancelled_run_dispatches_nothing_and_still_reports() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok());
    let exporter = Exporter::new(test_config(dir.path()), client.clone(), static_token()).unwrap();

    let options = RunOptions::default();
    options.cancel.cancel();

    let catalog = Catalog::new(files(250)).unwrap();
    let report = exporter.export_catalog(&catalog, options).await.unwrap();

    assert_eq!(client.total_calls(), 0);
    assert_eq!(report.completed(), 3);
    assert!(report.failed.values().all(FailureReason::is_cancelled));
}

#[tokio::test]
async fn write_failure_is_recorded_per_batch() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("exports");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let client = Arc::new(ScriptedClient::always_ok());
    let exporter = Exporter::new(test_config(&blocker), client.clone(), static_token()).unwrap();

    let catalog = Catalog::new(files(3)).unwrap();
    let report = exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    assert!(matches!(report.failed[&1], FailureReason::WriteError { .. }));
    assert!(report.succeeded.is_empty());
    assert_eq!(client.calls_for(1), 1, "write errors are not retried");
}

#[tokio::test]
async fn malformed_batches_are_rejected_before_dispatch() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 2;
    let exporter = Exporter::new(config, client.clone(), static_token()).unwrap();

    let oversized = vec![Batch::new(1, files(3))];
    let err = exporter
        .run(oversized, RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let duplicated = vec![Batch::new(1, files(1)), Batch::new(1, files(1))];
    assert!(matches!(
        exporter.run(duplicated, RunOptions::default()).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.export.concurrency = 0;
    let result = Exporter::new(config, Arc::new(ScriptedClient::always_ok()), static_token());
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn rerun_failed_only_sends_failed_batches() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 2;
    let catalog = Catalog::new(files(6)).unwrap();

    let flaky = Arc::new(ScriptedClient::new(|batch, _, _| {
        if batch == 2 {
            Err(ExportError::ServerRejected {
                status: 413,
                message: "too large".to_string(),
            })
        } else {
            Ok(payload(batch))
        }
    }));
    let first = Exporter::new(config.clone(), flaky, static_token())
        .unwrap()
        .with_run_id("nightly");
    let report = first
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.failed_batch_numbers(), vec![2]);

    let healthy = Arc::new(ScriptedClient::always_ok());
    let second = Exporter::new(config, healthy.clone(), static_token())
        .unwrap()
        .with_run_id("nightly");
    let rerun = second
        .rerun_failed(&catalog, &report, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(rerun.total_batches, 1);
    assert_eq!(rerun.succeeded.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(healthy.total_calls(), 1);
    assert_eq!(healthy.calls_for(2), 1);
    assert_eq!(
        zip_files_in(dir.path()),
        vec!["OneDrive_nightly_1.zip", "OneDrive_nightly_2.zip", "OneDrive_nightly_3.zip"]
    );
}

#[tokio::test]
async fn events_bracket_the_run() {
    let dir = tempdir().unwrap();
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = test_config(dir.path());
    config.export.max_batch_size = 1;
    let exporter = Exporter::new(config, client, static_token()).unwrap();
    let mut events = exporter.subscribe();

    let catalog = Catalog::new(files(3)).unwrap();
    exporter
        .export_catalog(&catalog, RunOptions::default())
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(
        received.first(),
        Some(Event::RunStarted {
            total_batches: 3,
            ..
        })
    ));
    assert!(matches!(
        received.last(),
        Some(Event::RunFinished {
            succeeded: 3,
            failed: 0
        })
    ));
    let progress: Vec<usize> = received
        .iter()
        .filter_map(|e| match e {
            Event::Progress { completed, .. } => Some(*completed),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3]);
    let started = received
        .iter()
        .filter(|e| matches!(e, Event::BatchStarted { .. }))
        .count();
    assert_eq!(started, 3);
}
