//! Tests for the background job monitor.

mod helpers;

use std::time::Duration;

use helpers::{embeddings, test_config, Harness, DIMENSION};
use hpcrag_core::{Error, FailureCause, JobStatus};
use hpcrag_jobs::{JobEvent, JobMonitor};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_monitor_drives_job_to_completion() {
    let h = Harness::new();
    let mut events = h.manager.events();
    let record = h
        .manager
        .submit_embedding(&h.document("Aino 60v K1-1.docx"))
        .await
        .unwrap();
    h.cluster.push_states(&["PENDING", "RUNNING"]);
    h.complete_embedding(&record, embeddings(2, DIMENSION), &["a", "b"]);

    let monitor = JobMonitor::new(h.manager.clone()).start();
    let done = h.manager.wait_for_terminal(record.job_id, WAIT).await.unwrap();
    monitor.stop().await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(h.vectors.entities().len(), 2);
    assert_eq!(h.cluster.count("squeue -h -j"), 3);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(JobEvent::Submitted { .. })));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::MonitorStarted)));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::Completed { .. })));
    assert!(matches!(seen.last(), Some(JobEvent::MonitorStopped)));
}

#[tokio::test]
async fn test_monitor_polls_every_in_flight_job() {
    let h = Harness::with_config(test_config().with_max_concurrent_polls(2));
    let mut records = Vec::new();
    for name in [
        "Aino 60v K1-1.docx",
        "Matti 75v M7-54.docx",
        "Väinö 83v M3-2.docx",
    ] {
        let record = h.manager.submit_embedding(&h.document(name)).await.unwrap();
        h.complete_embedding(&record, embeddings(1, DIMENSION), &[name]);
        records.push(record);
    }

    let monitor = JobMonitor::new(h.manager.clone()).start();
    for record in &records {
        let done = h.manager.wait_for_terminal(record.job_id, WAIT).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }
    monitor.stop().await.unwrap();

    assert_eq!(h.vectors.insert_calls(), 3);
    let mut subjects = h.graph.subjects();
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            ("Aino".to_string(), 60),
            ("Matti".to_string(), 75),
            ("Väinö".to_string(), 83),
        ]
    );
    assert!(h.manager.in_flight_jobs().await.is_empty());
}

#[tokio::test]
async fn test_monitor_reports_failures() {
    let h = Harness::new();
    let record = h
        .manager
        .submit_embedding(&h.document("Aino 60v K1-1.docx"))
        .await
        .unwrap();

    let monitor = JobMonitor::new(h.manager.clone()).start();
    let done = h.manager.wait_for_terminal(record.job_id, WAIT).await.unwrap();
    monitor.stop().await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.unwrap().cause, FailureCause::ResultMissing);
}

#[tokio::test]
async fn test_cancel_while_monitored() {
    let h = Harness::new();
    let record = h
        .manager
        .submit_embedding(&h.document("Aino 60v K1-1.docx"))
        .await
        .unwrap();
    h.cluster.push_states(&["RUNNING"; 1000]);

    let monitor = JobMonitor::new(h.manager.clone()).start();
    h.manager.cancel(record.job_id).await.unwrap();
    let done = h.manager.wait_for_terminal(record.job_id, WAIT).await.unwrap();
    monitor.stop().await.unwrap();

    assert_eq!(done.error.unwrap().cause, FailureCause::Cancelled);
    assert_eq!(h.cluster.count("scancel '777'"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_terminal_times_out_without_polling() {
    let h = Harness::new();
    let record = h
        .manager
        .submit_embedding(&h.document("Aino 60v K1-1.docx"))
        .await
        .unwrap();

    let result = h
        .manager
        .wait_for_terminal(record.job_id, Duration::from_secs(30))
        .await;

    assert!(matches!(result, Err(Error::Timeout(_))));
    let still = h.manager.get(record.job_id).await.unwrap();
    assert_eq!(still.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_monitor_stops_promptly() {
    let h = Harness::with_config(test_config().with_poll_interval(60_000));
    let monitor = JobMonitor::new(h.manager.clone()).start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!monitor.is_finished());

    tokio::time::timeout(Duration::from_secs(5), monitor.stop())
        .await
        .expect("monitor did not stop")
        .unwrap();
}
