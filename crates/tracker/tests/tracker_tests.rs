//! Integration tests for `JobTracker` submission, status, result and
//! record operations, run against the scripted queue client.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{result_for, tracker, Step, MODEL};
use genq_core::job_status::JobStatus;
use genq_queue::client::GenerationRequest;
use genq_queue::error::QueueError;
use genq_tracker::error::TrackerError;
use genq_tracker::events::TrackerEvent;
use genq_tracker::record::JobErrorKind;
use serde_json::json;

fn prompt() -> GenerationRequest {
    GenerationRequest::new(json!({ "prompt": "a lighthouse at dusk", "num_images": 1 }))
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_creates_submitted_record_on_default_model() {
    let (client, tracker) = tracker();

    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    let record = tracker.get_request(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Submitted);
    assert_eq!(record.model, MODEL);
    assert_eq!(record.poll_attempts, 0);
    assert!(record.metadata.is_none());
    assert_eq!(client.submits(), 1);
}

#[tokio::test]
async fn submit_uses_explicit_model() {
    let (_client, tracker) = tracker();

    let id = tracker
        .submit_to_queue(&prompt().with_model("fal-ai/fast-sdxl"))
        .await
        .unwrap();

    assert_eq!(tracker.get_request(&id).await.unwrap().model, "fal-ai/fast-sdxl");
}

#[tokio::test]
async fn submit_with_tracking_round_trips_metadata() {
    let (_client, tracker) = tracker();
    let metadata = json!({ "pipeline": "storyboard", "scene": 12, "tags": ["draft"] });

    let id = tracker
        .submit_to_queue_with_tracking(&prompt(), metadata.clone())
        .await
        .unwrap();

    assert_eq!(tracker.get_request(&id).await.unwrap().metadata, Some(metadata));
}

#[tokio::test]
async fn invalid_input_is_rejected_without_network_call() {
    let (client, tracker) = tracker();

    let err = tracker
        .submit_to_queue(&GenerationRequest::new(json!("just a string")))
        .await
        .unwrap_err();

    assert_matches!(err, TrackerError::Validation(_));
    assert_eq!(client.submits(), 0);
    assert_eq!(tracker.tracked_count().await, 0);
}

#[tokio::test]
async fn invalid_model_is_rejected_without_network_call() {
    let (client, tracker) = tracker();

    let err = tracker
        .submit_to_queue(&prompt().with_model("fal-ai//flux"))
        .await
        .unwrap_err();

    assert_matches!(err, TrackerError::Validation(_));
    assert_eq!(client.submits(), 0);
}

#[tokio::test]
async fn failed_submission_creates_no_record() {
    let (client, tracker) = tracker();
    client.fail_submissions();

    let err = tracker.submit_to_queue(&prompt()).await.unwrap_err();

    assert!(err.is_retryable());
    assert_matches!(
        err,
        TrackerError::Submit { ref model, source: QueueError::Api { status: 503, .. } } if model == MODEL
    );
    assert_eq!(client.submits(), 1);
    assert_eq!(tracker.tracked_count().await, 0);
}

#[tokio::test]
async fn submit_publishes_event() {
    let (_client, tracker) = tracker();
    let mut events = tracker.subscribe();

    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        TrackerEvent::Submitted {
            request_id: id,
            model: MODEL.to_string(),
        }
    );
}

// ---------------------------------------------------------------------------
// Status checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_status_moves_job_through_state_machine() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Queued, Step::Running, Step::Completed]);

    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::Submitted);
    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::InProgress);
    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::Completed);

    let record = tracker.get_request(&id).await.unwrap();
    assert_eq!(record.poll_attempts, 3);
    assert!(record.completed_at.is_some());
    assert!(record.last_checked_at.is_some());
}

#[tokio::test]
async fn terminal_job_answers_without_network_call() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Completed]);
    tracker.check_queue_status(&id).await.unwrap();
    let checks = client.status_checks();

    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::Completed);
    assert_eq!(client.status_checks(), checks);
}

#[tokio::test]
async fn check_status_of_unknown_id_is_not_found() {
    let (client, tracker) = tracker();

    assert_matches!(
        tracker.check_queue_status("never-submitted").await,
        Err(TrackerError::NotFound(id)) if id == "never-submitted"
    );
    assert_eq!(client.status_checks(), 0);
}

#[tokio::test]
async fn remote_not_found_fails_job_immediately() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::NotFound]);

    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::Failed);

    let record = tracker.get_request(&id).await.unwrap();
    assert_eq!(record.error.unwrap().kind, JobErrorKind::NotFound);
}

#[tokio::test]
async fn transport_failures_fail_job_at_threshold() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Transport]);

    for expected_failures in 1..=2 {
        let err = tracker.check_queue_status(&id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_matches!(err, TrackerError::Queue { ref request_id, .. } if *request_id == id);

        let record = tracker.get_request(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Submitted);
        assert_eq!(record.consecutive_failures, expected_failures);
    }

    assert_eq!(tracker.check_queue_status(&id).await.unwrap(), JobStatus::Failed);
    let record = tracker.get_request(&id).await.unwrap();
    assert_eq!(record.poll_attempts, 3);
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Transport);
}

#[tokio::test]
async fn successful_check_resets_failure_count() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Transport, Step::Transport, Step::Running, Step::Transport]);

    for _ in 0..2 {
        assert!(tracker.check_queue_status(&id).await.is_err());
    }
    tracker.check_queue_status(&id).await.unwrap();
    assert_eq!(tracker.get_request(&id).await.unwrap().consecutive_failures, 0);

    assert!(tracker.check_queue_status(&id).await.is_err());
    let record = tracker.get_request(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::InProgress);
    assert_eq!(record.consecutive_failures, 1);
}

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_reports_completed_and_not_found_in_one_call() {
    let (client, tracker) = tracker();
    let a = tracker.submit_to_queue(&prompt()).await.unwrap();
    let b = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&a, [Step::Completed]);
    client.script(&b, [Step::NotFound]);

    let outcomes = tracker.batch_check_status(&[a.clone(), b.clone()]).await;

    assert_eq!(outcomes.len(), 2);
    assert_matches!(outcomes[&a], Ok(JobStatus::Completed));
    assert_matches!(outcomes[&b], Ok(JobStatus::Failed));
    assert_eq!(client.status_checks(), 2);
}

#[tokio::test]
async fn batch_isolates_transport_failure() {
    let (client, tracker) = tracker();
    let ok = tracker.submit_to_queue(&prompt()).await.unwrap();
    let flaky = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&ok, [Step::Running]);
    client.script(&flaky, [Step::Transport]);

    let outcomes = tracker.batch_check_status(&[ok.clone(), flaky.clone()]).await;

    assert_matches!(outcomes[&ok], Ok(JobStatus::InProgress));
    assert_matches!(&outcomes[&flaky], Err(TrackerError::Queue { .. }));
    assert_eq!(
        tracker.get_request(&flaky).await.unwrap().status,
        JobStatus::Submitted
    );
}

#[tokio::test]
async fn batch_reports_unknown_and_terminal_ids_without_network() {
    let (client, tracker) = tracker();
    let done = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&done, [Step::Completed]);
    tracker.check_queue_status(&done).await.unwrap();
    let checks = client.status_checks();

    let outcomes = tracker
        .batch_check_status(&[done.clone(), "ghost".to_string()])
        .await;

    assert_matches!(outcomes[&done], Ok(JobStatus::Completed));
    assert_matches!(&outcomes["ghost"], Err(TrackerError::NotFound(_)));
    assert_eq!(client.status_checks(), checks);
}

#[tokio::test]
async fn batch_checks_duplicate_ids_once() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Running]);

    let outcomes = tracker
        .batch_check_status(&[id.clone(), id.clone(), id.clone()])
        .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(client.status_checks(), 1);
    assert_eq!(tracker.get_request(&id).await.unwrap().poll_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn batch_concurrency_is_bounded() {
    let config = genq_tracker::config::TrackerConfig {
        batch_concurrency: 3,
        ..common::test_config()
    };
    let (client, tracker) = common::tracker_with(config);
    client.delay_status_checks(Duration::from_millis(500));

    let mut ids = Vec::new();
    for _ in 0..10 {
        let id = tracker.submit_to_queue(&prompt()).await.unwrap();
        client.script(&id, [Step::Running]);
        ids.push(id);
    }

    let outcomes = tracker.batch_check_status(&ids).await;

    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.values().all(|o| matches!(o, Ok(JobStatus::InProgress))));
    assert_eq!(client.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn result_is_fetched_once_and_cached() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Completed]);
    tracker.check_queue_status(&id).await.unwrap();

    let first = tracker.get_queue_result(&id).await.unwrap();
    let second = tracker.get_queue_result(&id).await.unwrap();

    assert_eq!(first, result_for(&id));
    assert_eq!(first, second);
    assert_eq!(client.fetches(), 1);
    assert_eq!(tracker.get_request(&id).await.unwrap().result, Some(first));
}

#[tokio::test(start_paused = true)]
async fn concurrent_result_requests_share_one_fetch() {
    let (client, tracker) = tracker();
    client.delay_fetches(Duration::from_secs(1));
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Completed]);
    tracker.check_queue_status(&id).await.unwrap();

    let (a, b, c) = tokio::join!(
        tracker.get_queue_result(&id),
        tracker.get_queue_result(&id),
        tracker.get_queue_result(&id),
    );

    assert_eq!(a.unwrap(), result_for(&id));
    assert_eq!(b.unwrap(), result_for(&id));
    assert_eq!(c.unwrap(), result_for(&id));
    assert_eq!(client.fetches(), 1);
}

#[tokio::test]
async fn result_before_terminal_is_not_ready() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    assert_matches!(
        tracker.get_queue_result(&id).await,
        Err(TrackerError::NotReady { status: JobStatus::Submitted, .. })
    );

    client.script(&id, [Step::Running]);
    tracker.check_queue_status(&id).await.unwrap();
    assert_matches!(
        tracker.get_queue_result(&id).await,
        Err(TrackerError::NotReady { status: JobStatus::InProgress, .. })
    );
    assert_eq!(client.fetches(), 0);
}

#[tokio::test]
async fn failed_job_returns_stored_error_without_fetch() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Failed("CUDA out of memory")]);
    tracker.check_queue_status(&id).await.unwrap();

    let err = tracker.get_queue_result(&id).await.unwrap_err();

    assert_matches!(
        err,
        TrackerError::JobFailed { ref error, .. }
            if error.kind == JobErrorKind::Remote && error.message == "CUDA out of memory"
    );
    assert_eq!(client.fetches(), 0);
}

// ---------------------------------------------------------------------------
// Record management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removed_request_is_not_found() {
    let (_client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    let removed = tracker.remove_request(&id).await.unwrap();
    assert_eq!(removed.status, JobStatus::Removed);

    assert_matches!(tracker.get_request(&id).await, Err(TrackerError::NotFound(_)));
    assert_matches!(tracker.check_queue_status(&id).await, Err(TrackerError::NotFound(_)));
    assert_matches!(tracker.get_queue_result(&id).await, Err(TrackerError::NotFound(_)));
    assert_matches!(tracker.remove_request(&id).await, Err(TrackerError::NotFound(_)));
}

#[tokio::test]
async fn completed_request_can_be_removed() {
    let (client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    client.script(&id, [Step::Completed]);
    tracker.check_queue_status(&id).await.unwrap();

    tracker.remove_request(&id).await.unwrap();

    assert_matches!(tracker.get_request(&id).await, Err(TrackerError::NotFound(_)));
    assert_eq!(tracker.tracked_count().await, 0);
}

#[tokio::test]
async fn status_override_follows_state_machine() {
    let (_client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    let record = tracker
        .update_request_status(&id, JobStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::InProgress);

    let record = tracker
        .update_request_status(&id, JobStatus::Failed)
        .await
        .unwrap();
    assert_eq!(record.error.unwrap().kind, JobErrorKind::Manual);
    assert!(record.completed_at.is_some());

    assert_matches!(
        tracker.update_request_status(&id, JobStatus::InProgress).await,
        Err(TrackerError::Conflict(_))
    );
    assert_matches!(
        tracker.update_request_status(&id, JobStatus::Submitted).await,
        Err(TrackerError::Conflict(_))
    );
    assert_eq!(tracker.get_request(&id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn in_progress_cannot_return_to_submitted() {
    let (_client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();
    tracker
        .update_request_status(&id, JobStatus::InProgress)
        .await
        .unwrap();

    assert_matches!(
        tracker.update_request_status(&id, JobStatus::Submitted).await,
        Err(TrackerError::Conflict(_))
    );
}

#[tokio::test]
async fn status_override_to_removed_removes_record() {
    let (_client, tracker) = tracker();
    let id = tracker.submit_to_queue(&prompt()).await.unwrap();

    let record = tracker
        .update_request_status(&id, JobStatus::Removed)
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Removed);
    assert_matches!(tracker.get_request(&id).await, Err(TrackerError::NotFound(_)));
}
