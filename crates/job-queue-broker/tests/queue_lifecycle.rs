mod common;

use chrono::Utc;
use job_queue_core::{JobError, JobStatus, RetryDecision, RetryPolicy};
use job_queue_persistence::MemoryJobStore;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_fresh_job_status() {
    let queue = common::memory_queue();
    let before = Utc::now();
    let id = queue
        .add_job("image-integration", json!({"postId": 12, "images": ["hero.png"]}), 3)
        .unwrap();

    let job = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert!(job.created_at >= before);
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());
    assert!(job.result.is_none());
    assert!(job.error.is_none());
}

#[test]
fn test_unknown_id_has_no_status() {
    let queue = common::memory_queue();
    assert!(queue.get_job_status(&uuid::Uuid::now_v7()).unwrap().is_none());
}

#[test]
fn test_success_path() {
    let queue = common::memory_queue();
    let id = queue.add_job("post-mutation", json!({"slug": "hello"}), 3).unwrap();

    let claimed = queue.claim_next().unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert!(queue.claim_next().unwrap().is_none());

    queue.complete(&id, json!({"updated": true})).unwrap();

    let job = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.result, Some(json!({"updated": true})));
    let started = job.started_at.unwrap();
    let completed = job.completed_at.unwrap();
    assert!(job.created_at <= started && started <= completed);
}

#[test]
fn test_complete_on_terminal_job_is_rejected() {
    let queue = common::memory_queue();
    let id = queue.add_job("echo", json!(1), 0).unwrap();
    queue.claim_next().unwrap().unwrap();
    queue.complete(&id, json!("first")).unwrap();

    let err = queue.complete(&id, json!("second")).unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidTransition {
            from: JobStatus::Succeeded,
            to: JobStatus::Succeeded,
            ..
        }
    ));
    let job = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(job.result, Some(json!("first")));

    assert!(matches!(
        queue.fail(&id, "late failure"),
        Err(JobError::InvalidTransition { from: JobStatus::Succeeded, .. })
    ));
}

#[test]
fn test_complete_on_queued_job_is_rejected() {
    let queue = common::memory_queue();
    let id = queue.add_job("echo", json!(1), 0).unwrap();
    assert!(matches!(
        queue.complete(&id, json!(null)),
        Err(JobError::InvalidTransition { from: JobStatus::Queued, .. })
    ));
}

#[test]
fn test_two_retries_then_permanent_failure() {
    let queue = common::memory_queue();
    let id = queue.add_job("image-integration", json!({"postId": 3}), 2).unwrap();

    for attempt in 1..=2 {
        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, id);
        let decision = queue.fail(&id, "boom").unwrap();
        assert!(matches!(decision, RetryDecision::Requeued { retry_count, .. } if retry_count == attempt));

        let job = queue.get_job_status(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, attempt);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    queue.claim_next().unwrap().unwrap();
    let decision = queue.fail(&id, "boom").unwrap();
    assert_eq!(decision, RetryDecision::Exhausted { retry_count: 2 });

    let job = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert!(job.completed_at.is_some());
    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn test_new_attempt_clears_previous_error() {
    let queue = common::memory_queue();
    let id = queue.add_job("post-mutation", json!({"slug": "retry-me"}), 1).unwrap();

    queue.claim_next().unwrap().unwrap();
    queue.fail(&id, "boom").unwrap();
    let queued = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(queued.error.as_deref(), Some("boom"));

    let second = queue.claim_next().unwrap().unwrap();
    assert_eq!(second.id, id);
    assert_eq!(second.error, None);

    let running = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.retry_count, 1);
    assert_eq!(running.error, None);
}

#[test]
fn test_backoff_delays_next_claim() {
    let queue = common::queue_over(
        Arc::new(MemoryJobStore::new()),
        RetryPolicy::new(60_000, 60_000),
    );
    let id = queue.add_job("echo", json!(null), 1).unwrap();
    queue.claim_next().unwrap().unwrap();

    let decision = queue.fail(&id, "transient").unwrap();
    let RetryDecision::Requeued { available_at, .. } = decision else {
        panic!("expected a re-queue, got {:?}", decision);
    };
    assert!(available_at > Utc::now());

    // Still queued, but not claimable until the backoff elapses.
    assert_eq!(queue.get_queue_stats().unwrap().queued, 1);
    assert!(queue.claim_next().unwrap().is_none());
}

#[test]
fn test_zero_max_retries_fails_on_first_error() {
    let queue = common::memory_queue();
    let id = queue.add_job("echo", json!(null), 0).unwrap();
    queue.claim_next().unwrap().unwrap();

    assert_eq!(
        queue.fail(&id, "nope").unwrap(),
        RetryDecision::Exhausted { retry_count: 0 }
    );
    assert_eq!(queue.get_job_status(&id).unwrap().unwrap().status, JobStatus::Failed);
}

#[test]
fn test_retry_failed_job_creates_new_job() {
    let queue = common::memory_queue();
    let payload = json!({"postId": 99, "images": ["a.jpg", "b.jpg"]});
    let id = queue.add_job("image-integration", payload.clone(), 0).unwrap();
    queue.claim_next().unwrap().unwrap();
    queue.fail(&id, "upstream timeout").unwrap();

    let new_id = queue.retry_failed_job(&id).unwrap();
    assert_ne!(new_id, id);

    let fresh = queue.get_job_status(&new_id).unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Queued);
    assert_eq!(fresh.payload, payload);
    assert_eq!(fresh.job_type.as_str(), "image-integration");
    assert_eq!(fresh.retry_count, 0);

    let original = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed);
    assert_eq!(original.error.as_deref(), Some("upstream timeout"));
}

#[test]
fn test_retry_after_exhausted_budget_resets_retry_count() {
    let queue = common::memory_queue();
    let payload = json!({"postId": 41});
    let id = queue.add_job("image-integration", payload.clone(), 1).unwrap();

    for _ in 0..2 {
        queue.claim_next().unwrap().unwrap();
        queue.fail(&id, "x").unwrap();
    }
    let original = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed);
    assert_eq!(original.retry_count, 1);
    assert_eq!(original.max_retries, 1);
    assert_eq!(original.error.as_deref(), Some("x"));

    let new_id = queue.retry_failed_job(&id).unwrap();
    let fresh = queue.get_job_status(&new_id).unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Queued);
    assert_eq!(fresh.retry_count, 0);
    assert_eq!(fresh.max_retries, 1);
    assert_eq!(fresh.payload, payload);
    assert!(fresh.error.is_none());

    let original = queue.get_job_status(&id).unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed);
    assert_eq!(original.retry_count, 1);
}

#[test]
fn test_retry_non_failed_job_is_rejected() {
    let queue = common::memory_queue();
    let id = queue.add_job("echo", json!(null), 3).unwrap();

    assert!(matches!(
        queue.retry_failed_job(&id),
        Err(JobError::InvalidState { status: JobStatus::Queued, .. })
    ));
    assert!(matches!(
        queue.retry_failed_job(&uuid::Uuid::now_v7()),
        Err(JobError::NotFound(_))
    ));
    assert_eq!(queue.get_queue_stats().unwrap().total(), 1);
}

#[test]
fn test_stats_sum_to_records_present() {
    let queue = common::memory_queue();
    let ids: Vec<_> = (0..6)
        .map(|n| queue.add_job("echo", json!(n), 0).unwrap())
        .collect();

    for _ in 0..4 {
        queue.claim_next().unwrap().unwrap();
    }
    queue.complete(&ids[0], json!("ok")).unwrap();
    queue.complete(&ids[1], json!("ok")).unwrap();
    queue.fail(&ids[2], "bad").unwrap();

    let stats = queue.get_queue_stats().unwrap();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total(), 6);
}

#[test]
fn test_claims_are_oldest_first() {
    let queue = common::memory_queue();
    let first = queue.add_job("echo", json!(1), 0).unwrap();
    let second = queue.add_job("post-mutation", json!(2), 0).unwrap();
    let third = queue.add_job("echo", json!(3), 0).unwrap();

    let order: Vec<_> = std::iter::from_fn(|| queue.claim_next().unwrap())
        .map(|job| job.id)
        .collect();
    assert_eq!(order, vec![first, second, third]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_never_share_a_job() {
    let queue = common::memory_queue();
    for n in 0..10 {
        queue.add_job("echo", json!(n), 0).unwrap();
    }

    let claims: Vec<_> = (0..50)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim_next().unwrap() })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in futures::future::join_all(claims).await {
        if let Some(job) = handle.unwrap() {
            claimed.push(job.id);
        }
    }

    let distinct: HashSet<_> = claimed.iter().collect();
    assert_eq!(claimed.len(), 10);
    assert_eq!(distinct.len(), 10);
    assert_eq!(queue.get_queue_stats().unwrap().running, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_outcomes_race_safely() {
    let queue = common::memory_queue();
    let id = queue.add_job("echo", json!(null), 3).unwrap();
    queue.claim_next().unwrap().unwrap();

    let completer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.complete(&id, json!("done")).is_ok() })
    };
    let failer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.fail(&id, "boom").is_ok() })
    };

    let (completed, failed) = (completer.await.unwrap(), failer.await.unwrap());
    assert!(completed ^ failed, "exactly one outcome must win");

    let job = queue.get_job_status(&id).unwrap().unwrap();
    if completed {
        assert_eq!(job.status, JobStatus::Succeeded);
    } else {
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 1);
    }
}

#[test]
fn test_recover_interrupted_routes_through_failure() {
    let queue = common::memory_queue();
    let retryable = queue.add_job("echo", json!(1), 1).unwrap();
    let exhausted = queue.add_job("echo", json!(2), 0).unwrap();
    let untouched = queue.add_job("echo", json!(3), 0).unwrap();
    queue.claim_next().unwrap().unwrap();
    queue.claim_next().unwrap().unwrap();

    assert_eq!(queue.recover_interrupted().unwrap(), 2);

    let job = queue.get_job_status(&retryable).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error.as_deref(), Some("interrupted by process restart"));

    assert_eq!(queue.get_job_status(&exhausted).unwrap().unwrap().status, JobStatus::Failed);
    assert_eq!(queue.get_job_status(&untouched).unwrap().unwrap().status, JobStatus::Queued);
    assert_eq!(queue.recover_interrupted().unwrap(), 0);
}
