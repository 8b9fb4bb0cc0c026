//! Retry decisions with exponential backoff.

use crate::{Job, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling on any single backoff delay, whatever the configuration says.
pub const MAX_BACKOFF: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Backoff policy applied when a running job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds. Zero disables backoff.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 3_600_000,
        }
    }
}

/// Outcome of routing a failure through the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Same job re-queued; claimable again from `available_at`.
    Requeued {
        retry_count: u32,
        available_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; job is terminally failed.
    Exhausted { retry_count: u32 },
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// No backoff at all; failed jobs are claimable immediately.
    pub fn immediate() -> Self {
        Self::new(0, 0)
    }

    /// Delay before retry number `retry` (1-based):
    /// `min(base * 2^(retry - 1), max)`, never above `MAX_BACKOFF`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms).min(MAX_BACKOFF)
    }

    /// Apply a failure to a running job: re-queue it with backoff while it
    /// has retries left, otherwise mark it failed.
    pub fn apply(&self, job: &mut Job, error: String, now: DateTime<Utc>) -> Result<RetryDecision> {
        if job.can_retry() {
            let next = job.retry_count + 1;
            let delay = chrono::Duration::from_std(self.delay(next))
                .unwrap_or(chrono::Duration::zero());
            let available_at = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            job.requeue(error, available_at)?;
            Ok(RetryDecision::Requeued {
                retry_count: job.retry_count,
                available_at,
            })
        } else {
            job.fail_terminally(error, now)?;
            Ok(RetryDecision::Exhausted {
                retry_count: job.retry_count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobError, JobStatus, JobType};
    use proptest::prelude::*;
    use serde_json::json;

    fn running_job(max_retries: u32) -> Job {
        let mut job = Job::new(JobType::new("post-mutation").unwrap(), json!({"id": 1}), max_retries);
        job.claim(Utc::now()).unwrap();
        job
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::new(1_000, 5_000);
        assert_eq!(policy.delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay(4), Duration::from_millis(5_000));
        assert_eq!(policy.delay(60), Duration::from_millis(5_000));
    }

    #[test]
    fn test_zero_base_means_no_delay() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(10), Duration::ZERO);
    }

    #[test]
    fn test_oversized_delays_are_capped() {
        let policy = RetryPolicy::new(u64::MAX, u64::MAX);
        assert_eq!(policy.delay(1), MAX_BACKOFF);
        assert_eq!(RetryPolicy::new(1 << 62, 1 << 62).delay(3), MAX_BACKOFF);

        for policy in [RetryPolicy::new(u64::MAX, u64::MAX), RetryPolicy::new(1 << 62, 1 << 62)] {
            let mut job = running_job(1);
            let now = Utc::now();
            let decision = policy.apply(&mut job, "boom".into(), now).unwrap();
            let RetryDecision::Requeued { available_at, .. } = decision else {
                panic!("expected a re-queue, got {:?}", decision);
            };
            assert!(available_at > now);
            assert_eq!(available_at, now + chrono::Duration::from_std(MAX_BACKOFF).unwrap());
        }
    }

    #[test]
    fn test_claim_clears_previous_attempt_error() {
        let mut job = running_job(1);
        RetryPolicy::immediate().apply(&mut job, "boom".into(), Utc::now()).unwrap();
        assert_eq!(job.error.as_deref(), Some("boom"));

        job.claim(Utc::now()).unwrap();
        assert_eq!(job.error, None);
    }

    #[test]
    fn test_failure_with_budget_requeues_same_job() {
        let policy = RetryPolicy::new(1_000, 60_000);
        let mut job = running_job(2);
        let id = job.id;
        let now = Utc::now();

        let decision = policy.apply(&mut job, "boom".into(), now).unwrap();

        assert_eq!(
            decision,
            RetryDecision::Requeued {
                retry_count: 1,
                available_at: now + chrono::Duration::milliseconds(1_000),
            }
        );
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_two_retries_then_terminal() {
        let policy = RetryPolicy::immediate();
        let mut job = running_job(2);

        for expected in 1..=2 {
            let decision = policy.apply(&mut job, format!("attempt {expected}"), Utc::now()).unwrap();
            assert!(matches!(decision, RetryDecision::Requeued { retry_count, .. } if retry_count == expected));
            job.claim(Utc::now()).unwrap();
        }

        let decision = policy.apply(&mut job, "final".into(), Utc::now()).unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { retry_count: 2 });
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("final"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_zero_max_retries_fails_immediately() {
        let mut job = running_job(0);
        let decision = RetryPolicy::default().apply(&mut job, "nope".into(), Utc::now()).unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { retry_count: 0 });
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_apply_rejects_non_running_job() {
        let mut job = Job::new(JobType::new("echo").unwrap(), json!(null), 3);
        let err = RetryPolicy::default().apply(&mut job, "x".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { from: JobStatus::Queued, .. }));
        assert_eq!(job.retry_count, 0);
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic(base in 0u64..100_000, max in 0u64..10_000_000, n in 1u32..200) {
            let policy = RetryPolicy::new(base, max);
            prop_assert!(policy.delay(n) <= policy.delay(n + 1));
            prop_assert!(policy.delay(n) <= Duration::from_millis(max));
            prop_assert!(policy.delay(n) <= MAX_BACKOFF);
        }

        #[test]
        fn prop_retry_count_never_exceeds_budget(max_retries in 0u32..8, failures in 1usize..20) {
            let policy = RetryPolicy::immediate();
            let mut job = running_job(max_retries);
            for _ in 0..failures {
                if job.status != JobStatus::Running {
                    break;
                }
                policy.apply(&mut job, "err".into(), Utc::now()).unwrap();
                prop_assert!(job.retry_count <= job.max_retries);
                if job.status == JobStatus::Queued {
                    job.claim(Utc::now()).unwrap();
                }
            }
        }
    }
}
