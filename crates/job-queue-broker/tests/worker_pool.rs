mod common;

use async_trait::async_trait;
use job_queue_broker::JobQueue;
use job_queue_core::{JobId, JobStatus};
use job_queue_worker::{EchoHandler, HandlerRegistry, JobHandler, JobSource, WorkerConfig, WorkerPool};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `failures` calls, then succeeds.
struct FlakyHandler {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn execute(&self, payload: &Value) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("attempt {} failed", call + 1);
        }
        Ok(json!({"processed": payload}))
    }
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    async fn execute(&self, _payload: &Value) -> anyhow::Result<Value> {
        panic!("corrupt image");
    }
}

fn config() -> WorkerConfig {
    WorkerConfig {
        worker_name: Some("it".to_string()),
        concurrency: 3,
        poll_interval_ms: 10,
        job_timeout_secs: 5,
        graceful_shutdown_timeout_secs: 5,
    }
}

async fn wait_until_terminal(queue: &JobQueue, ids: &[JobId]) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let done = ids.iter().all(|id| {
                queue
                    .get_job_status(id)
                    .unwrap()
                    .is_some_and(|job| job.status.is_terminal())
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_drives_jobs_to_terminal_states() {
    let queue = common::memory_queue();
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(
            "image-integration",
            FlakyHandler {
                failures: 2,
                calls: AtomicU32::new(0),
            },
        )
        .unwrap();
    registry.register("post-mutation", PanickingHandler).unwrap();
    registry.register("echo", EchoHandler).unwrap();

    let flaky = queue.add_job("image-integration", json!({"postId": 1}), 2).unwrap();
    let broken = queue.add_job("post-mutation", json!({"slug": "bad"}), 1).unwrap();
    let echoed: Vec<_> = (0..5)
        .map(|n| queue.add_job("echo", json!(n), 0).unwrap())
        .collect();

    let pool = Arc::new(
        WorkerPool::new(config(), registry, Arc::clone(&queue) as Arc<dyn JobSource>).unwrap(),
    );
    let runner = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.run().await }
    });

    let mut all = vec![flaky, broken];
    all.extend(&echoed);
    wait_until_terminal(&queue, &all).await;
    pool.shutdown();
    runner.await.unwrap();

    let job = queue.get_job_status(&flaky).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.result, Some(json!({"processed": {"postId": 1}})));

    let job = queue.get_job_status(&broken).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert!(job.error.unwrap().contains("corrupt image"));

    for (n, id) in echoed.iter().enumerate() {
        let job = queue.get_job_status(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!(n)));
    }

    let stats = queue.get_queue_stats().unwrap();
    assert_eq!(stats.succeeded, 6);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued + stats.running, 0);
}

#[test]
fn test_pool_refuses_to_start_without_handlers() {
    let queue = common::memory_queue();
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("echo", EchoHandler).unwrap();

    let result = WorkerPool::new(config(), registry, queue as Arc<dyn JobSource>);
    let err = result.err().unwrap();
    assert!(err.to_string().contains("image-integration"));
    assert!(err.to_string().contains("post-mutation"));
}
