//! End-to-end tests driving the worker pool with configured mock providers

use std::time::Duration;

use panelgen::config::{Config, ProviderConfig, QueueConfig};
use panelgen::domain::{GenerationRequest, TaskSpec, TaskStatus};
use panelgen::fallback::FallbackStrategy;
use panelgen::provider::{ErrorKind, MockStep};
use panelgen::queue::WorkerPool;

fn scripted(name: &str, script: Vec<MockStep>) -> ProviderConfig {
    let mut config = ProviderConfig::mock(name);
    config.mock_script = script;
    config
}

fn config(providers: Vec<ProviderConfig>, fallback: FallbackStrategy, max_concurrent: usize) -> Config {
    Config {
        providers,
        fallback,
        queue: QueueConfig {
            max_concurrent,
            poll_interval_ms: 50,
            shutdown_timeout_ms: 1000,
            enable_rate_limiting: false,
        },
        ..Default::default()
    }
}

async fn run_all(pool: &WorkerPool, specs: Vec<TaskSpec>) -> Vec<String> {
    pool.start();
    let ids = pool.add_tasks_batch(specs).unwrap();
    assert!(pool.wait_for_completion(None).await);
    ids
}

fn assert_balanced(pool: &WorkerPool) {
    for (name, stats) in pool.get_statistics().providers {
        assert_eq!(
            stats.successes + stats.failures,
            stats.attempts,
            "provider {} has unbalanced counters",
            name
        );
    }
}

#[tokio::test]
async fn test_all_panels_complete_with_two_workers() {
    let pool = WorkerPool::from_config(&config(vec![ProviderConfig::mock("mock")], FallbackStrategy::NextProvider, 2))
        .unwrap();

    let panels: Vec<(String, String)> = (1..=5)
        .map(|i| (format!("panel-{}", i), format!("panel {} prompt", i)))
        .collect();
    pool.start();
    pool.add_panels(panels).unwrap();
    assert!(pool.wait_for_completion(Some(Duration::from_secs(10))).await);

    for i in 1..=5 {
        assert_eq!(pool.get_task_status(&format!("panel-{}", i)), Some(TaskStatus::Completed));
    }
    let status = pool.get_queue_status();
    assert_eq!(status.total_success, 5);
    assert_eq!(status.total_failed, 0);
    assert_eq!(status.total_processed, 5);
    assert_eq!(status.pending, 0);
    assert_eq!(status.processing, 0);

    let outcomes = pool.outcomes();
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.success && o.image_bytes.is_some()));
    assert_balanced(&pool);

    pool.stop().await;
    assert!(!pool.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_twice_then_completed() {
    let provider = scripted(
        "mock",
        vec![
            MockStep::Fail(ErrorKind::RateLimited),
            MockStep::Fail(ErrorKind::RateLimited),
            MockStep::Succeed,
        ],
    );
    let pool = WorkerPool::from_config(&config(vec![provider], FallbackStrategy::NextProvider, 1)).unwrap();

    let ids = run_all(&pool, vec![TaskSpec::new("a quiet street").with_id("p1")]).await;

    assert_eq!(pool.get_task_status(&ids[0]), Some(TaskStatus::Completed));
    let stats = pool.get_statistics();
    assert_eq!(stats.providers["mock"].attempts, 3);
    assert_eq!(stats.providers["mock"].successes, 1);
    assert_eq!(stats.providers["mock"].failures, 2);
    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_falls_back_to_next_provider() {
    let providers = vec![
        scripted("a", vec![MockStep::Fail(ErrorKind::AuthFailed)]),
        ProviderConfig::mock("b"),
    ];
    let pool = WorkerPool::from_config(&config(providers, FallbackStrategy::NextProvider, 1)).unwrap();

    run_all(&pool, vec![TaskSpec::new("a rooftop chase").with_id("p1")]).await;

    let task = pool.get_task("p1").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_ref().map(|r| r.provider.as_str()), Some("b"));

    let stats = pool.get_statistics();
    assert_eq!(stats.fallback_count, 1);
    assert_eq!(stats.providers["a"].attempts, 1);
    assert_eq!(stats.providers["b"].attempts, 1);
    assert_balanced(&pool);
    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sixth_request_waits_for_rate_limit_window() {
    let mut cfg = config(
        vec![ProviderConfig::mock("limited").with_rate_limit(5)],
        FallbackStrategy::None,
        6,
    );
    cfg.queue.enable_rate_limiting = true;
    let pool = WorkerPool::from_config(&cfg).unwrap();

    let specs = (1..=6)
        .map(|i| TaskSpec::new(format!("panel {}", i)).with_id(format!("p{}", i)))
        .collect();
    let started = tokio::time::Instant::now();
    run_all(&pool, specs).await;

    // Five go through immediately, the sixth only once the window has moved
    assert!(started.elapsed() >= Duration::from_secs(59));
    let status = pool.get_queue_status();
    assert_eq!(status.total_success, 6);

    // The local rejection is not a provider attempt
    let stats = pool.get_statistics();
    assert_eq!(stats.providers["limited"].attempts, 6);
    assert_eq!(stats.providers["limited"].failures, 0);
    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_strategy_none_fails_after_retries() {
    let providers = vec![
        scripted("flaky", vec![MockStep::Fail(ErrorKind::TransientServerError)]),
        ProviderConfig::mock("spare"),
    ];
    let pool = WorkerPool::from_config(&config(providers, FallbackStrategy::None, 1)).unwrap();

    run_all(&pool, vec![TaskSpec::new("a storm").with_id("p1")]).await;

    let task = pool.get_task("p1").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap_or_default().starts_with("transient_server_error"));

    let stats = pool.get_statistics();
    assert_eq!(stats.fallback_count, 0);
    assert_eq!(stats.providers["flaky"].attempts, 4);
    assert_eq!(stats.providers["spare"].attempts, 0);
    assert_eq!(pool.get_queue_status().total_failed, 1);
    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_mixed_batch_drains_with_balanced_stats() {
    let providers = vec![
        scripted(
            "primary",
            vec![
                MockStep::Succeed,
                MockStep::Fail(ErrorKind::Timeout),
                MockStep::Fail(ErrorKind::AuthFailed),
            ],
        ),
        ProviderConfig::mock("secondary").with_cost(0.02),
    ];
    let pool = WorkerPool::from_config(&config(providers, FallbackStrategy::Cheapest, 3)).unwrap();

    let specs = (1..=8)
        .map(|i| {
            let request = GenerationRequest::new(format!("panel {}", i)).with_provider("primary");
            TaskSpec::new("").with_id(format!("p{}", i)).with_request(request)
        })
        .collect();
    run_all(&pool, specs).await;

    let status = pool.get_queue_status();
    assert_eq!(status.total_processed, 8);
    assert_eq!(status.total_success + status.total_failed, 8);
    assert_eq!(status.pending + status.processing, 0);
    assert_balanced(&pool);

    // Call 1 succeeds, call 2 times out and is retried into an auth failure,
    // every later call fails auth; each failed task hops once to secondary
    let stats = pool.get_statistics();
    assert_eq!(status.total_success, 8);
    assert_eq!(stats.fallback_count, 7);
    assert_eq!(stats.providers["primary"].attempts, 9);
    assert_eq!(stats.providers["primary"].successes, 1);
    assert_eq!(stats.providers["secondary"].attempts, 7);

    for i in 1..=8 {
        let task = pool.get_task(&format!("p{}", i)).unwrap();
        let result = task.result.unwrap();
        match result.metadata.get("fallback_from") {
            Some(from) => {
                assert_eq!(from, "primary");
                assert_eq!(result.provider, "secondary");
            }
            None => assert_eq!(result.provider, "primary"),
        }
    }

    pool.stop().await;
}

#[tokio::test]
async fn test_snapshots_are_stable_without_new_work() {
    let pool = WorkerPool::from_config(&config(vec![ProviderConfig::mock("mock")], FallbackStrategy::NextProvider, 2))
        .unwrap();
    run_all(&pool, vec![TaskSpec::new("one"), TaskSpec::new("two")]).await;

    assert_eq!(pool.get_queue_status(), pool.get_queue_status());
    assert_eq!(pool.get_statistics(), pool.get_statistics());

    pool.stop().await;
    assert_eq!(pool.get_queue_status(), pool.get_queue_status());
    assert_eq!(pool.get_queue_status().workers_active, 0);
}

#[tokio::test]
async fn test_stopped_pool_can_restart() {
    let pool = WorkerPool::from_config(&config(vec![ProviderConfig::mock("mock")], FallbackStrategy::NextProvider, 1))
        .unwrap();
    run_all(&pool, vec![TaskSpec::new("first").with_id("p1")]).await;
    pool.stop().await;

    run_all(&pool, vec![TaskSpec::new("second").with_id("p2")]).await;
    assert_eq!(pool.get_task_status("p2"), Some(TaskStatus::Completed));
    assert_eq!(pool.get_queue_status().total_success, 2);
    pool.stop().await;
}
