//! Concurrency tests for circuit breakers and the registry

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tripwire_core::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};

#[derive(Debug, thiserror::Error)]
#[error("dependency failed")]
struct DependencyError;

fn config(failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig::default()
        .with_failure_threshold(failure_threshold)
        .with_success_threshold(success_threshold)
        .with_recovery_timeout(Duration::from_secs(60))
        .with_call_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_trip_once_without_lost_updates() {
    let threshold = 5;
    let extra = 15;
    let cb = Arc::new(CircuitBreaker::with_config("db", config(threshold, 1)));

    let tasks = (0..threshold + extra).map(|_| {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            cb.execute(|| async {
                tokio::task::yield_now().await;
                Err::<(), _>(DependencyError)
            })
            .await
        })
    });

    let results = join_all(tasks).await;
    let mut rejected = 0;
    for result in results {
        match result.unwrap() {
            Err(BreakerError::Open(_)) => rejected += 1,
            Err(BreakerError::Operation(DependencyError)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    let stats = cb.get_stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.total_calls, u64::from(threshold + extra));
    assert_eq!(stats.total_rejected_while_open, rejected);
    assert_eq!(stats.total_successes, 0);
    assert_eq!(stats.total_failures + rejected, u64::from(threshold + extra));

    // Late failures refresh the window instead of re-tripping it
    let remaining = stats.time_until_probe.expect("open breaker reports a window");
    assert!(
        remaining > Duration::from_secs(59),
        "window measured from a stale failure: {remaining:?}"
    );
}

/// Counts "Circuit breaker opened" events seen on this thread
struct OpenedEvents(Arc<AtomicUsize>);

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for OpenedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if visitor.0 == "Circuit breaker opened" {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn interleaved_failures_log_a_single_open_transition() {
    let opened = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(OpenedEvents(Arc::clone(&opened)));
    let _guard = tracing::subscriber::set_default(subscriber);

    let threshold = 3;
    let cb = Arc::new(CircuitBreaker::with_config("cache", config(threshold, 1)));

    // Every call is admitted before any of them fails
    let tasks = (0..12).map(|_| {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            cb.execute(|| async {
                tokio::task::yield_now().await;
                Err::<(), _>(DependencyError)
            })
            .await
        })
    });
    for result in join_all(tasks).await {
        assert!(matches!(result.unwrap(), Err(BreakerError::Operation(DependencyError))));
    }

    let err = cb
        .execute(|| async { Ok::<_, DependencyError>(()) })
        .await
        .unwrap_err();
    assert!(err.is_open());

    let stats = cb.get_stats();
    assert_eq!(stats.total_failures, 12);
    assert_eq!(stats.total_rejected_while_open, 1);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mixed_calls_keep_exact_totals() {
    let cb = Arc::new(CircuitBreaker::with_config("search", config(u32::MAX, 1)));
    let workers = 8;
    let calls_per_worker = 250;

    let tasks = (0..workers).map(|worker| {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            for i in 0..calls_per_worker {
                let fail = (worker + i) % 3 == 0;
                let _ = cb
                    .execute(|| async move {
                        if fail { Err(DependencyError) } else { Ok(i) }
                    })
                    .await;
            }
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let expected_failures = (0..workers)
        .flat_map(|w| (0..calls_per_worker).map(move |i| (w + i) % 3 == 0))
        .filter(|failed| *failed)
        .count() as u64;

    let stats = cb.get_stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.total_calls, (workers * calls_per_worker) as u64);
    assert_eq!(stats.total_failures, expected_failures);
    assert_eq!(stats.total_successes, stats.total_calls - expected_failures);
    assert_eq!(stats.total_rejected_while_open, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_half_open_successes_close_once() {
    let cb = Arc::new(CircuitBreaker::with_config(
        "tts",
        config(1, 3).with_recovery_timeout(Duration::from_millis(20)),
    ));

    cb.execute(|| async { Err::<(), _>(DependencyError) })
        .await
        .unwrap_err();
    assert_eq!(cb.state(), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(40)).await;

    let tasks = (0..10).map(|i| {
        let cb = Arc::clone(&cb);
        tokio::spawn(async move {
            cb.execute(|| async move { Ok::<_, DependencyError>(i) })
                .await
        })
    });
    for result in join_all(tasks).await {
        assert!(result.unwrap().is_ok());
    }

    let stats = cb.get_stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.consecutive_successes, 0);
    assert_eq!(stats.total_successes, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_creation_race_yields_single_instance() {
    let registry = Arc::new(CircuitBreakerRegistry::new());

    let tasks = (1..=32).map(|threshold| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.get_or_create("shared", Some(config(threshold, 1))) })
    });
    let breakers: Vec<Arc<CircuitBreaker>> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let first = &breakers[0];
    assert!(breakers.iter().all(|b| Arc::ptr_eq(b, first)));
    assert_eq!(registry.len(), 1);
    assert!((1..=32).contains(&first.config().failure_threshold));
}

#[tokio::test]
async fn stats_export_as_json() -> anyhow::Result<()> {
    let registry = CircuitBreakerRegistry::new();
    let db = registry.get_or_create("db", Some(config(1, 1)));
    let _ = db
        .execute(|| async { Err::<(), _>(DependencyError) })
        .await;

    let json = serde_json::to_value(registry.get_all_stats())?;
    let db_stats = &json["db"];
    assert_eq!(db_stats["state"], "open");
    assert_eq!(db_stats["total_failures"], 1);
    assert_eq!(db_stats["config"]["failure_threshold"], 1);
    assert_eq!(db_stats["config"]["call_timeout"], "5s");
    assert!(db_stats["last_failure_time"].is_string());
    assert!(db_stats["last_success_time"].is_null());
    Ok(())
}

#[test]
fn global_registry_is_shared() {
    let a = CircuitBreakerRegistry::global().get("global-registry-test");
    let b = CircuitBreakerRegistry::global().get("global-registry-test");
    assert!(Arc::ptr_eq(&a, &b));
    assert!(CircuitBreakerRegistry::global().lookup("global-registry-test").is_some());
}
