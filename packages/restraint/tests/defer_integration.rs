//! Timing tests for the deferred-execution timer.
//!
//! Every scenario runs against both execution contexts: a dedicated thread and
//! a tokio blocking pool. Margins are generous so the suite stays stable on
//! loaded CI machines.
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=restraint=trace cargo test -p restraint --test defer_integration -- --nocapture
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use restraint::{
    ActionFailure, ConfigError, Defer, DeferBuilder, DeferConfig, DeferError, DeferLimit,
};
use tokio::runtime::{Builder, Runtime};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Context {
    Thread,
    Pool,
}

const CONTEXTS: [Context; 2] = [Context::Thread, Context::Pool];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A timer whose action counts its invocations.
struct Counted {
    defer: Defer,
    count: Arc<AtomicUsize>,
    _runtime: Option<Runtime>,
}

impl Counted {
    fn new(context: Context, configure: impl FnOnce(DeferBuilder) -> DeferBuilder) -> Self {
        init_tracing();

        let (builder, runtime) = match context {
            Context::Thread => (Defer::using_dedicated_thread(), None),
            Context::Pool => {
                let runtime = Builder::new_current_thread().build().unwrap();
                (Defer::using_task_pool(runtime.handle().clone()), Some(runtime))
            }
        };

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let builder = builder.named(format!("{context:?}").to_lowercase()).to_execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            defer: configure(builder).build().unwrap(),
            count,
            _runtime: runtime,
        }
    }

    fn count(&self) -> usize { self.count.load(Ordering::SeqCst) }
}

fn sleep_ms(ms: u64) { thread::sleep(Duration::from_millis(ms)); }

// ============================================================================
// Debounce
// ============================================================================

#[test]
fn test_burst_of_triggers_executes_once() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(100));

        timer.defer.trigger().unwrap();
        timer.defer.trigger().unwrap();
        timer.defer.trigger().unwrap();

        sleep_ms(40);
        assert_eq!(timer.count(), 0, "{context:?}: fired before the delay");

        sleep_ms(300);
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_each_trigger_pushes_the_deadline_back() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(300));

        timer.defer.trigger().unwrap();
        sleep_ms(150);
        timer.defer.trigger().unwrap();
        sleep_ms(200);
        assert_eq!(timer.count(), 0, "{context:?}: second trigger did not reschedule");

        sleep_ms(400);
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_trigger_and_wait_honors_delay() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(50));

        let started = Instant::now();
        timer.defer.trigger_and_wait();

        assert!(started.elapsed() >= Duration::from_millis(50), "{context:?}");
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_explicit_interval_overrides_configured_delay() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(10_000));

        let started = Instant::now();
        timer.defer.trigger_with_interval_and_wait(Duration::from_millis(30));

        assert!(started.elapsed() < Duration::from_secs(5), "{context:?}");
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_discards_pending_trigger() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(100));

        timer.defer.trigger().unwrap();
        timer.defer.cancel_pending().unwrap();

        sleep_ms(300);
        assert_eq!(timer.count(), 0, "{context:?}");

        // The timer stays usable after a cancellation.
        timer.defer.trigger_and_wait();
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_cancel_without_pending_work_is_noop() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(20));

        timer.defer.cancel_pending().unwrap();
        timer.defer.trigger_and_wait();

        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

// ============================================================================
// Pause
// ============================================================================

#[test]
fn test_pause_suppresses_and_resume_runs_pending_work() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(50));

        timer.defer.set_paused(true).unwrap();
        timer.defer.trigger().unwrap();
        sleep_ms(250);
        assert_eq!(timer.count(), 0, "{context:?}: fired while paused");

        timer.defer.set_paused(false).unwrap();
        sleep_ms(200);
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_resume_without_pending_work_does_nothing() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(20));

        timer.defer.set_paused(true).unwrap();
        timer.defer.set_paused(false).unwrap();

        sleep_ms(150);
        assert_eq!(timer.count(), 0, "{context:?}");
    }
}

#[test]
fn test_cancel_while_paused_drops_work_on_resume() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(30));

        timer.defer.set_paused(true).unwrap();
        timer.defer.trigger().unwrap();
        timer.defer.cancel_pending().unwrap();
        timer.defer.set_paused(false).unwrap();

        sleep_ms(200);
        assert_eq!(timer.count(), 0, "{context:?}");
    }
}

// ============================================================================
// Immediate execution
// ============================================================================

#[test]
fn test_execute_now_beats_the_delay() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(10_000));

        timer.defer.trigger().unwrap();
        timer.defer.execute_now().unwrap();

        sleep_ms(300);
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

#[test]
fn test_execute_now_and_wait_returns_after_completion() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(10_000));

        timer.defer.execute_now_and_wait();
        assert_eq!(timer.count(), 1, "{context:?}");

        timer.defer.execute_now_and_wait();
        assert_eq!(timer.count(), 2, "{context:?}");
        assert_eq!(timer.defer.execution_count(), 2, "{context:?}");
    }
}

// ============================================================================
// Limits
// ============================================================================

#[test]
fn test_span_limit_forces_execution_under_continuous_triggering() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(100).with_maximum_delay_ms(250));
        assert_eq!(timer.defer.limit_type(), DeferLimit::Span);

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(700) {
            timer.defer.trigger().unwrap();
            sleep_ms(30);
        }

        let during_burst = timer.count();
        assert!(during_burst >= 1, "{context:?}: span limit never fired");
        assert!(during_burst <= 4, "{context:?}: fired {during_burst} times");
    }
}

#[test]
fn test_without_limits_continuous_triggering_defers_forever() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(150));

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(500) {
            timer.defer.trigger().unwrap();
            sleep_ms(20);
        }

        assert_eq!(timer.count(), 0, "{context:?}");
    }
}

#[test]
fn test_count_limit_fires_almost_immediately() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(10_000).with_maximum_trigger_limit(2));
        assert_eq!(timer.defer.limit_type(), DeferLimit::Count);

        let started = Instant::now();
        timer.defer.trigger().unwrap();
        timer.defer.trigger_and_wait();

        assert!(started.elapsed() < Duration::from_secs(2), "{context:?}");
        assert_eq!(timer.count(), 1, "{context:?}");
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_failures_reach_handler_and_worker_survives() {
    for context in CONTEXTS {
        init_tracing();
        let runtime = Builder::new_current_thread().build().unwrap();
        let builder = match context {
            Context::Thread => Defer::using_dedicated_thread(),
            Context::Pool => Defer::using_task_pool(runtime.handle().clone()),
        };

        let calls = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let calls_in_action = Arc::clone(&calls);
        let failures_in_handler = Arc::clone(&failures);

        let defer = builder
            .for_at_least_ms(10)
            .to_execute(move || -> Result<(), String> {
                match calls_in_action.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("first call fails".to_string()),
                    1 => panic!("second call panics"),
                    _ => Ok(()),
                }
            })
            .with_error_handler(move |failure: ActionFailure| {
                failures_in_handler.lock().push(failure.to_string());
            })
            .build()
            .unwrap();

        defer.execute_now_and_wait();
        defer.execute_now_and_wait();
        defer.execute_now_and_wait();

        assert_eq!(defer.execution_count(), 3, "{context:?}");
        let failures = failures.lock().clone();
        assert_eq!(
            failures,
            vec![
                "Action failed: first call fails".to_string(),
                "Action panicked: second call panics".to_string(),
            ],
            "{context:?}"
        );

        drop(defer);
    }
}

#[test]
fn test_failure_without_handler_is_absorbed() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| {
            b.for_at_least_ms(10)
                .to_execute(|| -> Result<(), std::io::Error> { Err(std::io::Error::other("ignored")) })
        });

        timer.defer.execute_now_and_wait();
        timer.defer.execute_now_and_wait();
        assert_eq!(timer.defer.execution_count(), 2, "{context:?}");
    }
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_dispose_twice_neither_deadlocks_nor_fails() {
    for context in CONTEXTS {
        let timer = Counted::new(context, |b| b.for_at_least_ms(50));

        timer.defer.trigger().unwrap();
        timer.defer.dispose();
        timer.defer.dispose();

        assert!(timer.defer.is_disposed());
        assert!(matches!(timer.defer.trigger(), Err(DeferError::Disposed)));
        timer.defer.trigger_and_wait();

        sleep_ms(150);
        assert_eq!(timer.count(), 0, "{context:?}: pending work ran after dispose");
    }
}

#[test]
fn test_dispose_waits_for_running_action() {
    for context in CONTEXTS {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (started_in_action, finished_in_action) = (Arc::clone(&started), Arc::clone(&finished));

        let timer = Counted::new(context, |b| {
            b.for_at_least_ms(10).to_execute(move || {
                started_in_action.store(true, Ordering::SeqCst);
                sleep_ms(100);
                finished_in_action.store(true, Ordering::SeqCst);
            })
        });

        timer.defer.execute_now().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !started.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "{context:?}: action never started");
            sleep_ms(1);
        }

        timer.defer.dispose();
        assert!(finished.load(Ordering::SeqCst), "{context:?}: dispose returned mid-action");
        assert_eq!(timer.defer.execution_count(), 1, "{context:?}");

        sleep_ms(150);
        assert_eq!(timer.defer.execution_count(), 1, "{context:?}: action ran after dispose");
    }
}

#[test]
fn test_dropping_runtime_disposes_live_timer() {
    let timer = Counted::new(Context::Pool, |b| b.for_at_least_ms(10));
    timer.defer.execute_now_and_wait();
    assert_eq!(timer.count(), 1);

    let Counted { defer, count, _runtime: runtime } = timer;
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        drop(runtime);
        tx.send(()).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(5)).expect("runtime shutdown hung on the timer");

    assert!(defer.is_disposed());
    assert!(matches!(defer.execute_now(), Err(DeferError::Disposed)));
    defer.execute_now_and_wait();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispose_releases_every_waiter() {
    for context in CONTEXTS {
        let timer = Arc::new(Counted::new(context, |b| b.for_at_least_ms(10_000)));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let timer = Arc::clone(&timer);
                thread::spawn(move || timer.defer.wait_for_next_execution())
            })
            .collect();

        sleep_ms(50);
        timer.defer.dispose();

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(timer.count(), 0, "{context:?}");
    }
}

#[test]
fn test_many_producers_coalesce() {
    for context in CONTEXTS {
        let timer = Arc::new(Counted::new(context, |b| b.for_at_least_ms(200)));

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let timer = Arc::clone(&timer);
                thread::spawn(move || {
                    for _ in 0..100 {
                        timer.defer.trigger().unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        sleep_ms(500);
        let executions = timer.count();
        assert!((1..=3).contains(&executions), "{context:?}: {executions} executions");
    }
}

#[test]
fn test_timed_wait_reports_outcome() {
    for context in CONTEXTS {
        let timer = Arc::new(Counted::new(context, |b| b.for_at_least_ms(20)));

        assert!(!timer.defer.wait_for_next_execution_timeout(Duration::from_millis(50)));

        let trigger = {
            let timer = Arc::clone(&timer);
            thread::spawn(move || {
                sleep_ms(30);
                timer.defer.trigger().unwrap();
            })
        };
        assert!(timer.defer.wait_for_next_execution_timeout(Duration::from_secs(5)), "{context:?}");
        trigger.join().unwrap();
    }
}

// ============================================================================
// Async
// ============================================================================

#[tokio::test]
async fn test_async_trigger_and_wait_on_default_executor() {
    init_tracing();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);

    let defer = Defer::to_execute(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .for_at_least_ms(30)
    .build()
    .unwrap();

    defer.trigger_and_wait_async().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    defer.execute_now_and_wait_async().await;
    assert_eq!(count.load(Ordering::SeqCst), 2);

    defer.trigger_with_interval_and_wait_async(Duration::from_millis(10)).await;
    assert_eq!(defer.execution_count(), 3);
}

#[tokio::test]
async fn test_async_wait_for_next_execution() {
    init_tracing();
    let defer = Defer::to_execute(|| {}).for_at_least_ms(10).build().unwrap();

    tokio::join!(defer.wait_for_next_execution_async(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        defer.trigger().unwrap();
    });

    assert_eq!(defer.execution_count(), 1);
}

#[tokio::test]
async fn test_async_wait_after_dispose_returns() {
    let defer = Defer::to_execute(|| {}).for_at_least_ms(10).build().unwrap();
    defer.dispose();

    defer.trigger_and_wait_async().await;
    defer.wait_for_next_execution_async().await;
    assert_eq!(defer.execution_count(), 0);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_config_file_drives_task_pool_timer() {
    let config = DeferConfig::parse_jsonc(
        r#"{
            // burst coalescing for the search index
            "name": "indexer",
            "delayMs": 20,
            "maxTriggers": 3,
            "executor": "taskPool"
        }"#,
    )
    .unwrap();

    let defer = config.builder().unwrap().to_execute(|| {}).build().unwrap();
    assert_eq!(defer.name(), Some("indexer"));
    assert_eq!(defer.limit_type(), DeferLimit::Count);

    defer.execute_now_and_wait_async().await;
    assert_eq!(defer.execution_count(), 1);
}

#[test]
fn test_config_task_pool_outside_runtime_fails() {
    let config = DeferConfig::parse_jsonc(r#"{ "executor": "taskPool", "delayMs": 20 }"#).unwrap();
    assert!(matches!(config.builder(), Err(ConfigError::NoRuntime)));
}
