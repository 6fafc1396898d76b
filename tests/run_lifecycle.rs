//! End-to-end controller behaviour against a scripted container engine.
//!
//! These tests drive the full submit path (service, controller, uid pool,
//! broker) without a daemon: the engine is a hand-scripted fake whose wait
//! behaviour and output are set per test.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, ContainerCreateResponse};
use bollard::query_parameters::CreateContainerOptions;
use bytes::Bytes;
use tokio::sync::Notify;

use runbox::broker::{Broker, Subscription};
use runbox::engine::ContainerRuntime;
use runbox::engine::runtime::{AttachFuture, CreateContainerFuture, LogStream, UnitFuture, WaitFuture};
use runbox::error::{LanguageError, PoolError, RunboxError};
use runbox::runner::{RunOutcome, SandboxLimits};
use runbox::service::{RunRequest, RunService};
use runbox::uidpool::UidPool;

/// Counters observing which engine operations ran.
#[derive(Debug, Default)]
struct EngineCalls {
    creates: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    removes: AtomicUsize,
}

impl EngineCalls {
    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A scripted engine: emits fixed output chunks, then exits either on its
/// own or only after a stop request.
struct FakeEngine {
    calls: Arc<EngineCalls>,
    stdout_chunks: Vec<&'static [u8]>,
    stderr_chunks: Vec<&'static [u8]>,
    exit_status: i64,
    exits_only_on_stop: bool,
    stop_gate: Notify,
    bind_host_dir: Arc<std::sync::Mutex<Option<String>>>,
}

impl FakeEngine {
    fn exiting_with(status: i64, stdout: Vec<&'static [u8]>, stderr: Vec<&'static [u8]>) -> Self {
        Self {
            calls: Arc::new(EngineCalls::default()),
            stdout_chunks: stdout,
            stderr_chunks: stderr,
            exit_status: status,
            exits_only_on_stop: false,
            stop_gate: Notify::new(),
            bind_host_dir: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    fn hanging_until_stopped() -> Self {
        Self {
            calls: Arc::new(EngineCalls::default()),
            stdout_chunks: vec![],
            stderr_chunks: vec![],
            exit_status: 137,
            exits_only_on_stop: true,
            stop_gate: Notify::new(),
            bind_host_dir: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    fn calls(&self) -> Arc<EngineCalls> {
        Arc::clone(&self.calls)
    }

    fn bind_host_dir_handle(&self) -> Arc<std::sync::Mutex<Option<String>>> {
        Arc::clone(&self.bind_host_dir)
    }
}

fn host_dir_of(bind: &str) -> Option<String> {
    bind.split(':').next().map(String::from)
}

impl ContainerRuntime for FakeEngine {
    fn create_container(
        &self,
        _options: Option<CreateContainerOptions>,
        body: ContainerCreateBody,
    ) -> CreateContainerFuture<'_> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        let bind = body
            .host_config
            .as_ref()
            .and_then(|host| host.binds.as_ref())
            .and_then(|binds| binds.first())
            .and_then(|bind| host_dir_of(bind));
        if let Ok(mut slot) = self.bind_host_dir.lock() {
            *slot = bind;
        }
        Box::pin(async {
            Ok(ContainerCreateResponse {
                id: String::from("fake-container"),
                warnings: vec![],
            })
        })
    }

    fn start_container(&self, _container_id: &str) -> UnitFuture<'_> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn attach_output(&self, _container_id: &str) -> AttachFuture<'_> {
        let mut chunks: Vec<Result<LogOutput, bollard::errors::Error>> = Vec::new();
        for chunk in self.stdout_chunks.iter().copied() {
            chunks.push(Ok(LogOutput::StdOut {
                message: Bytes::from_static(chunk),
            }));
        }
        for chunk in self.stderr_chunks.iter().copied() {
            chunks.push(Ok(LogOutput::StdErr {
                message: Bytes::from_static(chunk),
            }));
        }
        Box::pin(async move {
            Ok(Box::pin(futures_util::stream::iter(chunks)) as LogStream)
        })
    }

    fn wait_container(&self, _container_id: &str) -> WaitFuture<'_> {
        let status = self.exit_status;
        if self.exits_only_on_stop {
            Box::pin(async move {
                self.stop_gate.notified().await;
                Ok(status)
            })
        } else {
            Box::pin(async move { Ok(status) })
        }
    }

    fn stop_container(&self, _container_id: &str, _grace_secs: i32) -> UnitFuture<'_> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_gate.notify_one();
        Box::pin(async { Ok(()) })
    }

    fn remove_container(&self, _container_id: &str) -> UnitFuture<'_> {
        self.calls.removes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

fn service_over(
    engine: FakeEngine,
    pool: &Arc<UidPool>,
    broker: &Arc<Broker>,
) -> RunService<FakeEngine> {
    RunService::new(
        Arc::new(engine),
        Arc::clone(pool),
        Arc::clone(broker),
        SandboxLimits::default(),
        true,
    )
}

fn request(language: &str, code: &str, timeout: Duration) -> RunRequest {
    RunRequest {
        language: String::from(language),
        code: String::from(code),
        timeout,
    }
}

/// Collect events until the terminal status line arrives.
fn spawn_collector(mut subscription: Subscription) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut bodies = Vec::new();
        while let Some(event) = subscription.recv().await {
            let body = event.into_body();
            let terminal = body.starts_with("=>");
            bodies.push(body);
            if terminal {
                break;
            }
        }
        bodies
    })
}

#[tokio::test]
async fn successful_run_streams_output_and_restores_pool() {
    let engine = FakeEngine::exiting_with(
        0,
        vec![b"yo i'm rubby 49\n" as &[u8]],
        vec![b"warning: deprecated\n" as &[u8]],
    );
    let calls = engine.calls();
    let bind_host_dir = engine.bind_host_dir_handle();
    let pool = Arc::new(UidPool::new(20_000, 20_004));
    let broker = Arc::new(Broker::new());
    let service = service_over(engine, &pool, &broker);

    let collector = spawn_collector(broker.subscribe("run-7").await);

    let report = service
        .submit(
            Some(String::from("run-7")),
            request("ruby", "puts \"yo i'm rubby #{7*7}\"", Duration::from_secs(5)),
        )
        .await;

    let report = report.ok();
    assert_eq!(
        report.as_ref().map(|r| r.outcome),
        Some(RunOutcome::Completed)
    );
    assert_eq!(report.map(|r| r.run_id), Some(String::from("run-7")));
    assert_eq!(pool.available(), 5, "pool size must be restored");
    assert_eq!(EngineCalls::count(&calls.creates), 1);
    assert_eq!(EngineCalls::count(&calls.starts), 1);
    assert_eq!(EngineCalls::count(&calls.stops), 0);
    assert_eq!(EngineCalls::count(&calls.removes), 1);

    let workspace = bind_host_dir.lock().ok().and_then(|slot| slot.clone());
    let workspace = workspace.unwrap_or_default();
    assert!(!workspace.is_empty(), "the code volume should have been bound");
    assert!(
        !std::path::Path::new(&workspace).exists(),
        "workspace directory should have been removed: {workspace}"
    );

    let bodies = collector.await.unwrap_or_default();
    let terminal = bodies.last().cloned().unwrap_or_default();
    assert_eq!(terminal, "=> exited with status 0");
    assert!(
        bodies.contains(&String::from("yo i'm rubby 49")),
        "stdout line should have been published: {bodies:?}"
    );
    assert!(
        bodies.contains(&String::from("warning: deprecated")),
        "stderr line should have been published: {bodies:?}"
    );
}

#[tokio::test]
async fn hung_run_times_out_but_still_cleans_up() {
    let engine = FakeEngine::hanging_until_stopped();
    let calls = engine.calls();
    let pool = Arc::new(UidPool::new(20_000, 20_000));
    let broker = Arc::new(Broker::new());
    let service = service_over(engine, &pool, &broker);

    let collector = spawn_collector(broker.subscribe("run-8").await);

    let report = service
        .submit(
            Some(String::from("run-8")),
            request("python", "while True: pass", Duration::from_millis(50)),
        )
        .await;

    assert_eq!(
        report.ok().map(|r| r.outcome),
        Some(RunOutcome::TimedOut)
    );
    assert!(
        EngineCalls::count(&calls.stops) >= 1,
        "the stop escalation should have fired"
    );
    assert_eq!(EngineCalls::count(&calls.removes), 1);
    assert_eq!(pool.available(), 1, "pool size must be restored");

    let bodies = collector.await.unwrap_or_default();
    assert_eq!(bodies.last().map(String::as_str), Some("=> timed out after 0s"));
}

#[tokio::test]
async fn unknown_language_touches_no_engine_resources() {
    let engine = FakeEngine::exiting_with(0, vec![], vec![]);
    let calls = engine.calls();
    let pool = Arc::new(UidPool::new(20_000, 20_004));
    let broker = Arc::new(Broker::new());
    let service = service_over(engine, &pool, &broker);

    let outcome = service
        .submit(None, request("cobol", "DISPLAY 'HI'.", Duration::from_secs(1)))
        .await;

    assert!(matches!(
        outcome,
        Err(RunboxError::Language(LanguageError::Unsupported { .. }))
    ));
    assert_eq!(EngineCalls::count(&calls.creates), 0);
    assert_eq!(EngineCalls::count(&calls.removes), 0);
    assert_eq!(pool.available(), 5, "no uid may be reserved");
}

#[tokio::test]
async fn concurrent_runs_beyond_pool_capacity_are_refused() {
    let engine = FakeEngine::exiting_with(0, vec![], vec![]);
    let pool = Arc::new(UidPool::new(20_000, 20_000));
    let broker = Arc::new(Broker::new());
    let service = service_over(engine, &pool, &broker);

    // Occupy the only identity, as a concurrent run would.
    let lease = pool.reserve();
    assert_eq!(lease, Ok(20_000));

    let refused = service
        .submit(None, request("python", "print(1)", Duration::from_secs(1)))
        .await;
    assert!(matches!(
        refused,
        Err(RunboxError::Pool(PoolError::Exhausted))
    ));

    // Once the identity is back, submission succeeds again.
    assert_eq!(pool.release(20_000), Ok(()));
    let accepted = service
        .submit(None, request("python", "print(1)", Duration::from_secs(1)))
        .await;
    assert_eq!(
        accepted.ok().map(|r| r.outcome),
        Some(RunOutcome::Completed)
    );
}

#[tokio::test]
async fn generated_run_ids_are_unique() {
    let pool = Arc::new(UidPool::new(20_000, 20_004));
    let broker = Arc::new(Broker::new());
    let service = service_over(FakeEngine::exiting_with(0, vec![], vec![]), &pool, &broker);

    let first = service
        .submit(None, request("python", "print(1)", Duration::from_secs(1)))
        .await
        .ok()
        .map(|r| r.run_id);
    let second = service
        .submit(None, request("python", "print(1)", Duration::from_secs(1)))
        .await
        .ok()
        .map(|r| r.run_id);

    assert!(first.is_some());
    assert!(second.is_some());
    assert_ne!(first, second);
}

#[tokio::test]
async fn late_unsubscribe_misses_the_terminal_event() {
    let pool = Arc::new(UidPool::new(20_000, 20_004));
    let broker = Arc::new(Broker::new());
    let service = service_over(FakeEngine::exiting_with(0, vec![], vec![]), &pool, &broker);

    // Subscribe and immediately leave: the run must still conclude and the
    // dispatch of its terminal event must not block on the departed
    // listener.
    let subscription = service.subscribe("run-9").await;
    service.unsubscribe("run-9", subscription.id()).await;

    let report = service
        .submit(
            Some(String::from("run-9")),
            request("python", "print(1)", Duration::from_secs(1)),
        )
        .await;
    assert_eq!(
        report.ok().map(|r| r.outcome),
        Some(RunOutcome::Completed)
    );
}
