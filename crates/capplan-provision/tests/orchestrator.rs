//! Orchestrator scenarios against a scripted control plane and a manual clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capplan_convert::aggregate;
use capplan_core::{
    ProvisionOptions, ReservationPlanEntry, ResourceSpec, RetrySettings, ThroughputUnit,
};
use capplan_provision::{
    AggregateState, AggregateStatus, CancelSignal, Clock, ControlPlane, Orchestrator,
    ProvisionError, RemoteError, ResourceStatus, RunStatus, TaskState,
};
use tokio::sync::watch;

// ── Test doubles ───────────────────────────────────────────────

/// Time only moves when someone sleeps.
#[derive(Default)]
struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    CreateAggregate(usize),
    Status(String),
    CreateResource(String),
}

/// Replays queued answers; falls back to success once a queue is drained.
struct ScriptedControlPlane {
    submits: Mutex<VecDeque<Result<String, RemoteError>>>,
    statuses: Mutex<VecDeque<Result<AggregateStatus, RemoteError>>>,
    idle_status: AggregateState,
    resources: Mutex<HashMap<String, VecDeque<Result<String, RemoteError>>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel_after_first_resource: Option<watch::Sender<bool>>,
    cancel_on_failure_of: Option<(String, watch::Sender<bool>)>,
}

impl ScriptedControlPlane {
    fn new() -> Self {
        Self {
            submits: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            idle_status: AggregateState::Active,
            resources: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cancel_after_first_resource: None,
            cancel_on_failure_of: None,
        }
    }

    fn submit(self, answer: Result<&str, RemoteError>) -> Self {
        self.submits
            .lock()
            .unwrap()
            .push_back(answer.map(str::to_string));
        self
    }

    fn status(self, answer: Result<AggregateState, RemoteError>) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .push_back(answer.map(AggregateStatus::new));
        self
    }

    fn status_detail(self, state: AggregateState, detail: &str) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Ok(AggregateStatus::new(state).with_detail(detail)));
        self
    }

    fn idle(mut self, state: AggregateState) -> Self {
        self.idle_status = state;
        self
    }

    fn resource(self, name: &str, answer: Result<&str, RemoteError>) -> Self {
        self.resources
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(answer.map(str::to_string));
        self
    }

    fn cancel_after_first_resource(mut self, tx: watch::Sender<bool>) -> Self {
        self.cancel_after_first_resource = Some(tx);
        self
    }

    fn cancel_on_failure_of(mut self, name: &str, tx: watch::Sender<bool>) -> Self {
        self.cancel_on_failure_of = Some((name.to_string(), tx));
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn resource_calls(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::CreateResource(name.to_string()))
            .count()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn create_aggregate(&self, plan: &[ReservationPlanEntry]) -> Result<String, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::CreateAggregate(plan.len()));
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("sub-1".to_string()))
    }

    async fn aggregate_status(&self, aggregate_id: &str) -> Result<AggregateStatus, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Status(aggregate_id.to_string()));
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AggregateStatus::new(self.idle_status)))
    }

    async fn create_resource(
        &self,
        _aggregate_id: &str,
        spec: &ResourceSpec,
    ) -> Result<String, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::CreateResource(spec.name.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let answer = self
            .resources
            .lock()
            .unwrap()
            .get_mut(&spec.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(format!("db-{}", spec.name)));

        if answer.is_ok() {
            if let Some(tx) = &self.cancel_after_first_resource {
                let _ = tx.send(true);
            }
        } else if let Some((name, tx)) = &self.cancel_on_failure_of {
            if *name == spec.name {
                let _ = tx.send(true);
            }
        }
        answer
    }
}

// ── Fixtures ───────────────────────────────────────────────────

fn spec(name: &str) -> ResourceSpec {
    ResourceSpec {
        name: name.to_string(),
        dataset_size_gb: 10.0,
        replication: true,
        throughput_unit: ThroughputUnit::OperationsPerSecond,
        throughput_value: 5000,
        modules: vec!["RedisJSON".into()],
        oss_cluster_api: false,
    }
}

fn prod_cache() -> (Vec<ResourceSpec>, Vec<ReservationPlanEntry>) {
    let resources: Vec<ResourceSpec> = ["prod-cache-1", "prod-cache-2", "prod-cache-3"]
        .iter()
        .map(|n| spec(n))
        .collect();
    let plan = aggregate(&resources);
    (resources, plan)
}

fn options() -> ProvisionOptions {
    ProvisionOptions {
        poll_interval_secs: 5,
        poll_timeout_secs: 30,
        max_retries: 3,
        resource_concurrency: 2,
    }
}

fn fast_retry() -> RetrySettings {
    RetrySettings {
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        max_elapsed_secs: 60,
    }
}

fn orchestrator(
    cp: &Arc<ScriptedControlPlane>,
    clock: &Arc<ManualClock>,
) -> Orchestrator<ScriptedControlPlane> {
    Orchestrator::new(Arc::clone(cp), options())
        .with_clock(Arc::clone(clock) as Arc<dyn Clock>)
        .with_retry(&fast_retry())
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn scenario_c_active_after_two_polls_all_resources_created() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .status(Ok(AggregateState::Processing))
            .status(Ok(AggregateState::Active)),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.aggregate.aggregate_id.as_deref(), Some("sub-1"));
    assert_eq!(outcome.aggregate.polls, 2);
    assert_eq!(outcome.aggregate.state, TaskState::Succeeded);
    assert_eq!(outcome.succeeded(), 3);
    let names: Vec<&str> = outcome.resources.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["prod-cache-1", "prod-cache-2", "prod-cache-3"]);
    assert_eq!(
        outcome.resource("prod-cache-2").unwrap().resource_id(),
        Some("db-prod-cache-2")
    );

    assert_eq!(cp.count(|c| matches!(c, Call::CreateAggregate(1))), 1);
    assert_eq!(cp.count(|c| matches!(c, Call::CreateResource(_))), 3);
    assert_eq!(*clock.sleeps.lock().unwrap(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn scenario_d_permanent_failure_is_isolated_and_not_retried() {
    let cp = Arc::new(ScriptedControlPlane::new().resource(
        "prod-cache-2",
        Err(RemoteError::Permanent {
            status: Some(422),
            detail: "validation: dataset_size_in_gb exceeds plan".into(),
        }),
    ));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::PartiallyCompleted);
    assert!(outcome.resource("prod-cache-1").unwrap().is_success());
    assert!(outcome.resource("prod-cache-3").unwrap().is_success());

    let failed = outcome.resource("prod-cache-2").unwrap();
    assert_eq!(failed.attempts, 1);
    assert!(failed.error().unwrap().detail().starts_with("validation"));
    assert_eq!(cp.resource_calls("prod-cache-2"), 1);
    assert_eq!(outcome.failed(), 1);
}

#[tokio::test]
async fn scenario_e_poll_timeout_fails_without_creating_resources() {
    let cp = Arc::new(ScriptedControlPlane::new().idle(AggregateState::Processing));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.aggregate.state, TaskState::TimedOut);
    match outcome.error() {
        Some(ProvisionError::ProvisioningTimeout {
            aggregate_id,
            waited,
            last_status,
        }) => {
            assert_eq!(aggregate_id, "sub-1");
            assert_eq!(*waited, Duration::from_secs(30));
            assert_eq!(*last_status, AggregateState::Processing);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // Polls at t = 0, 5, ..., 30.
    assert_eq!(outcome.aggregate.polls, 7);
    assert_eq!(cp.count(|c| matches!(c, Call::CreateResource(_))), 0);
    assert_eq!(outcome.resources.len(), 3);
    assert!(
        outcome
            .resources
            .iter()
            .all(|r| r.status == ResourceStatus::NotAttempted)
    );
}

#[tokio::test]
async fn remote_error_status_fails_run_with_detail() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .status(Ok(AggregateState::Pending))
            .status_detail(AggregateState::Error, "insufficient capacity in region"),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.aggregate.state, TaskState::Failed);
    assert_eq!(
        outcome.error(),
        Some(&ProvisionError::AggregateFailed {
            aggregate_id: "sub-1".into(),
            detail: Some("insufficient capacity in region".into()),
        })
    );
    assert_eq!(cp.count(|c| matches!(c, Call::CreateResource(_))), 0);
}

#[tokio::test]
async fn transient_submission_errors_are_retried() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .submit(Err(RemoteError::Transient {
                status: Some(503),
                detail: "unavailable".into(),
            }))
            .submit(Ok("sub-7")),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.aggregate.submit_attempts, 2);
    assert_eq!(outcome.aggregate.aggregate_id.as_deref(), Some("sub-7"));
    let backoff = clock.sleeps.lock().unwrap()[0];
    assert!(backoff >= Duration::from_millis(50) && backoff <= Duration::from_millis(100));
}

#[tokio::test]
async fn permanent_submission_error_fails_immediately() {
    let cp = Arc::new(ScriptedControlPlane::new().submit(Err(RemoteError::Permanent {
        status: Some(401),
        detail: "bad credentials".into(),
    })));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(
        outcome.error(),
        Some(ProvisionError::AggregateSubmission { attempts: 1, .. })
    ));
    assert_eq!(outcome.aggregate.state, TaskState::Failed);
    assert_eq!(cp.calls(), vec![Call::CreateAggregate(1)]);
    assert!(
        outcome
            .resources
            .iter()
            .all(|r| r.status == ResourceStatus::NotAttempted)
    );
}

#[tokio::test]
async fn submission_gives_up_after_attempt_ceiling() {
    let transient = || RemoteError::transient("connection reset");
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .submit(Err(transient()))
            .submit(Err(transient()))
            .submit(Err(transient()))
            .submit(Ok("never-reached")),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(
        outcome.error(),
        Some(ProvisionError::AggregateSubmission { attempts: 3, source }) if source.is_transient()
    ));
    assert_eq!(cp.count(|c| matches!(c, Call::CreateAggregate(_))), 3);
}

#[tokio::test]
async fn transient_resource_errors_are_retried_per_resource() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .resource("prod-cache-1", Err(RemoteError::transient("429")))
            .resource("prod-cache-1", Err(RemoteError::transient("429")))
            .resource("prod-cache-1", Ok("db-a")),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let first = outcome.resource("prod-cache-1").unwrap();
    assert_eq!(first.attempts, 3);
    assert_eq!(first.resource_id(), Some("db-a"));
    assert_eq!(outcome.resource("prod-cache-2").unwrap().attempts, 1);
}

#[tokio::test]
async fn exhausted_resource_retries_mark_only_that_resource() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .resource("prod-cache-3", Err(RemoteError::transient("503")))
            .resource("prod-cache-3", Err(RemoteError::transient("503")))
            .resource("prod-cache-3", Err(RemoteError::transient("503"))),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::PartiallyCompleted);
    let last = outcome.resource("prod-cache-3").unwrap();
    assert_eq!(last.attempts, 3);
    assert!(last.error().unwrap().is_transient());
    assert_eq!(outcome.succeeded(), 2);
}

#[tokio::test]
async fn transient_status_errors_count_as_pending() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .status(Err(RemoteError::transient("timeout")))
            .status(Ok(AggregateState::Active)),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.aggregate.polls, 2);
}

#[tokio::test]
async fn permanent_status_error_fails_run() {
    let cp = Arc::new(ScriptedControlPlane::new().status(Err(RemoteError::Permanent {
        status: Some(404),
        detail: "subscription not found".into(),
    })));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(
        outcome.error(),
        Some(ProvisionError::AggregatePoll { aggregate_id, .. }) if aggregate_id == "sub-1"
    ));
}

#[tokio::test]
async fn empty_plan_is_rejected_before_any_call() {
    let cp = Arc::new(ScriptedControlPlane::new());
    let clock = Arc::new(ManualClock::default());

    let err = orchestrator(&cp, &clock).run(&[], &[]).await.unwrap_err();

    assert_eq!(err, ProvisionError::EmptyPlan);
    assert!(cp.calls().is_empty());
}

#[tokio::test]
async fn plan_without_resources_completes_with_no_outcomes() {
    let cp = Arc::new(ScriptedControlPlane::new());
    let clock = Arc::new(ManualClock::default());
    let (_, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock).run(&[], &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.resources.is_empty());
    assert_eq!(cp.count(|c| matches!(c, Call::Status(_))), 1);
}

#[tokio::test]
async fn cancellation_before_start_reports_every_resource() {
    let cp = Arc::new(ScriptedControlPlane::new());
    let clock = Arc::new(ManualClock::default());
    let (tx, cancel) = CancelSignal::pair();
    tx.send(true).unwrap();
    let (resources, plan) = prod_cache();

    let outcome = orchestrator(&cp, &clock)
        .with_cancel(cancel)
        .run(&resources, &plan)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.aggregate.state, TaskState::Cancelled);
    assert_eq!(outcome.resources.len(), 3);
    assert!(
        outcome
            .resources
            .iter()
            .all(|r| r.status == ResourceStatus::NotAttempted)
    );
    assert!(cp.calls().is_empty());
}

#[tokio::test]
async fn cancellation_during_polling_stops_the_run() {
    let (tx, cancel) = CancelSignal::pair();
    let cp = Arc::new(ScriptedControlPlane::new().idle(AggregateState::Processing));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let orch = orchestrator(&cp, &clock).with_cancel(cancel);
    let run = orch.run(&resources, &plan);
    tokio::pin!(run);

    // Let a few polls happen, then cancel.
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome.unwrap(),
            _ = tokio::task::yield_now() => {
                if cp.count(|c| matches!(c, Call::Status(_))) >= 2 {
                    let _ = tx.send(true);
                }
            }
        }
    };

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.aggregate.aggregate_id.as_deref(), Some("sub-1"));
    assert_eq!(cp.count(|c| matches!(c, Call::CreateResource(_))), 0);
    assert!(outcome.aggregate.polls < 7);
}

#[tokio::test]
async fn cancellation_between_resources_keeps_completed_ones() {
    let (tx, cancel) = CancelSignal::pair();
    let cp = Arc::new(ScriptedControlPlane::new().cancel_after_first_resource(tx));
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = Orchestrator::new(
        Arc::clone(&cp),
        ProvisionOptions {
            resource_concurrency: 1,
            ..options()
        },
    )
    .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .with_cancel(cancel)
    .run(&resources, &plan)
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.aggregate.state, TaskState::Succeeded);
    assert_eq!(outcome.resources.len(), 3);
    assert_eq!(outcome.succeeded(), 1);
    assert_eq!(
        outcome
            .resources
            .iter()
            .filter(|r| matches!(r.status, ResourceStatus::Cancelled { .. }))
            .count(),
        2
    );
    assert_eq!(cp.count(|c| matches!(c, Call::CreateResource(_))), 1);
}

#[tokio::test]
async fn cancelled_backoff_reports_last_transient_error() {
    let (tx, cancel) = CancelSignal::pair();
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .resource(
                "prod-cache-1",
                Err(RemoteError::Transient {
                    status: Some(503),
                    detail: "capacity busy".into(),
                }),
            )
            .cancel_on_failure_of("prod-cache-1", tx),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();

    let outcome = Orchestrator::new(
        Arc::clone(&cp),
        ProvisionOptions {
            resource_concurrency: 1,
            ..options()
        },
    )
    .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .with_retry(&fast_retry())
    .with_cancel(cancel)
    .run(&resources, &plan)
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    let first = outcome.resource("prod-cache-1").unwrap();
    assert_eq!(first.attempts, 1);
    match &first.status {
        ResourceStatus::Cancelled {
            last_error: Some(error),
        } => {
            assert_eq!(error.status(), Some(503));
            assert_eq!(error.detail(), "capacity busy");
        }
        other => panic!("expected cancelled with last error, got {other:?}"),
    }
    assert_eq!(outcome.failed(), 0);
    assert_eq!(cp.resource_calls("prod-cache-1"), 1);

    let json = serde_json::to_value(first).unwrap();
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["last_error"]["detail"], "capacity busy");
}

#[tokio::test]
async fn resource_creation_respects_concurrency_bound() {
    let cp = Arc::new(ScriptedControlPlane::new());
    let clock = Arc::new(ManualClock::default());
    let resources: Vec<ResourceSpec> = (1..=8).map(|i| spec(&format!("db-{i}"))).collect();
    let plan = aggregate(&resources);

    let outcome = orchestrator(&cp, &clock).run(&resources, &plan).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.resources.len(), 8);
    let peak = cp.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak in flight = {peak}");
    // Outcomes stay in input order regardless of completion order.
    for (i, r) in outcome.resources.iter().enumerate() {
        assert_eq!(r.name, format!("db-{}", i + 1));
    }
}

#[tokio::test]
async fn convert_and_provision_runs_a_sheet_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sizing.csv");
    std::fs::write(
        &path,
        "name,quantity,dataset_size_gb,throughput,replication\nprod-cache,3,10,5000,true\n",
    )
    .unwrap();
    let cp = Arc::new(ScriptedControlPlane::new());

    let outcome = capplan_provision::convert_and_provision(
        Arc::clone(&cp),
        &path,
        &Default::default(),
        &options(),
        &fast_retry(),
        CancelSignal::never(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.succeeded(), 3);
    assert_eq!(cp.calls()[0], Call::CreateAggregate(1));
}

#[tokio::test]
async fn convert_errors_surface_before_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sizing.csv");
    std::fs::write(&path, "name,qty\nx,1\n").unwrap();
    let cp = Arc::new(ScriptedControlPlane::new());

    let err = capplan_provision::convert_and_provision(
        Arc::clone(&cp),
        &path,
        &Default::default(),
        &options(),
        &fast_retry(),
        CancelSignal::never(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, capplan_provision::RunError::Convert(_)));
    assert!(cp.calls().is_empty());
}

#[tokio::test]
async fn configured_delay_cap_bounds_every_backoff() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .submit(Err(RemoteError::transient("connection reset")))
            .submit(Err(RemoteError::transient("connection reset")))
            .resource("prod-cache-1", Err(RemoteError::transient("busy")))
            .resource("prod-cache-1", Err(RemoteError::transient("busy"))),
    );
    let clock = Arc::new(ManualClock::default());
    let (resources, plan) = prod_cache();
    let retry = RetrySettings {
        base_delay_ms: 40,
        max_delay_ms: 50,
        max_elapsed_secs: 60,
    };

    let outcome = Orchestrator::new(Arc::clone(&cp), options())
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .with_retry(&retry)
        .run(&resources, &plan)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.aggregate.submit_attempts, 3);
    assert_eq!(outcome.resource("prod-cache-1").unwrap().attempts, 3);
    let sleeps = clock.sleeps.lock().unwrap().clone();
    assert_eq!(sleeps.len(), 4);
    for delay in sleeps {
        assert!(
            (Duration::from_millis(20)..=Duration::from_millis(50)).contains(&delay),
            "backoff {delay:?} outside the configured cap"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn provision_entrypoint_uses_configured_backoff() {
    let cp = Arc::new(
        ScriptedControlPlane::new()
            .submit(Err(RemoteError::transient("connection reset")))
            .submit(Err(RemoteError::transient("connection reset"))),
    );
    let (resources, plan) = prod_cache();
    let retry = RetrySettings {
        base_delay_ms: 10,
        max_delay_ms: 20,
        max_elapsed_secs: 60,
    };

    let started = tokio::time::Instant::now();
    let outcome = capplan_provision::provision(
        Arc::clone(&cp),
        &resources,
        &plan,
        &options(),
        &retry,
        CancelSignal::never(),
    )
    .await
    .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.aggregate.submit_attempts, 3);
    // Two backoffs of at most 10ms and 20ms; the default 500ms base would overshoot.
    assert!(elapsed >= Duration::from_millis(15), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(32), "{elapsed:?}");
}
