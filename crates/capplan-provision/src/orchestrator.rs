//! Provisioning orchestrator: drives one run through the aggregate
//! lifecycle and then fans out resource creation.
//!
//! ```text
//! Init → AggregateSubmitted → AggregatePolling → AggregateActive
//!      → ResourcesCreating → Done { partial }
//! ```
//!
//! `Failed` is reachable from every state before `AggregateActive`;
//! `Cancelled` from any state once the caller trips the [`CancelSignal`].

use std::sync::Arc;
use std::time::Duration;

use capplan_core::{ProvisionOptions, ReservationPlanEntry, ResourceSpec, RetrySettings};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::{CancelSignal, Clock, TokioClock};
use crate::error::{ProvisionError, ProvisionResult, RemoteError};
use crate::outcome::{
    AggregateReport, ProvisioningOutcome, ResourceOutcome, ResourceStatus, RunStatus, TaskState,
};
use crate::remote::{AggregateState, ControlPlane};
use crate::retry::{RetryError, RetryPolicy, with_retry};

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionPhase {
    Init,
    AggregateSubmitted { aggregate_id: String },
    AggregatePolling,
    AggregateActive,
    ResourcesCreating { total: usize },
    Done { partial: bool },
    Failed,
    Cancelled,
}

struct RunState {
    phase: ProvisionPhase,
    report: AggregateReport,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: ProvisionPhase::Init,
            report: AggregateReport::default(),
        }
    }

    fn advance(&mut self, next: ProvisionPhase) {
        info!(from = ?self.phase, to = ?next, "provisioning phase");
        self.phase = next;
    }
}

enum PollEnd {
    Active,
    Failed(ProvisionError, TaskState),
    Cancelled,
}

/// Runs provisioning against a [`ControlPlane`].
pub struct Orchestrator<C: ControlPlane + 'static> {
    control_plane: Arc<C>,
    clock: Arc<dyn Clock>,
    options: ProvisionOptions,
    retry: RetryPolicy,
    cancel: CancelSignal,
}

impl<C: ControlPlane + 'static> Orchestrator<C> {
    pub fn new(control_plane: Arc<C>, options: ProvisionOptions) -> Self {
        let retry = RetryPolicy::new(&RetrySettings::default(), options.max_retries);
        Self {
            control_plane,
            clock: Arc::new(TokioClock::new()),
            options,
            retry,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Backoff shape; the attempt ceiling stays `options.max_retries`.
    pub fn with_retry(mut self, settings: &RetrySettings) -> Self {
        self.retry = RetryPolicy::new(settings, self.options.max_retries);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the full workflow.
    ///
    /// Only [`ProvisionError::EmptyPlan`] is returned as an error, before
    /// any remote call. Every other failure is carried in the outcome.
    pub async fn run(
        &self,
        resources: &[ResourceSpec],
        plan: &[ReservationPlanEntry],
    ) -> ProvisionResult<ProvisioningOutcome> {
        if plan.is_empty() {
            return Err(ProvisionError::EmptyPlan);
        }

        let mut run = RunState::new();
        info!(
            resources = resources.len(),
            plan_entries = plan.len(),
            "provisioning run started"
        );

        let (submitted, attempts) = with_retry(
            &self.retry,
            self.clock.as_ref(),
            &self.cancel,
            "create aggregate",
            || self.control_plane.create_aggregate(plan),
        )
        .await;
        run.report.submit_attempts = attempts;

        let aggregate_id = match submitted {
            Ok(id) => id,
            Err(RetryError::Cancelled { .. }) => return Ok(cancelled(run, resources, Vec::new())),
            Err(RetryError::Remote(source)) => {
                let error = ProvisionError::AggregateSubmission { attempts, source };
                return Ok(failed(run, resources, error, TaskState::Failed));
            }
        };
        run.report.aggregate_id = Some(aggregate_id.clone());
        run.report.state = TaskState::Submitted;
        run.advance(ProvisionPhase::AggregateSubmitted {
            aggregate_id: aggregate_id.clone(),
        });

        run.report.state = TaskState::Polling;
        run.advance(ProvisionPhase::AggregatePolling);
        match self.poll_aggregate(&aggregate_id, &mut run.report).await {
            PollEnd::Active => {}
            PollEnd::Failed(error, state) => return Ok(failed(run, resources, error, state)),
            PollEnd::Cancelled => return Ok(cancelled(run, resources, Vec::new())),
        }
        run.report.state = TaskState::Succeeded;
        run.advance(ProvisionPhase::AggregateActive);

        run.advance(ProvisionPhase::ResourcesCreating {
            total: resources.len(),
        });
        let outcomes = self.create_resources(&aggregate_id, resources).await;

        if outcomes
            .iter()
            .any(|o| matches!(o.status, ResourceStatus::Cancelled { .. }))
        {
            return Ok(cancelled(run, resources, outcomes));
        }

        let partial = outcomes.iter().any(|o| !o.is_success());
        run.advance(ProvisionPhase::Done { partial });
        let status = if partial {
            RunStatus::PartiallyCompleted
        } else {
            RunStatus::Completed
        };
        info!(
            %aggregate_id,
            %status,
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            total = outcomes.len(),
            "provisioning run finished"
        );
        Ok(ProvisioningOutcome {
            status,
            aggregate: run.report,
            resources: outcomes,
        })
    }

    async fn poll_aggregate(&self, aggregate_id: &str, report: &mut AggregateReport) -> PollEnd {
        let interval = self.options.poll_interval();
        let timeout = self.options.poll_timeout();
        let started = self.clock.now();
        let mut last = AggregateState::Pending;

        loop {
            if self.cancel.is_cancelled() {
                return PollEnd::Cancelled;
            }

            report.polls += 1;
            match self.control_plane.aggregate_status(aggregate_id).await {
                Ok(status) => {
                    debug!(%aggregate_id, poll = report.polls, state = %status.state, "aggregate status");
                    last = status.state;
                    report.last_status = Some(status.state);
                    match status.state {
                        AggregateState::Active => return PollEnd::Active,
                        AggregateState::Error => {
                            let error = ProvisionError::AggregateFailed {
                                aggregate_id: aggregate_id.to_string(),
                                detail: status.detail,
                            };
                            return PollEnd::Failed(error, TaskState::Failed);
                        }
                        AggregateState::Pending | AggregateState::Processing => {}
                    }
                }
                Err(error) if error.is_transient() => {
                    debug!(%aggregate_id, poll = report.polls, %error, "status query failed, still waiting");
                }
                Err(source) => {
                    let error = ProvisionError::AggregatePoll {
                        aggregate_id: aggregate_id.to_string(),
                        source,
                    };
                    return PollEnd::Failed(error, TaskState::Failed);
                }
            }

            let waited = self.clock.now().saturating_sub(started);
            if waited >= timeout {
                let error = ProvisionError::ProvisioningTimeout {
                    aggregate_id: aggregate_id.to_string(),
                    waited,
                    last_status: last,
                };
                return PollEnd::Failed(error, TaskState::TimedOut);
            }

            if self.cancel.is_cancelled() {
                return PollEnd::Cancelled;
            }
            let nap = interval.min(timeout - waited).max(Duration::from_millis(1));
            tokio::select! {
                _ = self.clock.sleep(nap) => {}
                _ = self.cancel.cancelled() => return PollEnd::Cancelled,
            }
        }
    }

    /// Bounded fan-out. Each worker returns its own outcome, which lands in
    /// the slot for its input index.
    async fn create_resources(
        &self,
        aggregate_id: &str,
        resources: &[ResourceSpec],
    ) -> Vec<ResourceOutcome> {
        let permits = Arc::new(Semaphore::new(self.options.resource_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for (index, spec) in resources.iter().cloned().enumerate() {
            let control_plane = Arc::clone(&self.control_plane);
            let clock = Arc::clone(&self.clock);
            let retry = self.retry.clone();
            let cancel = self.cancel.clone();
            let permits = Arc::clone(&permits);
            let aggregate_id = aggregate_id.to_string();

            workers.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        create_resource(
                            control_plane.as_ref(),
                            clock.as_ref(),
                            &retry,
                            &cancel,
                            &aggregate_id,
                            spec,
                        )
                        .await
                    }
                    Err(_) => ResourceOutcome::new(spec.name, ResourceStatus::cancelled(), 0),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ResourceOutcome>> = vec![None; resources.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "resource worker did not finish"),
            }
        }

        slots
            .into_iter()
            .zip(resources)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    ResourceOutcome::new(
                        spec.name.clone(),
                        ResourceStatus::Failed {
                            error: RemoteError::permanent("resource worker aborted"),
                        },
                        0,
                    )
                })
            })
            .collect()
    }
}

async fn create_resource<C: ControlPlane + ?Sized>(
    control_plane: &C,
    clock: &dyn Clock,
    retry: &RetryPolicy,
    cancel: &CancelSignal,
    aggregate_id: &str,
    spec: ResourceSpec,
) -> ResourceOutcome {
    let (result, attempts) = with_retry(retry, clock, cancel, &spec.name, || {
        control_plane.create_resource(aggregate_id, &spec)
    })
    .await;

    let status = match result {
        Ok(resource_id) => {
            info!(name = %spec.name, %resource_id, attempts, "resource created");
            ResourceStatus::Succeeded { resource_id }
        }
        Err(RetryError::Remote(error)) => {
            warn!(name = %spec.name, attempts, %error, "resource creation failed");
            ResourceStatus::Failed { error }
        }
        Err(RetryError::Cancelled { last_error }) => {
            debug!(name = %spec.name, attempts, "resource creation cancelled");
            ResourceStatus::Cancelled { last_error }
        }
    };
    ResourceOutcome::new(spec.name, status, attempts)
}

fn failed(
    mut run: RunState,
    resources: &[ResourceSpec],
    error: ProvisionError,
    state: TaskState,
) -> ProvisioningOutcome {
    warn!(%error, "provisioning run failed");
    run.report.state = state;
    run.report.error = Some(error);
    run.advance(ProvisionPhase::Failed);
    ProvisioningOutcome {
        status: RunStatus::Failed,
        aggregate: run.report,
        resources: resources
            .iter()
            .map(|r| ResourceOutcome::not_attempted(r.name.clone()))
            .collect(),
    }
}

/// `done` holds outcomes for resources that were scheduled; anything past
/// it was never reached.
fn cancelled(
    mut run: RunState,
    resources: &[ResourceSpec],
    done: Vec<ResourceOutcome>,
) -> ProvisioningOutcome {
    if run.report.state != TaskState::Succeeded {
        run.report.state = TaskState::Cancelled;
    }
    run.advance(ProvisionPhase::Cancelled);
    let reached = done.len();
    let mut outcomes = done;
    outcomes.extend(
        resources[reached.min(resources.len())..]
            .iter()
            .map(|r| ResourceOutcome::not_attempted(r.name.clone())),
    );
    info!(
        completed = outcomes.iter().filter(|o| o.is_success()).count(),
        total = outcomes.len(),
        "provisioning run cancelled"
    );
    ProvisioningOutcome {
        status: RunStatus::Cancelled,
        aggregate: run.report,
        resources: outcomes,
    }
}
