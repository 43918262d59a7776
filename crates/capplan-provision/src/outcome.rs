//! What a provisioning run reports back.

use std::fmt;

use serde::Serialize;

use crate::error::{ProvisionError, RemoteError};
use crate::remote::AggregateState;

/// Final verdict for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Aggregate active, every resource created.
    Completed,
    /// Aggregate active, at least one resource failed.
    PartiallyCompleted,
    /// The aggregate never became active; no resources were attempted.
    Failed,
    /// The caller cancelled. Resources created before that are still listed.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::PartiallyCompleted => "partially_completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the aggregate task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotSubmitted,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    /// Outcome unknown: the remote side may still finish.
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub aggregate_id: Option<String>,
    pub state: TaskState,
    pub submit_attempts: u32,
    pub polls: u32,
    pub last_status: Option<AggregateState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProvisionError>,
}

impl Default for AggregateReport {
    fn default() -> Self {
        Self {
            aggregate_id: None,
            state: TaskState::NotSubmitted,
            submit_attempts: 0,
            polls: 0,
            last_status: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Succeeded { resource_id: String },
    Failed { error: RemoteError },
    /// The run ended before this resource's turn.
    NotAttempted,
    /// Cancellation arrived while this resource was queued or backing off.
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_error: Option<RemoteError>,
    },
}

impl ResourceStatus {
    pub fn cancelled() -> Self {
        ResourceStatus::Cancelled { last_error: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: ResourceStatus,
    pub attempts: u32,
}

impl ResourceOutcome {
    pub fn new(name: impl Into<String>, status: ResourceStatus, attempts: u32) -> Self {
        Self {
            name: name.into(),
            status,
            attempts,
        }
    }

    pub fn not_attempted(name: impl Into<String>) -> Self {
        Self::new(name, ResourceStatus::NotAttempted, 0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ResourceStatus::Succeeded { .. })
    }

    pub fn resource_id(&self) -> Option<&str> {
        match &self.status {
            ResourceStatus::Succeeded { resource_id } => Some(resource_id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match &self.status {
            ResourceStatus::Failed { error } => Some(error),
            ResourceStatus::Cancelled { last_error } => last_error.as_ref(),
            _ => None,
        }
    }
}

/// Full report of one run. Lists every resource exactly once, in input
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningOutcome {
    pub status: RunStatus,
    pub aggregate: AggregateReport,
    pub resources: Vec<ResourceOutcome>,
}

impl ProvisioningOutcome {
    pub fn error(&self) -> Option<&ProvisionError> {
        self.aggregate.error.as_ref()
    }

    pub fn succeeded(&self) -> usize {
        self.resources.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| matches!(r.status, ResourceStatus::Failed { .. }))
            .count()
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceOutcome> {
        self.resources.iter().find(|r| r.name == name)
    }
}
