//! Provisioning error types.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::remote::AggregateState;

/// A failed call against the control plane, classified for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// Network failure, timeout, 408, 429 or 5xx. Worth retrying.
    #[error("transient control plane error: {detail}")]
    Transient { status: Option<u16>, detail: String },

    /// Validation, authentication or any other refusal. Never retried.
    #[error("control plane rejected request: {detail}")]
    Permanent { status: Option<u16>, detail: String },
}

impl RemoteError {
    pub fn transient(detail: impl Into<String>) -> Self {
        RemoteError::Transient {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        RemoteError::Permanent {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }

    /// HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transient { status, .. } | RemoteError::Permanent { status, .. } => {
                *status
            }
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            RemoteError::Transient { detail, .. } | RemoteError::Permanent { detail, .. } => detail,
        }
    }
}

/// Errors that end a provisioning run (or stop it from starting).
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvisionError {
    #[error("reservation plan is empty; nothing to submit")]
    EmptyPlan,

    #[error("aggregate submission failed after {attempts} attempt(s): {source}")]
    AggregateSubmission {
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error(
        "aggregate {aggregate_id} entered error state: {}",
        .detail.as_deref().unwrap_or("no detail given")
    )]
    AggregateFailed {
        aggregate_id: String,
        detail: Option<String>,
    },

    #[error(
        "aggregate {aggregate_id} not active after {waited:?} (last status: {last_status}); check it manually"
    )]
    ProvisioningTimeout {
        aggregate_id: String,
        waited: Duration,
        last_status: AggregateState,
    },

    #[error("status query for aggregate {aggregate_id} rejected: {source}")]
    AggregatePoll {
        aggregate_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("control plane client: {0}")]
    Client(String),
}

impl ProvisionError {
    /// The aggregate id an operator should follow up on, if one was issued.
    pub fn aggregate_id(&self) -> Option<&str> {
        match self {
            ProvisionError::AggregateFailed { aggregate_id, .. }
            | ProvisionError::ProvisioningTimeout { aggregate_id, .. }
            | ProvisionError::AggregatePoll { aggregate_id, .. } => Some(aggregate_id),
            _ => None,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Failure of a combined convert-then-provision call.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Convert(#[from] capplan_convert::ConvertError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}
