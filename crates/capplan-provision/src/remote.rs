//! The remote control plane seam.
//!
//! The orchestrator only ever talks to a [`ControlPlane`]. The production
//! binding is [`crate::http::HttpControlPlane`]; tests script their own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use capplan_core::{ReservationPlanEntry, ResourceSpec};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Lifecycle of an aggregate reservation on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Pending,
    Processing,
    Active,
    Error,
}

impl AggregateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateState::Pending => "pending",
            AggregateState::Processing => "processing",
            AggregateState::Active => "active",
            AggregateState::Error => "error",
        }
    }

    /// Map a vendor status word onto the four states. Unknown words count
    /// as still processing.
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "active" | "activated" | "running" | "ready" => AggregateState::Active,
            "error" | "failed" => AggregateState::Error,
            "pending" => AggregateState::Pending,
            _ => AggregateState::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AggregateState::Active | AggregateState::Error)
    }
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub state: AggregateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AggregateStatus {
    pub fn new(state: AggregateState) -> Self {
        Self {
            state,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Operations the orchestrator needs from the remote side.
///
/// Implementations must be safe to call from several resource workers at
/// once.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit the grouped reservation plan. Returns the aggregate id.
    async fn create_aggregate(&self, plan: &[ReservationPlanEntry]) -> Result<String, RemoteError>;

    async fn aggregate_status(&self, aggregate_id: &str) -> Result<AggregateStatus, RemoteError>;

    /// Create one database inside an active aggregate. Returns its id.
    async fn create_resource(
        &self,
        aggregate_id: &str,
        spec: &ResourceSpec,
    ) -> Result<String, RemoteError>;
}

#[async_trait]
impl<T: ControlPlane + ?Sized> ControlPlane for Arc<T> {
    async fn create_aggregate(&self, plan: &[ReservationPlanEntry]) -> Result<String, RemoteError> {
        (**self).create_aggregate(plan).await
    }

    async fn aggregate_status(&self, aggregate_id: &str) -> Result<AggregateStatus, RemoteError> {
        (**self).aggregate_status(aggregate_id).await
    }

    async fn create_resource(
        &self,
        aggregate_id: &str,
        spec: &ResourceSpec,
    ) -> Result<String, RemoteError> {
        (**self).create_resource(aggregate_id, spec).await
    }
}
