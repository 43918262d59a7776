//! capplan-provision: reserve capacity for a converted sizing sheet, wait for
//! the reservation to become active, then create every database in it.
//!
//! The remote side is abstracted behind [`ControlPlane`]; [`HttpControlPlane`]
//! is the REST binding. Runs are driven by [`Orchestrator`].

pub mod clock;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod outcome;
pub mod remote;
pub mod retry;

use std::path::Path;
use std::sync::Arc;

use capplan_core::{
    ConvertSettings, ProvisionOptions, ReservationPlanEntry, ResourceSpec, RetrySettings,
};

pub use clock::{CancelSignal, Clock, TokioClock};
pub use error::{ProvisionError, ProvisionResult, RemoteError, RunError};
pub use http::HttpControlPlane;
pub use orchestrator::{Orchestrator, ProvisionPhase};
pub use outcome::{
    AggregateReport, ProvisioningOutcome, ResourceOutcome, ResourceStatus, RunStatus, TaskState,
};
pub use remote::{AggregateState, AggregateStatus, ControlPlane};
pub use retry::RetryPolicy;

/// Provision `resources` under the reservation `plan`, backing off between
/// retried calls as `retry` describes.
pub async fn provision<C: ControlPlane + 'static>(
    control_plane: Arc<C>,
    resources: &[ResourceSpec],
    plan: &[ReservationPlanEntry],
    options: &ProvisionOptions,
    retry: &RetrySettings,
    cancel: CancelSignal,
) -> ProvisionResult<ProvisioningOutcome> {
    Orchestrator::new(control_plane, options.clone())
        .with_retry(retry)
        .with_cancel(cancel)
        .run(resources, plan)
        .await
}

/// Convert the sizing sheet at `path`, then provision the result.
pub async fn convert_and_provision<C: ControlPlane + 'static>(
    control_plane: Arc<C>,
    path: &Path,
    settings: &ConvertSettings,
    options: &ProvisionOptions,
    retry: &RetrySettings,
    cancel: CancelSignal,
) -> Result<ProvisioningOutcome, RunError> {
    let conversion = capplan_convert::convert(path, settings)?;
    let outcome = provision(
        control_plane,
        &conversion.resources,
        &conversion.plan,
        options,
        retry,
        cancel,
    )
    .await?;
    Ok(outcome)
}
