use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use capplan_core::{
    CapplanConfig, ProvisionOptions, ProvisioningPayload, ReservationPlanEntry, ResourceSpec,
};
use capplan_provision::{
    CancelSignal, HttpControlPlane, ProvisioningOutcome, ResourceStatus, RunStatus,
};
use clap::{Args, ValueEnum};
use tracing::{info, warn};

use super::convert::SheetArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

/// Overrides for the `[provision]` section.
#[derive(Args)]
pub struct ProvisionFlags {
    /// Seconds between aggregate status checks
    #[arg(long)]
    pub poll_interval: Option<u64>,
    /// Give up waiting for the aggregate after this many seconds
    #[arg(long)]
    pub poll_timeout: Option<u64>,
    /// Attempt ceiling for each remote call
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// Database creations in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Outcome report format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputMode,
}

impl ProvisionFlags {
    pub fn apply(&self, options: &mut ProvisionOptions) {
        if let Some(v) = self.poll_interval {
            options.poll_interval_secs = v;
        }
        if let Some(v) = self.poll_timeout {
            options.poll_timeout_secs = v;
        }
        if let Some(v) = self.max_retries {
            options.max_retries = v;
        }
        if let Some(v) = self.concurrency {
            options.resource_concurrency = v;
        }
    }
}

pub async fn provision_payload(
    path: &Path,
    flags: &ProvisionFlags,
    config: CapplanConfig,
) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let payload: ProvisioningPayload = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a combined payload: {e}", path.display()))?;
    info!(
        path = %path.display(),
        databases = payload.databases.len(),
        plan_entries = payload.subscription.creation_plan.len(),
        "payload loaded"
    );
    provision(
        &payload.databases,
        &payload.subscription.creation_plan,
        flags,
        config,
    )
    .await
}

pub async fn convert_and_provision(
    sheet: &SheetArgs,
    flags: &ProvisionFlags,
    config: CapplanConfig,
) -> anyhow::Result<ExitCode> {
    let conversion = sheet.convert(&config)?;
    provision(&conversion.resources, &conversion.plan, flags, config).await
}

async fn provision(
    resources: &[ResourceSpec],
    plan: &[ReservationPlanEntry],
    flags: &ProvisionFlags,
    mut config: CapplanConfig,
) -> anyhow::Result<ExitCode> {
    flags.apply(&mut config.provision);
    config.validate()?;

    let missing = config.missing_control_plane_fields();
    if !missing.is_empty() {
        anyhow::bail!("control plane not configured: set {}", missing.join(", "));
    }
    let client = Arc::new(HttpControlPlane::new(&config.control_plane)?);

    let (cancel_tx, cancel) = CancelSignal::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling provisioning run");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = capplan_provision::provision(
        client,
        resources,
        plan,
        &config.provision,
        &config.retry,
        cancel,
    )
    .await?;

    match flags.output {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputMode::Text => println!("{}", format_outcome(&outcome)),
    }
    Ok(ExitCode::from(exit_status(outcome.status)))
}

fn exit_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::Failed => 1,
        RunStatus::PartiallyCompleted => 2,
        RunStatus::Cancelled => 130,
    }
}

pub fn format_outcome(outcome: &ProvisioningOutcome) -> String {
    let mut out = String::new();
    let agg = &outcome.aggregate;

    out.push_str(&format!("\nProvisioning {}\n\n", outcome.status));
    out.push_str(&format!(
        "  Aggregate:  {} ({:?}, {} poll(s), {} submit attempt(s))\n",
        agg.aggregate_id.as_deref().unwrap_or("-"),
        agg.state,
        agg.polls,
        agg.submit_attempts
    ));
    if let Some(error) = &agg.error {
        out.push_str(&format!("  Error:      {error}\n"));
    }
    out.push_str(&format!(
        "  Databases:  {}/{} created\n\n",
        outcome.succeeded(),
        outcome.resources.len()
    ));

    for r in &outcome.resources {
        let (mark, detail) = match &r.status {
            ResourceStatus::Succeeded { resource_id } => ("✓", resource_id.clone()),
            ResourceStatus::Failed { error } => ("✗", error.to_string()),
            ResourceStatus::NotAttempted => ("-", "not attempted".to_string()),
            ResourceStatus::Cancelled { last_error: None } => ("⊘", "cancelled".to_string()),
            ResourceStatus::Cancelled {
                last_error: Some(error),
            } => ("⊘", format!("cancelled after {error}")),
        };
        out.push_str(&format!(
            "  {mark} {:<30} {detail} [{} attempt(s)]\n",
            r.name, r.attempts
        ));
    }

    out
}
