//! Payload emission.
//!
//! Every format is a pure projection of the same resource list and plan.
//! Nothing here validates or derives data; it only serializes.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use capplan_core::{ReservationPlanEntry, ResourceSpec, ThroughputUnit};
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::EmitError;

/// Which document to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Flat array of per-database create payloads.
    Databases,
    /// `{ "creation_plan": [...] }`
    Subscription,
    /// `{ "databases": [...], "subscription": { "creation_plan": [...] } }`
    #[default]
    Combined,
    /// Terraform variables: databases keyed by name plus `creation_plans`.
    TfVars,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Databases => "databases",
            OutputFormat::Subscription => "subscription",
            OutputFormat::Combined => "combined",
            OutputFormat::TfVars => "tfvars",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "databases" => Ok(OutputFormat::Databases),
            "subscription" => Ok(OutputFormat::Subscription),
            "combined" => Ok(OutputFormat::Combined),
            "tfvars" => Ok(OutputFormat::TfVars),
            other => Err(format!(
                "unknown output format `{other}` (expected databases, subscription, combined or tfvars)"
            )),
        }
    }
}

#[derive(Serialize)]
struct SubscriptionView<'a> {
    creation_plan: &'a [ReservationPlanEntry],
}

#[derive(Serialize)]
struct CombinedView<'a> {
    databases: &'a [ResourceSpec],
    subscription: SubscriptionView<'a>,
}

#[derive(Serialize)]
struct TfDatabase<'a> {
    dataset_size_in_gb: f64,
    replication: bool,
    throughput_measurement_by: ThroughputUnit,
    throughput_measurement_value: u64,
    modules: &'a [String],
    support_oss_cluster_api: bool,
}

#[derive(Serialize)]
struct TfVarsView<'a> {
    databases: IndexMap<&'a str, TfDatabase<'a>>,
    creation_plans: &'a [ReservationPlanEntry],
}

/// Serialize `resources` and `plan` as `format` into `writer` (pretty JSON).
pub fn emit<W: Write>(
    resources: &[ResourceSpec],
    plan: &[ReservationPlanEntry],
    format: OutputFormat,
    mut writer: W,
) -> Result<(), EmitError> {
    match format {
        OutputFormat::Databases => write_json(&mut writer, &resources)?,
        OutputFormat::Subscription => write_json(
            &mut writer,
            &SubscriptionView {
                creation_plan: plan,
            },
        )?,
        OutputFormat::Combined => write_json(
            &mut writer,
            &CombinedView {
                databases: resources,
                subscription: SubscriptionView {
                    creation_plan: plan,
                },
            },
        )?,
        OutputFormat::TfVars => {
            let databases = resources
                .iter()
                .map(|r| {
                    (
                        r.name.as_str(),
                        TfDatabase {
                            dataset_size_in_gb: r.dataset_size_gb,
                            replication: r.replication,
                            throughput_measurement_by: r.throughput_unit,
                            throughput_measurement_value: r.throughput_value,
                            modules: &r.modules,
                            support_oss_cluster_api: r.oss_cluster_api,
                        },
                    )
                })
                .collect();
            write_json(
                &mut writer,
                &TfVarsView {
                    databases,
                    creation_plans: plan,
                },
            )?
        }
    }
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Render a format into an in-memory string.
pub fn render(
    resources: &[ResourceSpec],
    plan: &[ReservationPlanEntry],
    format: OutputFormat,
) -> Result<String, EmitError> {
    let mut buf = Vec::new();
    emit(resources, plan, format, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<(), EmitError> {
    serde_json::to_writer_pretty(writer, value).map_err(|e| EmitError::Serialization(e.into()))
}

/// Terraform that consumes the `tfvars` document.
pub fn hcl_snippet() -> String {
    [
        "// Generated by capplan; regenerate instead of editing.",
        "resource \"rediscloud_subscription_database\" \"db\" {",
        "  for_each                     = var.databases",
        "  subscription_id              = rediscloud_subscription.sub.id",
        "  name                         = each.key",
        "  dataset_size_in_gb           = each.value.dataset_size_in_gb",
        "  replication                  = each.value.replication",
        "  throughput_measurement_by    = each.value.throughput_measurement_by",
        "  throughput_measurement_value = each.value.throughput_measurement_value",
        "  modules                      = try(each.value.modules, [])",
        "  support_oss_cluster_api      = try(each.value.support_oss_cluster_api, false)",
        "}",
        "",
        "// Inside rediscloud_subscription.sub:",
        "// dynamic \"creation_plan\" {",
        "//   for_each = var.creation_plans",
        "//   content {",
        "//     dataset_size_in_gb           = creation_plan.value.dataset_size_in_gb",
        "//     quantity                     = creation_plan.value.quantity",
        "//     replication                  = creation_plan.value.replication",
        "//     throughput_measurement_by    = creation_plan.value.throughput_measurement_by",
        "//     throughput_measurement_value = creation_plan.value.throughput_measurement_value",
        "//   }",
        "// }",
        "",
    ]
    .join("\n")
}
