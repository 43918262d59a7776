//! capplan-convert: sizing sheet → resource list + capacity reservation plan.
//!
//! # Pipeline
//!
//! ```text
//! reader::read_table      file → Table { headers, rows }
//! AliasTable::resolve     headers → ColumnMapping        (once per file)
//! normalize::normalize_with   RawRow → CanonicalRow
//! materialize::materialize    CanonicalRow → Vec<ResourceSpec>
//! aggregate::aggregate        &[ResourceSpec] → Vec<ReservationPlanEntry>
//! emit::emit                  resources + plan → JSON document
//! ```
//!
//! `ResourceSpec` is the single source of truth; the plan and every emitted
//! format are projections of it.

pub mod aggregate;
pub mod alias;
pub mod emit;
pub mod error;
pub mod materialize;
pub mod normalize;
pub mod reader;
pub mod report;

use std::collections::HashMap;
use std::path::Path;

use capplan_core::{
    ConvertSettings, ProvisioningPayload, ReservationPlanEntry, ResourceSpec, RowErrorPolicy,
};
use tracing::{info, warn};

pub use aggregate::aggregate;
pub use alias::{AliasTable, CanonicalField, ColumnMapping};
pub use emit::{OutputFormat, emit, hcl_snippet};
pub use error::{ConvertError, ConvertResult, EmitError, InputError};
pub use materialize::{MaterializeOptions, materialize};
pub use normalize::normalize;
pub use reader::{Table, read_table};

/// A row left out under [`RowErrorPolicy::Skip`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub line: usize,
    pub error: InputError,
}

/// Result of converting one sizing sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversion {
    pub resources: Vec<ResourceSpec>,
    pub plan: Vec<ReservationPlanEntry>,
    pub skipped: Vec<SkippedRow>,
    /// Data rows considered after the environment filter.
    pub rows_read: usize,
}

impl Conversion {
    pub fn payload(&self) -> ProvisioningPayload {
        ProvisioningPayload::new(self.resources.clone(), self.plan.clone())
    }

    pub fn into_payload(self) -> ProvisioningPayload {
        ProvisioningPayload::new(self.resources, self.plan)
    }
}

/// Convert a sizing sheet on disk using the built-in alias table.
pub fn convert(path: &Path, settings: &ConvertSettings) -> ConvertResult<Conversion> {
    let table = read_table(path, settings.sheet.as_deref())?;
    let conversion = convert_table(&table, &AliasTable::default(), settings)?;
    info!(
        path = %path.display(),
        rows = conversion.rows_read,
        resources = conversion.resources.len(),
        plan_entries = conversion.plan.len(),
        skipped = conversion.skipped.len(),
        "sizing sheet converted"
    );
    Ok(conversion)
}

/// Convert an already-loaded table.
pub fn convert_table(
    table: &Table,
    aliases: &AliasTable,
    settings: &ConvertSettings,
) -> ConvertResult<Conversion> {
    let mapping = aliases
        .resolve(table.headers())
        .map_err(ConvertError::Columns)?;

    let env_column = match &settings.env_filter {
        Some(env) => {
            let column = alias::find_env_column(table.headers());
            if column.is_none() {
                warn!(%env, "environment filter ignored: sheet has no env column");
            }
            column.map(|c| (c, env.trim().to_lowercase()))
        }
        None => None,
    };

    let options = MaterializeOptions {
        default_modules: settings.default_modules.clone(),
        size_precision: settings.size_precision,
        max_quantity: settings.max_quantity,
    };

    let mut conversion = Conversion::default();
    let mut seen_names: HashMap<String, usize> = HashMap::new();

    for source in &table.rows {
        if source.row.is_all_blank() {
            continue;
        }
        if let Some((column, wanted)) = &env_column {
            let value = source
                .row
                .get(column)
                .map(|c| c.to_string().trim().to_lowercase())
                .unwrap_or_default();
            if &value != wanted {
                continue;
            }
        }
        conversion.rows_read += 1;

        let result = normalize::normalize_with(&source.row, &mapping)
            .and_then(|canonical| materialize(&canonical, &options))
            .and_then(|specs| {
                for spec in &specs {
                    if let Some(first_line) = seen_names.get(&spec.name) {
                        return Err(InputError::DuplicateName {
                            name: spec.name.clone(),
                            first_line: *first_line,
                        });
                    }
                }
                Ok(specs)
            });

        match result {
            Ok(specs) => {
                for spec in &specs {
                    seen_names.insert(spec.name.clone(), source.line);
                }
                conversion.resources.extend(specs);
            }
            Err(error) => match settings.on_invalid_row {
                RowErrorPolicy::Abort => {
                    return Err(ConvertError::Row {
                        line: source.line,
                        source: error,
                    });
                }
                RowErrorPolicy::Skip => {
                    warn!(line = source.line, %error, "skipping invalid row");
                    conversion.skipped.push(SkippedRow {
                        line: source.line,
                        error,
                    });
                }
            },
        }
    }

    conversion.plan = aggregate(&conversion.resources);
    Ok(conversion)
}
