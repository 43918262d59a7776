//! Quantity expansion: one canonical row → N resource specs.

use capplan_core::{CanonicalRow, ResourceSpec, DEFAULT_MAX_QUANTITY};

use crate::alias::CanonicalField;
use crate::error::InputError;

/// Per-run materialization settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOptions {
    /// Modules given to a resource whose row lists none.
    pub default_modules: Vec<String>,
    /// Round sizes to this many decimals. `None` keeps full precision.
    pub size_precision: Option<u32>,
    /// Upper bound on a row's quantity.
    pub max_quantity: u32,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            default_modules: Vec::new(),
            size_precision: None,
            max_quantity: DEFAULT_MAX_QUANTITY,
        }
    }
}

/// Split a module list on `,`, `;` or `|`, trimming entries and dropping
/// blanks and repeats (first occurrence wins).
pub fn parse_modules(raw: &str) -> Vec<String> {
    let mut modules: Vec<String> = Vec::new();
    for m in raw.split([',', ';', '|']).map(str::trim).filter(|m| !m.is_empty()) {
        if !modules.iter().any(|existing| existing == m) {
            modules.push(m.to_string());
        }
    }
    modules
}

/// Expand a row into exactly `quantity` resource specs.
///
/// A single resource keeps the row's name verbatim; larger quantities get
/// a 1-based `-N` suffix.
pub fn materialize(
    row: &CanonicalRow,
    options: &MaterializeOptions,
) -> Result<Vec<ResourceSpec>, InputError> {
    let quantity = u32::try_from(row.quantity)
        .ok()
        .filter(|q| *q > 0 && *q <= options.max_quantity)
        .ok_or_else(|| InputError::InvalidQuantity {
            quantity: row.quantity.to_string(),
        })?;

    let dataset_size_gb = match options.size_precision {
        Some(places) => {
            let rounded = round_to(row.dataset_size_gb, places);
            if rounded <= 0.0 {
                return Err(InputError::invalid(
                    CanonicalField::DatasetSizeGb,
                    row.dataset_size_gb.to_string(),
                    format!("rounds to zero at {places} decimal places"),
                ));
            }
            rounded
        }
        None => row.dataset_size_gb,
    };

    let mut modules = parse_modules(&row.modules);
    if modules.is_empty() {
        modules = options.default_modules.clone();
    }

    let base = row.database_name.trim();
    let specs = (1..=quantity)
        .map(|i| ResourceSpec {
            name: if quantity == 1 {
                base.to_string()
            } else {
                format!("{base}-{i}")
            },
            dataset_size_gb,
            replication: row.replication,
            throughput_unit: row.throughput_unit,
            throughput_value: row.throughput_value,
            // Each spec owns its list; no sharing between siblings.
            modules: modules.clone(),
            oss_cluster_api: row.oss_cluster_api,
        })
        .collect();

    Ok(specs)
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places.min(15) as i32);
    (value * factor).round() / factor
}
