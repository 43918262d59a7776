//! Row normalization: raw cells → typed canonical fields.

use capplan_core::{CanonicalRow, Cell, RawRow, ThroughputUnit};

use crate::alias::{normalize_header, AliasTable, CanonicalField, ColumnMapping};
use crate::error::InputError;

/// Normalize a single row, resolving its headers against `aliases`.
pub fn normalize(row: &RawRow, aliases: &AliasTable) -> Result<CanonicalRow, InputError> {
    let mapping = aliases.resolve(row.headers())?;
    normalize_with(row, &mapping)
}

/// Normalize a row against an already-resolved header mapping.
pub fn normalize_with(row: &RawRow, mapping: &ColumnMapping) -> Result<CanonicalRow, InputError> {
    let cell = |field: CanonicalField| {
        mapping
            .header(field)
            .and_then(|h| row.get(h))
            .filter(|c| !c.is_blank())
    };

    let database_name = match cell(CanonicalField::DatabaseName) {
        Some(c) => text(c),
        None => {
            return Err(InputError::invalid(
                CanonicalField::DatabaseName,
                "",
                "a value is required",
            ));
        }
    };

    let dataset_size_gb = match cell(CanonicalField::DatasetSizeGb) {
        Some(c) => {
            let size = number(CanonicalField::DatasetSizeGb, c)?;
            if size <= 0.0 {
                return Err(InputError::invalid(
                    CanonicalField::DatasetSizeGb,
                    c.to_string(),
                    "must be greater than zero",
                ));
            }
            size
        }
        None => {
            return Err(InputError::invalid(
                CanonicalField::DatasetSizeGb,
                "",
                "a value is required",
            ));
        }
    };

    let quantity = match cell(CanonicalField::Quantity) {
        Some(c) => {
            let q = number(CanonicalField::Quantity, c)?;
            if q.fract() != 0.0 || q > i64::MAX as f64 || q < i64::MIN as f64 {
                return Err(InputError::InvalidQuantity {
                    quantity: c.to_string(),
                });
            }
            q as i64
        }
        None => 1,
    };

    let throughput_value = match cell(CanonicalField::ThroughputValue) {
        Some(c) => {
            let v = number(CanonicalField::ThroughputValue, c)?;
            if v < 0.0 || v.fract() != 0.0 {
                return Err(InputError::invalid(
                    CanonicalField::ThroughputValue,
                    c.to_string(),
                    "must be a non-negative whole number",
                ));
            }
            v as u64
        }
        None => 0,
    };

    let throughput_unit = match cell(CanonicalField::ThroughputUnit) {
        Some(c) => ThroughputUnit::from_normalized(&normalize_header(&text(c))).ok_or_else(
            || {
                InputError::invalid(
                    CanonicalField::ThroughputUnit,
                    c.to_string(),
                    "expected operations-per-second or number-of-shards",
                )
            },
        )?,
        None => ThroughputUnit::default(),
    };

    let replication = match cell(CanonicalField::Replication) {
        Some(c) => boolean(CanonicalField::Replication, c)?,
        None => false,
    };

    let oss_cluster_api = match cell(CanonicalField::OssClusterApi) {
        Some(c) => boolean(CanonicalField::OssClusterApi, c)?,
        None => false,
    };

    let modules = cell(CanonicalField::Modules).map(text).unwrap_or_default();

    Ok(CanonicalRow {
        database_name,
        quantity,
        dataset_size_gb,
        throughput_unit,
        throughput_value,
        replication,
        oss_cluster_api,
        modules,
    })
}

fn text(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => s.trim().to_string(),
        // Spreadsheets hand back numeric names like 101 as floats.
        Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        other => other.to_string(),
    }
}

fn number(field: CanonicalField, cell: &Cell) -> Result<f64, InputError> {
    let parsed = match cell {
        Cell::Number(n) => Some(*n),
        Cell::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
                .collect();
            cleaned.parse::<f64>().ok()
        }
        Cell::Bool(_) | Cell::Blank => None,
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(InputError::invalid(field, cell.to_string(), "not a number")),
    }
}

fn boolean(field: CanonicalField, cell: &Cell) -> Result<bool, InputError> {
    match cell {
        Cell::Bool(b) => Ok(*b),
        Cell::Number(n) => Ok(*n != 0.0),
        Cell::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "t" | "on" => Ok(true),
            "0" | "false" | "no" | "n" | "f" | "off" => Ok(false),
            _ => Err(InputError::invalid(field, s.as_str(), "not a boolean")),
        },
        Cell::Blank => Ok(false),
    }
}
