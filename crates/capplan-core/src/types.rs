//! Shared types used across capplan crates.
//!
//! `ResourceSpec` and `ReservationPlanEntry` serialize directly into the
//! payload shapes the control plane expects, so the emitter never has to
//! re-derive anything from them.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ── Input ──────────────────────────────────────────────────────────

/// A single cell as read from a sizing sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Whether the cell carries no usable value (empty or whitespace-only).
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
            Cell::Bool(_) => false,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Cell::Blank
        } else {
            Cell::Text(s.to_string())
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Blank => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One input row: header → cell, in sheet column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, Cell)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: impl Into<String>, cell: Cell) {
        self.cells.push((header.into(), cell));
    }

    /// Builder-style insert, handy for tests and fixtures.
    pub fn with(mut self, header: impl Into<String>, cell: impl Into<Cell>) -> Self {
        self.push(header, cell.into());
        self
    }

    /// Look up a cell by its exact header. The first column wins on duplicates.
    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, c)| c)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(h, _)| h.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(h, c)| (h.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True when every cell in the row is blank (trailing spreadsheet rows).
    pub fn is_all_blank(&self) -> bool {
        self.cells.iter().all(|(_, c)| c.is_blank())
    }
}

impl FromIterator<(String, Cell)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

// ── Canonical model ────────────────────────────────────────────────

/// How a database's throughput is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThroughputUnit {
    #[default]
    OperationsPerSecond,
    NumberOfShards,
}

impl ThroughputUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThroughputUnit::OperationsPerSecond => "operations-per-second",
            ThroughputUnit::NumberOfShards => "number-of-shards",
        }
    }

    /// Parse a unit from an already-normalized (lowercase alphanumeric) string.
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "operationspersecond" | "opspersecond" | "opssec" | "ops" | "opspersec" => {
                Some(ThroughputUnit::OperationsPerSecond)
            }
            "numberofshards" | "shards" | "shardcount" => Some(ThroughputUnit::NumberOfShards),
            _ => None,
        }
    }
}

impl fmt::Display for ThroughputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sizing row after header resolution and type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub database_name: String,
    /// Validated as a positive integer during materialization.
    pub quantity: i64,
    pub dataset_size_gb: f64,
    pub throughput_unit: ThroughputUnit,
    pub throughput_value: u64,
    pub replication: bool,
    pub oss_cluster_api: bool,
    /// Raw comma-separated module list.
    pub modules: String,
}

/// One database to be created under the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(rename = "dataset_size_in_gb")]
    pub dataset_size_gb: f64,
    #[serde(default)]
    pub replication: bool,
    #[serde(rename = "throughput_measurement_by", default)]
    pub throughput_unit: ThroughputUnit,
    #[serde(rename = "throughput_measurement_value", default)]
    pub throughput_value: u64,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(rename = "support_oss_cluster_api", default)]
    pub oss_cluster_api: bool,
}

impl ResourceSpec {
    pub fn signature(&self) -> CapacitySignature {
        CapacitySignature {
            dataset_size_gb: self.dataset_size_gb,
            replication: self.replication,
            throughput_unit: self.throughput_unit,
            throughput_value: self.throughput_value,
        }
    }
}

/// Aggregation key: resources with equal signatures are fungible for
/// capacity reservation.
///
/// Equality and hashing use the bit pattern of the size, which is exact for
/// the finite positive sizes the normalizer admits.
#[derive(Debug, Clone, Copy)]
pub struct CapacitySignature {
    pub dataset_size_gb: f64,
    pub replication: bool,
    pub throughput_unit: ThroughputUnit,
    pub throughput_value: u64,
}

impl PartialEq for CapacitySignature {
    fn eq(&self, other: &Self) -> bool {
        self.dataset_size_gb.to_bits() == other.dataset_size_gb.to_bits()
            && self.replication == other.replication
            && self.throughput_unit == other.throughput_unit
            && self.throughput_value == other.throughput_value
    }
}

impl Eq for CapacitySignature {}

impl Hash for CapacitySignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dataset_size_gb.to_bits().hash(state);
        self.replication.hash(state);
        self.throughput_unit.hash(state);
        self.throughput_value.hash(state);
    }
}

/// One aggregated capacity reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationPlanEntry {
    #[serde(rename = "dataset_size_in_gb")]
    pub dataset_size_gb: f64,
    #[serde(rename = "quantity")]
    pub count: u32,
    #[serde(default)]
    pub replication: bool,
    #[serde(rename = "throughput_measurement_by", default)]
    pub throughput_unit: ThroughputUnit,
    #[serde(rename = "throughput_measurement_value", default)]
    pub throughput_value: u64,
}

impl ReservationPlanEntry {
    pub fn new(signature: CapacitySignature, count: u32) -> Self {
        Self {
            dataset_size_gb: signature.dataset_size_gb,
            count,
            replication: signature.replication,
            throughput_unit: signature.throughput_unit,
            throughput_value: signature.throughput_value,
        }
    }

    pub fn signature(&self) -> CapacitySignature {
        CapacitySignature {
            dataset_size_gb: self.dataset_size_gb,
            replication: self.replication,
            throughput_unit: self.throughput_unit,
            throughput_value: self.throughput_value,
        }
    }
}

// ── Payload documents ──────────────────────────────────────────────

/// The `subscription` block of a combined payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    #[serde(default)]
    pub creation_plan: Vec<ReservationPlanEntry>,
}

/// Combined document: `databases` plus `subscription.creation_plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningPayload {
    #[serde(default)]
    pub databases: Vec<ResourceSpec>,
    #[serde(default)]
    pub subscription: SubscriptionPlan,
}

impl ProvisioningPayload {
    pub fn new(databases: Vec<ResourceSpec>, plan: Vec<ReservationPlanEntry>) -> Self {
        Self {
            databases,
            subscription: SubscriptionPlan {
                creation_plan: plan,
            },
        }
    }
}
