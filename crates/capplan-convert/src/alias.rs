//! Header alias resolution.
//!
//! Headers and aliases are compared in normalized form: lower-cased with
//! every non-alphanumeric character removed, so `"Dataset Size (GB)"`,
//! `"datasetSizeInGB"` and `"  DATASET_SIZE_GB "` all collapse to a known
//! alias of `dataset_size_gb`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::error::InputError;

/// The fixed set of fields a sizing row is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    DatabaseName,
    Quantity,
    DatasetSizeGb,
    ThroughputValue,
    ThroughputUnit,
    Replication,
    OssClusterApi,
    Modules,
}

impl CanonicalField {
    /// All fields, in resolution order.
    pub const ALL: [CanonicalField; 8] = [
        CanonicalField::DatabaseName,
        CanonicalField::Quantity,
        CanonicalField::DatasetSizeGb,
        CanonicalField::ThroughputValue,
        CanonicalField::ThroughputUnit,
        CanonicalField::Replication,
        CanonicalField::OssClusterApi,
        CanonicalField::Modules,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::DatabaseName => "database_name",
            CanonicalField::Quantity => "quantity",
            CanonicalField::DatasetSizeGb => "dataset_size_gb",
            CanonicalField::ThroughputValue => "throughput_value",
            CanonicalField::ThroughputUnit => "throughput_unit",
            CanonicalField::Replication => "replication",
            CanonicalField::OssClusterApi => "oss_cluster_api",
            CanonicalField::Modules => "modules",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(
            self,
            CanonicalField::DatabaseName | CanonicalField::DatasetSizeGb
        )
    }

    fn builtin_aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::DatabaseName => &[
                "databasename",
                "database",
                "dbname",
                "db",
                "name",
                "databasenames",
            ],
            CanonicalField::Quantity => {
                &["quantity", "qty", "count", "num", "number", "instances"]
            }
            CanonicalField::DatasetSizeGb => &[
                "datasetsizeingb",
                "datasetsizegb",
                "memoryingb",
                "memorygb",
                "memory",
                "sizegb",
                "datasetgb",
                "datasetsize",
                "size",
            ],
            CanonicalField::ThroughputValue => &[
                "throughputopssec",
                "throughputopspersec",
                "throughputops",
                "throughputvalue",
                "throughputmeasurementvalue",
                "throughput",
                "opssec",
                "opspersec",
                "ops",
            ],
            CanonicalField::ThroughputUnit => &[
                "throughputmeasurementby",
                "throughputunit",
                "throughputby",
                "measurementby",
            ],
            CanonicalField::Replication => &[
                "replication",
                "replicated",
                "isreplicated",
                "replica",
                "replicaenabled",
                "enablereplication",
            ],
            CanonicalField::OssClusterApi => {
                &["ossclusterapi", "osscluster", "supportossclusterapi"]
            }
            CanonicalField::Modules => &["modules", "redismodules"],
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case and strip everything that is not an ASCII letter or digit.
pub fn normalize_header(header: &str) -> String {
    header
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Canonical field → normalized aliases, in priority order.
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: HashMap<CanonicalField, Vec<String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let aliases = CanonicalField::ALL
            .iter()
            .map(|f| {
                let list = f.builtin_aliases().iter().map(|a| a.to_string()).collect();
                (*f, list)
            })
            .collect();
        Self { aliases }
    }
}

impl AliasTable {
    /// Add an extra alias for `field` at the lowest priority.
    pub fn with_alias(mut self, field: CanonicalField, alias: &str) -> Self {
        let alias = normalize_header(alias);
        if !alias.is_empty() {
            let list = self.aliases.entry(field).or_default();
            if !list.contains(&alias) {
                list.push(alias);
            }
        }
        self
    }

    pub fn aliases(&self, field: CanonicalField) -> &[String] {
        self.aliases.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a header row into a column mapping.
    ///
    /// Exact normalized matches are assigned for every field first. A
    /// substring pass then runs over the headers nobody claimed, longest
    /// alias first. Each header maps to at most one field.
    pub fn resolve<'h, I>(&self, headers: I) -> Result<ColumnMapping, InputError>
    where
        I: IntoIterator<Item = &'h str>,
    {
        let mut normalized: Vec<(&str, String)> = Vec::new();
        for header in headers {
            let key = normalize_header(header);
            if key.is_empty() || normalized.iter().any(|(_, k)| *k == key) {
                continue;
            }
            normalized.push((header, key));
        }

        let mut columns: HashMap<CanonicalField, String> = HashMap::new();
        let mut claimed: HashSet<usize> = HashSet::new();

        for field in CanonicalField::ALL {
            let hit = self.aliases(field).iter().find_map(|alias| {
                normalized
                    .iter()
                    .position(|(_, key)| key == alias)
                    .filter(|idx| !claimed.contains(idx))
            });
            if let Some(idx) = hit {
                claimed.insert(idx);
                columns.insert(field, normalized[idx].0.to_string());
            }
        }

        let mut fallback: Vec<(CanonicalField, &str)> = CanonicalField::ALL
            .iter()
            .filter(|f| !columns.contains_key(f))
            .flat_map(|f| self.aliases(*f).iter().map(move |a| (*f, a.as_str())))
            .collect();
        fallback.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        for (field, alias) in fallback {
            if columns.contains_key(&field) {
                continue;
            }
            let hit = normalized
                .iter()
                .enumerate()
                .find(|(idx, (_, key))| !claimed.contains(idx) && key.contains(alias))
                .map(|(idx, _)| idx);
            if let Some(idx) = hit {
                debug!(%field, header = normalized[idx].0, alias, "resolved column by substring");
                claimed.insert(idx);
                columns.insert(field, normalized[idx].0.to_string());
            }
        }

        let missing: Vec<CanonicalField> = CanonicalField::ALL
            .into_iter()
            .filter(|f| f.is_required() && !columns.contains_key(f))
            .collect();
        if let Some(field) = missing.first() {
            let seen: Vec<&str> = normalized.iter().map(|(h, _)| *h).collect();
            warn!(?missing, ?seen, "required columns not found");
            return Err(InputError::MissingRequiredColumn { field: *field });
        }

        Ok(ColumnMapping { columns })
    }
}

/// Result of resolving one header row: canonical field → original header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    columns: HashMap<CanonicalField, String>,
}

impl ColumnMapping {
    pub fn header(&self, field: CanonicalField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Find the environment tag column, if the sheet has one.
pub fn find_env_column<'h, I>(headers: I) -> Option<&'h str>
where
    I: IntoIterator<Item = &'h str>,
{
    headers
        .into_iter()
        .find(|h| matches!(normalize_header(h).as_str(), "env" | "environment"))
}
