//! Capacity plan aggregation.

use capplan_core::{CapacitySignature, ReservationPlanEntry, ResourceSpec};
use indexmap::IndexMap;

/// Group resources by capacity signature, in first-seen order.
pub fn aggregate(resources: &[ResourceSpec]) -> Vec<ReservationPlanEntry> {
    let mut groups: IndexMap<CapacitySignature, u32> = IndexMap::new();
    for resource in resources {
        let count = groups.entry(resource.signature()).or_insert(0);
        *count = count.saturating_add(1);
    }
    groups
        .into_iter()
        .map(|(signature, count)| ReservationPlanEntry::new(signature, count))
        .collect()
}

/// Total number of resources a plan reserves capacity for.
pub fn reserved_count(plan: &[ReservationPlanEntry]) -> usize {
    plan.iter().map(|e| e.count as usize).sum()
}

/// Re-expand a plan into one signature per reserved resource.
pub fn expand(plan: &[ReservationPlanEntry]) -> Vec<CapacitySignature> {
    plan.iter()
        .flat_map(|e| std::iter::repeat_n(e.signature(), e.count as usize))
        .collect()
}
