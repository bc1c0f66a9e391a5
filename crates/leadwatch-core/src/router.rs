//! Critical / normal split for changed, attention-worthy leads.

use crate::config::Thresholds;
use crate::types::Lead;

#[derive(Debug, Default, PartialEq)]
pub struct Routed {
    /// Processed one at a time through the workflow.
    pub critical: Vec<Lead>,
    /// Grouped into scorer batches.
    pub normal: Vec<Lead>,
}

/// VIP budget or fully stuck.
pub fn is_critical(lead: &Lead, now: i64, t: &Thresholds) -> bool {
    lead.price >= t.vip_budget || lead.staleness_days(now) > t.stuck_days
}

pub fn route(leads: Vec<Lead>, now: i64, t: &Thresholds) -> Routed {
    let (critical, normal) = leads.into_iter().partition(|l| is_critical(l, now, t));
    Routed { critical, normal }
}

/// Split into batches of at most `size`, preserving order. A zero size is
/// treated as one.
pub fn batches(leads: &[Lead], size: usize) -> std::slice::Chunks<'_, Lead> {
    leads.chunks(size.max(1))
}
