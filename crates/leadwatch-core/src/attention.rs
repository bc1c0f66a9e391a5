//! Attention filter: decides whether a lead snapshot needs a human look.

use std::fmt;

use tracing::debug;

use crate::config::Thresholds;
use crate::types::Lead;

/// The rule that flagged a lead. Rules overlap; only the first match is
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionRule {
    /// No active task and stale for more than `stale_days`.
    StaleWithoutTask,
    /// Stale for more than `stuck_days`, tasks or not.
    Stuck,
    Vip,
    Important,
    /// Medium budget and no active task.
    MediumWithoutTask,
}

impl fmt::Display for AttentionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttentionRule::StaleWithoutTask => "stale_without_task",
            AttentionRule::Stuck => "stuck",
            AttentionRule::Vip => "vip",
            AttentionRule::Important => "important",
            AttentionRule::MediumWithoutTask => "medium_without_task",
        };
        f.write_str(s)
    }
}

/// First matching rule for `lead` at unix time `now`, if any.
pub fn first_match(lead: &Lead, now: i64, t: &Thresholds) -> Option<AttentionRule> {
    let days = lead.staleness_days(now);
    let active = lead.has_active_task();

    if !active && days > t.stale_days {
        Some(AttentionRule::StaleWithoutTask)
    } else if days > t.stuck_days {
        Some(AttentionRule::Stuck)
    } else if lead.price >= t.vip_budget {
        Some(AttentionRule::Vip)
    } else if lead.price >= t.important_budget {
        Some(AttentionRule::Important)
    } else if lead.price >= t.medium_budget && !active {
        Some(AttentionRule::MediumWithoutTask)
    } else {
        None
    }
}

/// Pure decision, logged at debug level for diagnostics.
pub fn needs_attention(lead: &Lead, now: i64, t: &Thresholds) -> bool {
    match first_match(lead, now, t) {
        Some(rule) => {
            debug!(lead_id = lead.id, %rule, "lead needs attention");
            true
        }
        None => false,
    }
}
