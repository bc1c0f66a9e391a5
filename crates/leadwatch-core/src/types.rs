use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LeadwatchError;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Lead
// ---------------------------------------------------------------------------

/// A sales opportunity as reported by the CRM. Read-only to the core.
///
/// Timestamps are unix seconds, the CRM's native representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Budget. Currency-agnostic.
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub status_id: u64,
    #[serde(default)]
    pub pipeline_id: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Lead {
    /// Elapsed days since the last recorded update.
    ///
    /// A lead without an `updated_at` counts as freshly updated.
    pub fn staleness_days(&self, now: i64) -> f64 {
        if self.updated_at <= 0 {
            return 0.0;
        }
        (now - self.updated_at) as f64 / SECONDS_PER_DAY
    }

    /// Whole days since the last update, for display.
    pub fn days_since_update(&self, now: i64) -> i64 {
        self.staleness_days(now).floor() as i64
    }

    /// True when any associated task is not completed.
    pub fn has_active_task(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: u64,
    /// Lead the task is attached to.
    #[serde(default)]
    pub entity_id: u64,
    #[serde(default)]
    pub text: String,
    /// Deadline, unix seconds.
    #[serde(default)]
    pub complete_till: i64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub created_at: i64,
}

/// Task as submitted to the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub text: String,
    /// Deadline, unix seconds.
    pub complete_till: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub text: String,
}

/// Partial lead update. Absent fields are left untouched by the CRM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible_user_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub statuses: Vec<PipelineStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub id: u64,
    pub name: String,
}

/// Filter passed to `list_leads`. Empty means "all leads".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// RiskLevel / Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Scorer bands: LOW 0-25, MEDIUM 26-50, HIGH 51-75, CRITICAL 76-100.
    pub fn band(score: u8) -> Self {
        match score {
            0..=25 => RiskLevel::Low,
            26..=50 => RiskLevel::Medium,
            51..=75 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Level used when rendering a proposal from a bare score.
    pub fn from_score(score: u8) -> Self {
        if score > 70 {
            RiskLevel::Critical
        } else if score > 40 {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            _ => Err(LeadwatchError::malformed(
                "scorer",
                format!("unknown risk level '{s}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }

    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Priority::Low,
            RiskLevel::Medium => Priority::Medium,
            RiskLevel::High | RiskLevel::Critical => Priority::High,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            _ => Err(LeadwatchError::malformed(
                "scorer",
                format!("unknown priority '{s}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer contract
// ---------------------------------------------------------------------------

/// Compact per-lead summary sent to the scorer in batch mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadFacts {
    pub id: u64,
    pub name: String,
    pub staleness_days: i64,
    pub budget: i64,
    pub status_id: u64,
    #[serde(default)]
    pub task_count: usize,
    #[serde(default)]
    pub note_count: usize,
}

impl LeadFacts {
    pub fn from_lead(lead: &Lead, now: i64) -> Self {
        Self {
            id: lead.id,
            name: lead.name.clone(),
            staleness_days: lead.days_since_update(now),
            budget: lead.price,
            status_id: lead.status_id,
            task_count: lead.tasks.len(),
            note_count: lead.notes.len(),
        }
    }
}

/// Assessment returned by the scorer for one lead.
///
/// Decoding is tolerant: any JSON object yields an assessment. Enum names
/// match in any case, fractional or string scores are rounded into 0-100,
/// and a missing level is derived from the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAssessment")]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub priority: Priority,
    #[serde(default)]
    pub action_needed: bool,
    /// Raw action type string as proposed by the scorer.
    #[serde(default)]
    pub recommended_action: Option<String>,
    /// Task text when the scorer proposes `create_task`.
    #[serde(default)]
    pub task_text: Option<String>,
    /// Target status when the scorer proposes `update_status`.
    #[serde(default)]
    pub new_status_id: Option<u64>,
    #[serde(default)]
    pub reasoning: String,
}

impl RiskAssessment {
    /// Deterministic result used when the scorer fails for a batch.
    pub fn fallback() -> Self {
        Self {
            risk_score: 0,
            risk_level: RiskLevel::Low,
            priority: Priority::Low,
            action_needed: false,
            recommended_action: None,
            task_text: None,
            new_status_id: None,
            reasoning: "Batch analysis failed".to_string(),
        }
    }
}

/// Scorer output as it arrives on the wire, before normalization.
#[derive(Debug, Default, Deserialize)]
struct RawAssessment {
    #[serde(default)]
    risk_score: serde_json::Value,
    #[serde(default)]
    risk_level: serde_json::Value,
    #[serde(default)]
    priority: serde_json::Value,
    #[serde(default)]
    action_needed: serde_json::Value,
    #[serde(default)]
    recommended_action: serde_json::Value,
    #[serde(default)]
    task_text: serde_json::Value,
    #[serde(default)]
    new_status_id: serde_json::Value,
    #[serde(default)]
    reasoning: serde_json::Value,
}

fn loose_str(v: &serde_json::Value) -> Option<String> {
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn loose_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<RawAssessment> for RiskAssessment {
    fn from(raw: RawAssessment) -> Self {
        let risk_score = loose_f64(&raw.risk_score)
            .filter(|f| f.is_finite())
            .map(|f| f.round().clamp(0.0, 100.0) as u8)
            .unwrap_or(0);
        let risk_level = loose_str(&raw.risk_level)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| RiskLevel::band(risk_score));
        let priority = loose_str(&raw.priority)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| Priority::for_level(risk_level));
        let action_needed = match &raw.action_needed {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };
        Self {
            risk_score,
            risk_level,
            priority,
            action_needed,
            recommended_action: loose_str(&raw.recommended_action),
            task_text: loose_str(&raw.task_text),
            new_status_id: loose_f64(&raw.new_status_id)
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64),
            reasoning: loose_str(&raw.reasoning).unwrap_or_default(),
        }
    }
}

/// Context handed to the scorer in single-lead mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    /// `(key, insight)` pairs previously saved for this lead.
    pub memory: Vec<(String, String)>,
    /// Most recent scores, newest first.
    pub history: Vec<crate::store::LeadScore>,
}

/// Single-lead scorer output: the assessment plus anything the scorer
/// asked to remember.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedAssessment {
    #[serde(flatten)]
    pub assessment: RiskAssessment,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub memory: Vec<MemoryInsight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInsight {
    pub key: String,
    pub insight: String,
}

// ---------------------------------------------------------------------------
// Notification gateway contract
// ---------------------------------------------------------------------------

/// Buttons attached to an interactive proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalButton {
    Approve,
    Reject,
    Details,
    Snooze,
}

impl ProposalButton {
    /// Callback prefix carried by the button; the gateway echoes it back as
    /// `<prefix>_<id>`.
    pub fn callback_prefix(self) -> &'static str {
        match self {
            ProposalButton::Approve => "execute",
            ProposalButton::Reject => "reject",
            ProposalButton::Details => "details",
            ProposalButton::Snooze => "snooze",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProposalButton::Approve => "Execute",
            ProposalButton::Reject => "Reject",
            ProposalButton::Details => "Details",
            ProposalButton::Snooze => "Snooze",
        }
    }
}

/// A rendered interactive proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub text: String,
    pub action_id: i64,
    pub lead_id: u64,
    pub buttons: Vec<ProposalButton>,
}

/// Opaque reference to a delivered gateway message.
pub type MessageRef = i64;
