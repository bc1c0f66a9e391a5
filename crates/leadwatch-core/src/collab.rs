//! Contracts for the external collaborators: CRM, notification gateway and
//! risk scorer.
//!
//! All three are network services. Implementations live in
//! `leadwatch-clients`; in-process fakes live in [`crate::testing`].

use async_trait::async_trait;

use crate::error::{LeadwatchError, Result};
use crate::types::{
    DetailedAssessment, Lead, LeadFacts, LeadFilter, LeadPatch, MessageRef, NewTask, Pipeline,
    Proposal, ScoringContext, Task,
};

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>>;

    /// Lead with its tasks and notes attached.
    async fn get_lead_detail(&self, id: u64) -> Result<Lead>;

    async fn list_tasks(&self, lead_id: u64) -> Result<Vec<Task>>;

    /// Incomplete tasks across all leads, used by digests.
    async fn list_open_tasks(&self) -> Result<Vec<Task>>;

    async fn create_task(&self, lead_id: u64, task: &NewTask) -> Result<Task>;

    async fn update_lead(&self, id: u64, patch: &LeadPatch) -> Result<Lead>;

    async fn add_note(&self, lead_id: u64, text: &str) -> Result<()>;

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver an interactive proposal; returns the delivered message ref.
    async fn send_proposal(&self, operator: &str, proposal: &Proposal) -> Result<MessageRef>;

    async fn send_message(&self, operator: &str, text: &str) -> Result<()>;

    /// Replace the text of a previously delivered message.
    async fn edit_message(&self, operator: &str, message: MessageRef, text: &str) -> Result<()>;

    /// Acknowledge a button press with a short toast. Gateways without
    /// callback acknowledgements can keep the default.
    async fn answer_callback(&self, _callback_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait RiskScorer: Send + Sync {
    /// Single-lead mode with memory and score history.
    async fn score(&self, facts: &LeadFacts, ctx: &ScoringContext) -> Result<DetailedAssessment>;

    /// Batch mode. Results are positionally aligned with `batch`; entries are
    /// left raw so the caller can skip malformed ones individually.
    async fn score_batch(&self, batch: &[LeadFacts]) -> Result<Vec<serde_json::Value>>;
}

// ---------------------------------------------------------------------------
// Scorer response parsing
// ---------------------------------------------------------------------------

/// Strip a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a batch response: either a bare array or `{"results": [...]}`.
pub fn parse_batch_response(text: &str) -> Result<Vec<serde_json::Value>> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| LeadwatchError::malformed("scorer", e))?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut obj) => match obj.remove("results") {
            Some(serde_json::Value::Array(items)) => Ok(items),
            _ => Err(LeadwatchError::malformed(
                "scorer",
                "batch response has no 'results' array",
            )),
        },
        other => Err(LeadwatchError::malformed(
            "scorer",
            format!("batch response is not an array: {}", json_kind(&other)),
        )),
    }
}

/// Parse a single-lead response.
pub fn parse_detailed_response(text: &str) -> Result<DetailedAssessment> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| LeadwatchError::malformed("scorer", e))
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
