//! Pending-action data model.
//!
//! A `PendingAction` is a stored, human-reviewable proposal for a CRM
//! mutation. It is created by the batch pipeline, delivered to the operator
//! as an interactive proposal, and leaves `Pending` exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeadwatchError, Result};
use crate::types::Priority;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    UpdateStatus,
    AddNote,
    Wait,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::CreateTask => "create_task",
            ActionKind::UpdateStatus => "update_status",
            ActionKind::AddNote => "add_note",
            ActionKind::Wait => "wait",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create_task" => Ok(ActionKind::CreateTask),
            "update_status" => Ok(ActionKind::UpdateStatus),
            "add_note" => Ok(ActionKind::AddNote),
            "wait" => Ok(ActionKind::Wait),
            _ => Err(LeadwatchError::UnknownActionType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionPayload
// ---------------------------------------------------------------------------

/// Typed view of `(action_type, action_data)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "action_data", rename_all = "snake_case")]
pub enum ActionPayload {
    CreateTask {
        text: String,
        /// Deadline, unix seconds.
        complete_till: i64,
    },
    UpdateStatus {
        new_status_id: u64,
    },
    AddNote {
        text: String,
    },
    Wait,
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::CreateTask { .. } => ActionKind::CreateTask,
            ActionPayload::UpdateStatus { .. } => ActionKind::UpdateStatus,
            ActionPayload::AddNote { .. } => ActionKind::AddNote,
            ActionPayload::Wait => ActionKind::Wait,
        }
    }

    /// The `action_data` column value.
    pub fn data(&self) -> serde_json::Value {
        match self {
            ActionPayload::CreateTask {
                text,
                complete_till,
            } => serde_json::json!({ "text": text, "complete_till": complete_till }),
            ActionPayload::UpdateStatus { new_status_id } => {
                serde_json::json!({ "new_status_id": new_status_id })
            }
            ActionPayload::AddNote { text } => serde_json::json!({ "text": text }),
            ActionPayload::Wait => serde_json::json!({}),
        }
    }

    /// Rebuild a payload from stored columns.
    ///
    /// Fails with `UnknownActionType` when the stored type is not one we know,
    /// and `InvalidPayload` when the data does not fit the type.
    pub fn decode(action_type: &str, data: &serde_json::Value) -> Result<Self> {
        let kind: ActionKind = action_type.parse()?;
        let field_str = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| LeadwatchError::InvalidPayload {
                    kind: kind.to_string(),
                    message: format!("missing string field '{name}'"),
                })
        };
        let field_int = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| LeadwatchError::InvalidPayload {
                    kind: kind.to_string(),
                    message: format!("missing integer field '{name}'"),
                })
        };
        Ok(match kind {
            ActionKind::CreateTask => ActionPayload::CreateTask {
                text: field_str("text")?,
                complete_till: field_int("complete_till")?,
            },
            ActionKind::UpdateStatus => ActionPayload::UpdateStatus {
                new_status_id: field_int("new_status_id")? as u64,
            },
            ActionKind::AddNote => ActionPayload::AddNote {
                text: field_str("text")?,
            },
            ActionKind::Wait => ActionPayload::Wait,
        })
    }
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a pending action.
///
/// Transitions: `Pending → Executed | Rejected | Failed | Snoozed`.
/// Only `Pending` is initial; every other state is final for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executed,
    Rejected,
    Failed,
    Snoozed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executed => "executed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Failed => "failed",
            ActionStatus::Snoozed => "snoozed",
        }
    }

    pub fn all() -> &'static [ActionStatus] {
        &[
            ActionStatus::Pending,
            ActionStatus::Executed,
            ActionStatus::Rejected,
            ActionStatus::Failed,
            ActionStatus::Snoozed,
        ]
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "executed" => Ok(ActionStatus::Executed),
            "rejected" => Ok(ActionStatus::Rejected),
            "failed" => Ok(ActionStatus::Failed),
            "snoozed" => Ok(ActionStatus::Snoozed),
            _ => Err(LeadwatchError::InvalidConfig(format!(
                "unknown action status '{s}': must be pending, executed, rejected, failed, or snoozed"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

/// A stored proposal. `action_type`/`action_data` are kept as persisted so
/// corrupt rows can still be loaded, shown and marked `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: i64,
    pub lead_id: u64,
    pub action_type: String,
    pub action_data: serde_json::Value,
    pub risk_score: u8,
    pub priority: Priority,
    pub reasoning: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub notification_message_ref: Option<i64>,
}

impl PendingAction {
    pub fn payload(&self) -> Result<ActionPayload> {
        ActionPayload::decode(&self.action_type, &self.action_data)
    }
}

/// Insert form of a pending action; the store assigns id, status and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingAction {
    pub lead_id: u64,
    pub payload: ActionPayload,
    pub risk_score: u8,
    pub priority: Priority,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Modified,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Modified => "modified",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            "modified" => Ok(Decision::Modified),
            _ => Err(LeadwatchError::InvalidDecision(s.to_string())),
        }
    }
}

/// Append-only audit row, one per operator decision event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: i64,
    pub pending_action_id: i64,
    pub decision: Decision,
    pub modified_data: Option<serde_json::Value>,
    pub decided_at: DateTime<Utc>,
    pub outcome: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_task_payload_decodes_from_stored_columns() {
        let data = serde_json::json!({ "text": "Call back", "complete_till": 1_700_000_000 });
        let payload = ActionPayload::decode("create_task", &data).unwrap();
        assert_eq!(
            payload,
            ActionPayload::CreateTask {
                text: "Call back".into(),
                complete_till: 1_700_000_000
            }
        );
        assert_eq!(payload.data(), data);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ActionPayload::decode("delete_lead", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, LeadwatchError::UnknownActionType(t) if t == "delete_lead"));
    }

    #[test]
    fn missing_field_is_invalid_payload() {
        let err = ActionPayload::decode("add_note", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, LeadwatchError::InvalidPayload { .. }));
    }

    #[test]
    fn wait_ignores_data() {
        let payload = ActionPayload::decode("wait", &serde_json::json!({"x": 1})).unwrap();
        assert_eq!(payload, ActionPayload::Wait);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in ActionStatus::all() {
            assert_eq!(status.as_str().parse::<ActionStatus>().unwrap(), *status);
        }
    }
}
