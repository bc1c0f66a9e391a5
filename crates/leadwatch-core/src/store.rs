//! SQLite-backed action store and history tables.
//!
//! Tables: `pending_actions`, `decisions_log`, `lead_scores`, `memory`,
//! `thoughts`. Timestamps are RFC 3339 UTC strings with fixed microsecond
//! precision so text ordering equals time ordering.
//!
//! Every status change out of `pending` is a single conditional `UPDATE`
//! (`... WHERE status = 'pending'`), so two racing callers cannot both win.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::action::{
    ActionStatus, Decision, DecisionLogEntry, NewPendingAction, PendingAction,
};
use crate::error::{LeadwatchError, Result};
use crate::types::{Priority, RiskAssessment, RiskLevel};

pub const SCHEMA_VERSION: i64 = 1;

const ACTION_COLUMNS: &str = "id, lead_id, action_type, action_data, risk_score, priority, \
     reasoning, status, created_at, notification_message_ref";

// ---------------------------------------------------------------------------
// History rows
// ---------------------------------------------------------------------------

/// Append-only score history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    pub id: i64,
    pub lead_id: u64,
    pub score: u8,
    pub risk_level: RiskLevel,
    pub priority: Priority,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: i64,
    pub lead_id: u64,
    pub thought: String,
    pub action: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path` and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        crate::io::ensure_parent(path.as_ref())?;
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run `f` on the blocking pool so async callers never hold a runtime
    /// worker while SQLite works.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| LeadwatchError::Task(e.to_string()))?
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite itself
        // inconsistent, so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if current > SCHEMA_VERSION {
            return Err(LeadwatchError::InvalidConfig(format!(
                "database schema version {current} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            conn.execute_batch(include_str!("../migrations/0001_initial.sql"))?;
            conn.execute("PRAGMA user_version = 1", [])?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pending actions
    // -----------------------------------------------------------------------

    pub fn insert_action(&self, new: &NewPendingAction) -> Result<PendingAction> {
        let now = Utc::now();
        let data = new.payload.data();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO pending_actions
                    (lead_id, action_type, action_data, risk_score, priority, reasoning, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
                params![
                    new.lead_id as i64,
                    new.payload.kind().as_str(),
                    serde_json::to_string(&data)?,
                    new.risk_score as i64,
                    new.priority.as_str(),
                    new.reasoning,
                    fmt_ts(now),
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.require_action(id)
    }

    pub fn get_action(&self, id: i64) -> Result<Option<PendingAction>> {
        let conn = self.conn();
        let sql = format!("SELECT {ACTION_COLUMNS} FROM pending_actions WHERE id = ?1");
        let action = conn
            .query_row(&sql, params![id], map_action_row)
            .optional()?;
        Ok(action)
    }

    pub fn require_action(&self, id: i64) -> Result<PendingAction> {
        self.get_action(id)?
            .ok_or(LeadwatchError::ActionNotFound(id))
    }

    /// Actions in `status` (all statuses when `None`), newest first.
    pub fn list_actions(
        &self,
        status: Option<ActionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingAction>> {
        let conn = self.conn();
        let limit = limit as i64;
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {ACTION_COLUMNS} FROM pending_actions WHERE status = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![status.as_str(), limit], map_action_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {ACTION_COLUMNS} FROM pending_actions
                     ORDER BY created_at DESC, id DESC LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], map_action_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Record the gateway message a proposal was delivered as.
    pub fn set_message_ref(&self, id: i64, message_ref: i64) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE pending_actions SET notification_message_ref = ?2 WHERE id = ?1",
            params![id, message_ref],
        )?;
        if changed == 0 {
            return Err(LeadwatchError::ActionNotFound(id));
        }
        Ok(())
    }

    /// Atomically claim a pending action for execution.
    ///
    /// The status stays `pending` while claimed; a second claim, or any other
    /// transition attempt, fails with `InvalidState` until the claim holder
    /// calls [`Store::finish_execution`].
    pub fn claim_for_execution(&self, id: i64) -> Result<PendingAction> {
        let changed = self.conn().execute(
            "UPDATE pending_actions SET claimed_at = ?2
             WHERE id = ?1 AND status = 'pending' AND claimed_at IS NULL",
            params![id, fmt_ts(Utc::now())],
        )?;
        if changed == 1 {
            return self.require_action(id);
        }
        Err(self.explain_refusal(id)?)
    }

    /// Move a claimed action to its final status (`executed` or `failed`).
    pub fn finish_execution(&self, id: i64, status: ActionStatus) -> Result<()> {
        debug_assert!(matches!(
            status,
            ActionStatus::Executed | ActionStatus::Failed
        ));
        let changed = self.conn().execute(
            "UPDATE pending_actions SET status = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(self.explain_refusal(id)?);
        }
        Ok(())
    }

    /// Single-statement `pending → to` for operator decisions that perform
    /// no CRM mutation (reject, snooze).
    pub fn transition_pending(&self, id: i64, to: ActionStatus) -> Result<PendingAction> {
        let changed = self.conn().execute(
            "UPDATE pending_actions SET status = ?2
             WHERE id = ?1 AND status = 'pending' AND claimed_at IS NULL",
            params![id, to.as_str()],
        )?;
        if changed == 1 {
            return self.require_action(id);
        }
        Err(self.explain_refusal(id)?)
    }

    /// Build the error for a refused transition on `id`.
    fn explain_refusal(&self, id: i64) -> Result<LeadwatchError> {
        let row: Option<(String, Option<String>)> = self
            .conn()
            .query_row(
                "SELECT status, claimed_at FROM pending_actions WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            None => LeadwatchError::ActionNotFound(id),
            Some((status, Some(_))) if status == ActionStatus::Pending.as_str() => {
                LeadwatchError::InvalidState {
                    id,
                    status: "being executed".to_string(),
                }
            }
            Some((status, _)) => LeadwatchError::InvalidState { id, status },
        })
    }

    /// Mark claims older than `max_age` as `failed`.
    ///
    /// A claim only outlives its executor if the process died mid-dispatch;
    /// the CRM outcome is unknown, so the action must not be retried blindly.
    pub fn recover_stale_claims(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let changed = self.conn().execute(
            "UPDATE pending_actions SET status = 'failed'
             WHERE status = 'pending' AND claimed_at IS NOT NULL AND claimed_at < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(changed)
    }

    /// Count actions in `status`, optionally only those created at or after `since`.
    pub fn count_actions(
        &self,
        status: ActionStatus,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let conn = self.conn();
        let n = match since {
            Some(since) => conn.query_row(
                "SELECT COUNT(*) FROM pending_actions WHERE status = ?1 AND created_at >= ?2",
                params![status.as_str(), fmt_ts(since)],
                |r| r.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM pending_actions WHERE status = ?1",
                params![status.as_str()],
                |r| r.get(0),
            )?,
        };
        Ok(n)
    }

    /// Replace the stored type and data verbatim, bypassing payload typing.
    #[cfg(test)]
    pub(crate) fn overwrite_payload(&self, id: i64, action_type: &str, data: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE pending_actions SET action_type = ?2, action_data = ?3 WHERE id = ?1",
            params![id, action_type, data],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Decision log
    // -----------------------------------------------------------------------

    /// Append a decision for an existing action. Never updates prior rows.
    pub fn log_decision(
        &self,
        action_id: i64,
        decision: Decision,
        modified_data: Option<&serde_json::Value>,
        outcome: Option<&str>,
    ) -> Result<DecisionLogEntry> {
        self.require_action(action_id)?;
        let modified = modified_data.map(serde_json::to_string).transpose()?;
        let now = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO decisions_log (pending_action_id, decision, modified_data, decided_at, outcome)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![action_id, decision.as_str(), modified, fmt_ts(now), outcome],
            )?;
            conn.last_insert_rowid()
        };
        Ok(DecisionLogEntry {
            id,
            pending_action_id: action_id,
            decision,
            modified_data: modified_data.cloned(),
            decided_at: parse_ts(&fmt_ts(now)).unwrap_or(now),
            outcome: outcome.map(str::to_string),
        })
    }

    pub fn decisions_for(&self, action_id: i64) -> Result<Vec<DecisionLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, pending_action_id, decision, modified_data, decided_at, outcome
             FROM decisions_log WHERE pending_action_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![action_id], |r| {
            let decision: String = r.get(2)?;
            let modified: Option<String> = r.get(3)?;
            let decided_at: String = r.get(4)?;
            Ok(DecisionLogEntry {
                id: r.get(0)?,
                pending_action_id: r.get(1)?,
                decision: decision.parse().map_err(|e| conversion_err(2, e))?,
                modified_data: modified
                    .map(|m| serde_json::from_str(&m))
                    .transpose()
                    .map_err(|e| conversion_err(3, e))?,
                decided_at: parse_ts(&decided_at).map_err(|e| conversion_err(4, e))?,
                outcome: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Lead scores
    // -----------------------------------------------------------------------

    pub fn insert_score(
        &self,
        lead_id: u64,
        assessment: &RiskAssessment,
        at: DateTime<Utc>,
    ) -> Result<LeadScore> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO lead_scores (lead_id, score, risk_level, priority, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lead_id as i64,
                assessment.risk_score as i64,
                assessment.risk_level.as_str(),
                assessment.priority.as_str(),
                fmt_ts(at),
            ],
        )?;
        Ok(LeadScore {
            id: conn.last_insert_rowid(),
            lead_id,
            score: assessment.risk_score,
            risk_level: assessment.risk_level,
            priority: assessment.priority,
            calculated_at: at,
        })
    }

    /// Most recent `limit` scores for a lead, newest first.
    pub fn recent_scores(&self, lead_id: u64, limit: usize) -> Result<Vec<LeadScore>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, lead_id, score, risk_level, priority, calculated_at
             FROM lead_scores WHERE lead_id = ?1
             ORDER BY calculated_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![lead_id as i64, limit as i64], |r| {
            let level: String = r.get(3)?;
            let priority: String = r.get(4)?;
            let at: String = r.get(5)?;
            Ok(LeadScore {
                id: r.get(0)?,
                lead_id: r.get::<_, i64>(1)? as u64,
                score: clamp_score(r.get(2)?),
                risk_level: level.parse().map_err(|e| conversion_err(3, e))?,
                priority: priority.parse().map_err(|e| conversion_err(4, e))?,
                calculated_at: parse_ts(&at).map_err(|e| conversion_err(5, e))?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Memory / thoughts
    // -----------------------------------------------------------------------

    pub fn upsert_memory(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO memory (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, fmt_ts(Utc::now())],
        )?;
        Ok(())
    }

    /// `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    pub fn memory_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM memory WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn insert_thought(&self, lead_id: u64, thought: &str, action: Option<&str>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO thoughts (lead_id, thought, action, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![lead_id as i64, thought, action, fmt_ts(Utc::now())],
        )?;
        Ok(())
    }

    pub fn recent_thoughts(&self, lead_id: u64, limit: usize) -> Result<Vec<Thought>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, lead_id, thought, action, created_at FROM thoughts
             WHERE lead_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![lead_id as i64, limit as i64], |r| {
            let at: String = r.get(4)?;
            Ok(Thought {
                id: r.get(0)?,
                lead_id: r.get::<_, i64>(1)? as u64,
                thought: r.get(2)?,
                action: r.get(3)?,
                created_at: parse_ts(&at).map_err(|e| conversion_err(4, e))?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn map_action_row(r: &Row<'_>) -> rusqlite::Result<PendingAction> {
    let data: String = r.get(3)?;
    let priority: String = r.get(5)?;
    let status: String = r.get(7)?;
    let created_at: String = r.get(8)?;
    Ok(PendingAction {
        id: r.get(0)?,
        lead_id: r.get::<_, i64>(1)? as u64,
        action_type: r.get(2)?,
        // Corrupt payloads still load so they can be shown and failed.
        action_data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        risk_score: clamp_score(r.get(4)?),
        priority: priority.parse().unwrap_or(Priority::Medium),
        reasoning: r.get(6)?,
        status: status.parse().map_err(|e| conversion_err(7, e))?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_err(8, e))?,
        notification_message_ref: r.get(9)?,
    })
}

fn clamp_score(v: i64) -> u8 {
    v.clamp(0, 100) as u8
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionPayload;

    fn new_action(lead_id: u64) -> NewPendingAction {
        NewPendingAction {
            lead_id,
            payload: ActionPayload::CreateTask {
                text: "Call back".into(),
                complete_till: 1_700_000_000,
            },
            risk_score: 65,
            priority: Priority::High,
            reasoning: "No contact for 5 days".into(),
        }
    }

    fn assessment(score: u8) -> RiskAssessment {
        RiskAssessment {
            risk_score: score,
            risk_level: RiskLevel::Medium,
            priority: Priority::Low,
            action_needed: false,
            recommended_action: None,
            task_text: None,
            new_status_id: None,
            reasoning: String::new(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let created = store.insert_action(&new_action(12)).unwrap();
        assert_eq!(created.status, ActionStatus::Pending);
        assert_eq!(created.action_type, "create_task");
        assert!(created.notification_message_ref.is_none());

        let fetched = store.get_action(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.payload().unwrap(), new_action(12).payload);
    }

    #[test]
    fn open_on_disk_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data/leadwatch.sqlite");
        let store = Store::open(&path).unwrap();
        store.insert_action(&new_action(1)).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.list_actions(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn transition_out_of_pending_happens_once() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_action(&new_action(1)).unwrap();

        let rejected = store.transition_pending(a.id, ActionStatus::Rejected).unwrap();
        assert_eq!(rejected.status, ActionStatus::Rejected);

        let err = store
            .transition_pending(a.id, ActionStatus::Snoozed)
            .unwrap_err();
        assert!(matches!(err, LeadwatchError::InvalidState { ref status, .. } if status == "rejected"));
        assert_eq!(
            store.require_action(a.id).unwrap().status,
            ActionStatus::Rejected
        );
    }

    #[test]
    fn second_claim_is_refused_while_first_is_in_flight() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_action(&new_action(1)).unwrap();

        store.claim_for_execution(a.id).unwrap();
        let err = store.claim_for_execution(a.id).unwrap_err();
        assert!(
            matches!(err, LeadwatchError::InvalidState { ref status, .. } if status == "being executed")
        );
        // Reject must not slip past an in-flight execution either.
        assert!(store.transition_pending(a.id, ActionStatus::Rejected).is_err());

        store.finish_execution(a.id, ActionStatus::Executed).unwrap();
        assert_eq!(
            store.require_action(a.id).unwrap().status,
            ActionStatus::Executed
        );
    }

    #[test]
    fn missing_action_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.claim_for_execution(99),
            Err(LeadwatchError::ActionNotFound(99))
        ));
        assert!(matches!(
            store.transition_pending(99, ActionStatus::Rejected),
            Err(LeadwatchError::ActionNotFound(99))
        ));
        assert!(matches!(
            store.set_message_ref(99, 1),
            Err(LeadwatchError::ActionNotFound(99))
        ));
    }

    #[test]
    fn stale_claims_are_recovered_as_failed() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_action(&new_action(1)).unwrap();
        let b = store.insert_action(&new_action(2)).unwrap();
        store.claim_for_execution(a.id).unwrap();

        // Zero max age: every existing claim counts as stale.
        let n = store.recover_stale_claims(chrono::Duration::zero()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.require_action(a.id).unwrap().status, ActionStatus::Failed);
        assert_eq!(store.require_action(b.id).unwrap().status, ActionStatus::Pending);
    }

    #[test]
    fn list_and_count_filter_by_status() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_action(&new_action(1)).unwrap();
        store.insert_action(&new_action(2)).unwrap();
        store.transition_pending(a.id, ActionStatus::Rejected).unwrap();

        assert_eq!(store.list_actions(Some(ActionStatus::Pending), 10).unwrap().len(), 1);
        assert_eq!(store.list_actions(None, 10).unwrap().len(), 2);
        assert_eq!(store.count_actions(ActionStatus::Rejected, None).unwrap(), 1);
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(store.count_actions(ActionStatus::Rejected, Some(future)).unwrap(), 0);
    }

    #[test]
    fn decision_log_is_append_only() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_action(&new_action(1)).unwrap();
        store.log_decision(a.id, Decision::Modified, Some(&serde_json::json!({"text": "Email"})), None).unwrap();
        store.log_decision(a.id, Decision::Approved, None, Some("executed")).unwrap();

        let log = store.decisions_for(a.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].decision, Decision::Modified);
        assert_eq!(log[0].modified_data, Some(serde_json::json!({"text": "Email"})));
        assert_eq!(log[1].outcome.as_deref(), Some("executed"));
    }

    #[test]
    fn decision_for_missing_action_fails() {
        let store = Store::open_in_memory().unwrap();
        let err = store.log_decision(5, Decision::Rejected, None, None).unwrap_err();
        assert!(matches!(err, LeadwatchError::ActionNotFound(5)));
    }

    #[test]
    fn recent_scores_are_newest_first_and_limited() {
        let store = Store::open_in_memory().unwrap();
        let t0 = Utc::now() - chrono::Duration::hours(3);
        for (i, score) in [10u8, 20, 30, 40].iter().enumerate() {
            store
                .insert_score(9, &assessment(*score), t0 + chrono::Duration::hours(i as i64))
                .unwrap();
        }
        store.insert_score(10, &assessment(99), Utc::now()).unwrap();

        let scores = store.recent_scores(9, 3).unwrap();
        let values: Vec<u8> = scores.iter().map(|s| s.score).collect();
        assert_eq!(values, vec![40, 30, 20]);
    }

    #[test]
    fn memory_prefix_lookup_and_upsert() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_memory("lead_1_budget", "tight").unwrap();
        store.upsert_memory("lead_1_budget", "flexible").unwrap();
        store.upsert_memory("lead_12_tone", "warm").unwrap();

        let mem = store.memory_with_prefix("lead_1_").unwrap();
        assert_eq!(mem, vec![("lead_1_budget".to_string(), "flexible".to_string())]);
    }

    #[test]
    fn thoughts_are_listed_per_lead() {
        let store = Store::open_in_memory().unwrap();
        store.insert_thought(3, "first", None).unwrap();
        store.insert_thought(3, "second", Some("create_task")).unwrap();
        store.insert_thought(4, "other", None).unwrap();

        let thoughts = store.recent_thoughts(3, 5).unwrap();
        assert_eq!(thoughts.len(), 2);
        assert_eq!(thoughts[0].thought, "second");
    }
}
