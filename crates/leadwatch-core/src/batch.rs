//! Batch scorer pipeline for normal (non-critical) leads.
//!
//! One scorer call per batch. Results are matched to leads by position; a
//! failed call degrades every lead in the batch to the fallback assessment.
//! Nothing in here fails the surrounding cycle: per-lead problems are logged
//! and counted.

use std::sync::Arc;

use tracing::{info, warn};

use crate::action::{ActionKind, ActionPayload, NewPendingAction, PendingAction};
use crate::collab::{NotificationGateway, RiskScorer};
use crate::config::{Thresholds, WorkflowConfig};
use crate::error::{LeadwatchError, Result};
use crate::store::Store;
use crate::types::{Lead, LeadFacts, Proposal, ProposalButton, RiskAssessment, RiskLevel};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    /// Leads with a persisted score.
    pub scored: usize,
    /// Leads whose result was missing or not a JSON object.
    pub skipped: usize,
    pub actions: Vec<i64>,
    /// The scorer call failed and fallback results were used.
    pub fell_back: bool,
}

pub struct BatchPipeline {
    scorer: Arc<dyn RiskScorer>,
    gateway: Arc<dyn NotificationGateway>,
    store: Arc<Store>,
    operator: Option<String>,
    workflow: WorkflowConfig,
    thresholds: Thresholds,
}

impl BatchPipeline {
    pub fn new(
        scorer: Arc<dyn RiskScorer>,
        gateway: Arc<dyn NotificationGateway>,
        store: Arc<Store>,
        operator: Option<String>,
        workflow: WorkflowConfig,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            scorer,
            gateway,
            store,
            operator,
            workflow,
            thresholds,
        }
    }

    pub async fn process(&self, batch: &[Lead], now: i64) -> BatchReport {
        let mut report = BatchReport::default();
        let facts: Vec<LeadFacts> = batch.iter().map(|l| LeadFacts::from_lead(l, now)).collect();

        let results = match self.scorer.score_batch(&facts).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, size = batch.len(), "batch scoring failed, using fallback");
                report.fell_back = true;
                let fallback = serde_json::to_value(RiskAssessment::fallback())
                    .unwrap_or(serde_json::Value::Null);
                vec![fallback; batch.len()]
            }
        };

        for (i, lead) in batch.iter().enumerate() {
            let Some(assessment) = decode_result(results.get(i)) else {
                warn!(lead_id = lead.id, "invalid scorer result, skipping");
                report.skipped += 1;
                continue;
            };
            match self.handle(lead, &assessment, now).await {
                Ok(action) => {
                    report.scored += 1;
                    if let Some(id) = action {
                        report.actions.push(id);
                    }
                }
                Err(e) => {
                    warn!(lead_id = lead.id, error = %e, "failed to record assessment");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Persist the score and, when asked for, a pending action. Returns the
    /// new action id.
    async fn handle(
        &self,
        lead: &Lead,
        assessment: &RiskAssessment,
        now: i64,
    ) -> Result<Option<i64>> {
        let at = chrono::DateTime::from_timestamp(now, 0).unwrap_or_else(chrono::Utc::now);
        let (lead_id, scored) = (lead.id, assessment.clone());
        self.store
            .blocking(move |s| s.insert_score(lead_id, &scored, at))
            .await?;
        info!(
            lead_id = lead.id,
            risk_score = assessment.risk_score,
            risk_level = %assessment.risk_level,
            action_needed = assessment.action_needed,
            "lead scored"
        );

        if !assessment.action_needed || assessment.recommended_action.is_none() {
            return Ok(None);
        }
        let payload = match proposal_payload(assessment, now, &self.workflow) {
            Ok(p) => p,
            Err(e) => {
                warn!(lead_id = lead.id, error = %e, "scorer proposed an unusable action");
                return Ok(None);
            }
        };
        let new_action = NewPendingAction {
            lead_id: lead.id,
            payload,
            risk_score: assessment.risk_score,
            priority: assessment.priority,
            reasoning: assessment.reasoning.clone(),
        };
        let action = self
            .store
            .blocking(move |s| s.insert_action(&new_action))
            .await?;
        self.deliver(lead, &action, now).await;
        Ok(Some(action.id))
    }

    /// Send the proposal and remember the message ref. Delivery problems
    /// leave the action pending without a ref.
    async fn deliver(&self, lead: &Lead, action: &PendingAction, now: i64) {
        let Some(operator) = self.operator.as_deref() else {
            warn!(action_id = action.id, "no operator configured, proposal not delivered");
            return;
        };
        let proposal = build_proposal(lead, action, now, &self.thresholds);
        match self.gateway.send_proposal(operator, &proposal).await {
            Ok(message) => {
                let id = action.id;
                let recorded = self
                    .store
                    .blocking(move |s| s.set_message_ref(id, message))
                    .await;
                if let Err(e) = recorded {
                    warn!(action_id = action.id, error = %e, "failed to record message ref");
                }
                info!(action_id = action.id, lead_id = lead.id, "proposal sent");
            }
            Err(e) => warn!(action_id = action.id, error = %e, "failed to send proposal"),
        }
    }
}

fn decode_result(raw: Option<&serde_json::Value>) -> Option<RiskAssessment> {
    let raw = raw?;
    if !raw.is_object() {
        return None;
    }
    serde_json::from_value(raw.clone()).ok()
}

/// Turn a scorer recommendation into a typed payload.
pub fn proposal_payload(
    a: &RiskAssessment,
    now: i64,
    cfg: &WorkflowConfig,
) -> Result<ActionPayload> {
    let raw = a.recommended_action.as_deref().unwrap_or_default();
    let kind: ActionKind = raw.parse()?;
    Ok(match kind {
        ActionKind::CreateTask => ActionPayload::CreateTask {
            text: a
                .task_text
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| cfg.task_text.clone()),
            complete_till: now + cfg.task_deadline_hours * 3600,
        },
        ActionKind::UpdateStatus => ActionPayload::UpdateStatus {
            new_status_id: a.new_status_id.ok_or_else(|| LeadwatchError::InvalidPayload {
                kind: kind.to_string(),
                message: "no target status".into(),
            })?,
        },
        ActionKind::AddNote => ActionPayload::AddNote {
            text: a.reasoning.clone(),
        },
        ActionKind::Wait => ActionPayload::Wait,
    })
}

// ---------------------------------------------------------------------------
// Proposal rendering
// ---------------------------------------------------------------------------

/// What is wrong with the lead, in a few words.
pub fn describe_issue(days: i64, has_active_task: bool, budget: i64, t: &Thresholds) -> String {
    if days as f64 > t.stuck_days {
        format!("Stuck with no movement for {days} days")
    } else if !has_active_task && days as f64 > t.stale_days {
        format!("No active tasks for {days} days")
    } else if budget > t.vip_budget && days > 1 {
        "VIP client is waiting for a reply".to_string()
    } else if budget > t.important_budget && days > 2 {
        "Important client may walk away".to_string()
    } else {
        format!("Needs a check ({days} days without updates)")
    }
}

/// Why it matters.
pub fn explain_impact(budget: i64, days: i64, t: &Thresholds) -> String {
    if budget > t.vip_budget {
        format!("Potentially {}K at stake", budget / 1000)
    } else if days as f64 > t.stuck_days {
        "High risk of losing the deal".to_string()
    } else if days as f64 > t.stale_days {
        "Client may go to a competitor".to_string()
    } else {
        "Closing probability is dropping".to_string()
    }
}

pub fn build_proposal(lead: &Lead, action: &PendingAction, now: i64, t: &Thresholds) -> Proposal {
    let days = lead.days_since_update(now).max(0);
    let active = lead.has_active_task();
    let emoji = match RiskLevel::from_score(action.risk_score) {
        RiskLevel::Critical => "🔴",
        RiskLevel::High => "🟠",
        _ => "🟡",
    };

    let mut text = format!(
        "{emoji} Needs attention\n\nWhat: {} (#{})\nIssue: {}\nWhy it matters: {}\n",
        lead.name,
        lead.id,
        describe_issue(days, active, lead.price, t),
        explain_impact(lead.price, days, t),
    );
    if lead.price > 0 {
        text.push_str(&format!("Budget: {}\n", lead.price));
    }
    text.push_str(&format!(
        "\nLast contact: {days} days ago\nActive tasks: {}\nPriority: {}\n\nRecommendation:\n{}\n",
        if active { "yes" } else { "none" },
        action.priority,
        action.reasoning,
    ));
    if let Ok(ActionPayload::CreateTask { text: task, .. }) = action.payload() {
        text.push_str(&format!("\nTask: {task}\n"));
    }

    Proposal {
        text,
        action_id: action.id,
        lead_id: lead.id,
        buttons: vec![
            ProposalButton::Approve,
            ProposalButton::Reject,
            ProposalButton::Details,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionStatus;
    use crate::testing::{lead, FakeGateway, FakeScorer};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        scorer: Arc<FakeScorer>,
        gateway: Arc<FakeGateway>,
        store: Arc<Store>,
        pipeline: BatchPipeline,
    }

    fn fixture(operator: Option<&str>) -> Fixture {
        let scorer = Arc::new(FakeScorer::default());
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let pipeline = BatchPipeline::new(
            scorer.clone(),
            gateway.clone(),
            store.clone(),
            operator.map(str::to_string),
            WorkflowConfig::default(),
            Thresholds::default(),
        );
        Fixture {
            scorer,
            gateway,
            store,
            pipeline,
        }
    }

    fn needs_task(id: u64) -> serde_json::Value {
        json!({
            "lead_id": id,
            "risk_score": 65,
            "risk_level": "HIGH",
            "priority": "MEDIUM",
            "action_needed": true,
            "recommended_action": "create_task",
            "task_text": "Call back",
            "reasoning": "No contact for 5 days"
        })
    }

    #[tokio::test]
    async fn malformed_response_falls_back_without_actions() {
        let f = fixture(Some("42"));
        f.scorer.push_malformed();
        let batch = vec![lead(1, 10_000, NOW - 86_400), lead(2, 20_000, NOW - 86_400)];

        let report = f.pipeline.process(&batch, NOW).await;
        assert!(report.fell_back);
        assert_eq!(report.scored, 2);
        assert!(report.actions.is_empty());
        assert!(f.store.list_actions(None, 10).unwrap().is_empty());
        for id in [1, 2] {
            let s = &f.store.recent_scores(id, 1).unwrap()[0];
            assert_eq!(s.score, 0);
            assert_eq!(s.risk_level, RiskLevel::Low);
        }
    }

    #[tokio::test]
    async fn action_needed_creates_and_delivers_proposal() {
        let f = fixture(Some("42"));
        f.scorer.push_batch(vec![needs_task(1)]);
        let report = f.pipeline.process(&[lead(1, 80_000, NOW - 5 * 86_400)], NOW).await;

        assert_eq!(report.actions.len(), 1);
        let action = f.store.require_action(report.actions[0]).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.risk_score, 65);
        assert_eq!(action.reasoning, "No contact for 5 days");
        assert_eq!(
            action.payload().unwrap(),
            ActionPayload::CreateTask {
                text: "Call back".into(),
                complete_till: NOW + 24 * 3600
            }
        );

        let proposals = f.gateway.proposals();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].0, "42");
        assert_eq!(proposals[0].1.action_id, action.id);
        assert_eq!(action.notification_message_ref, Some(1001));
    }

    #[tokio::test]
    async fn non_object_entries_are_skipped_individually() {
        let f = fixture(Some("42"));
        f.scorer.push_batch(vec![json!("garbage"), needs_task(2)]);
        let batch = vec![lead(1, 0, NOW), lead(2, 0, NOW), lead(3, 0, NOW)];

        let report = f.pipeline.process(&batch, NOW).await;
        assert_eq!(report.skipped, 2);
        assert_eq!(report.scored, 1);
        assert!(f.store.recent_scores(1, 5).unwrap().is_empty());
        assert!(f.store.recent_scores(3, 5).unwrap().is_empty());
        assert_eq!(f.store.recent_scores(2, 5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn loosely_typed_objects_still_record_scores() {
        let f = fixture(Some("42"));
        f.scorer.push_batch(vec![
            json!({"lead_id": 1, "risk_score": 60, "risk_level": "high", "priority": "low"}),
            json!({"lead_id": 2, "risk_score": 72.5}),
            json!({"lead_id": 3, "risk_level": "MEDIUM", "reasoning": "quiet"}),
        ]);
        let batch = vec![lead(1, 0, NOW), lead(2, 0, NOW), lead(3, 0, NOW)];

        let report = f.pipeline.process(&batch, NOW).await;
        assert_eq!(report.scored, 3);
        assert_eq!(report.skipped, 0);

        let first = &f.store.recent_scores(1, 5).unwrap()[0];
        assert_eq!((first.score, first.risk_level), (60, RiskLevel::High));
        let second = &f.store.recent_scores(2, 5).unwrap()[0];
        assert_eq!((second.score, second.risk_level), (73, RiskLevel::High));
        let third = &f.store.recent_scores(3, 5).unwrap()[0];
        assert_eq!((third.score, third.risk_level), (0, RiskLevel::Medium));
    }

    #[tokio::test]
    async fn missing_operator_keeps_action_pending_without_ref() {
        let f = fixture(None);
        f.scorer.push_batch(vec![needs_task(1)]);
        let report = f.pipeline.process(&[lead(1, 0, NOW)], NOW).await;

        let action = f.store.require_action(report.actions[0]).unwrap();
        assert!(action.notification_message_ref.is_none());
        assert!(f.gateway.proposals().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_does_not_lose_the_action() {
        let f = fixture(Some("42"));
        f.gateway.fail(true);
        f.scorer.push_batch(vec![needs_task(1)]);
        let report = f.pipeline.process(&[lead(1, 0, NOW)], NOW).await;
        assert_eq!(report.actions.len(), 1);
        assert_eq!(f.store.count_actions(ActionStatus::Pending, None).unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_recommendation_only_records_score() {
        let f = fixture(Some("42"));
        let mut result = needs_task(1);
        result["recommended_action"] = json!("call_client");
        f.scorer.push_batch(vec![result]);
        let report = f.pipeline.process(&[lead(1, 0, NOW)], NOW).await;
        assert_eq!(report.scored, 1);
        assert!(report.actions.is_empty());
    }

    #[test]
    fn update_status_needs_a_target() {
        let cfg = WorkflowConfig::default();
        let mut a = RiskAssessment::fallback();
        a.recommended_action = Some("update_status".into());
        assert!(matches!(
            proposal_payload(&a, NOW, &cfg),
            Err(LeadwatchError::InvalidPayload { .. })
        ));
        a.new_status_id = Some(143);
        assert_eq!(
            proposal_payload(&a, NOW, &cfg).unwrap(),
            ActionPayload::UpdateStatus { new_status_id: 143 }
        );
    }

    #[test]
    fn issue_text_prefers_stuck() {
        let t = Thresholds::default();
        assert_eq!(describe_issue(9, true, 900_000, &t), "Stuck with no movement for 9 days");
        assert_eq!(describe_issue(4, false, 0, &t), "No active tasks for 4 days");
        assert_eq!(describe_issue(2, true, 600_000, &t), "VIP client is waiting for a reply");
        assert_eq!(explain_impact(600_000, 0, &t), "Potentially 600K at stake");
    }
}
