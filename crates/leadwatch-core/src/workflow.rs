//! Critical-lead workflow as an explicit finite-state machine.
//!
//! ```text
//! AnalyzeRisk -> CheckTasks -+-> NotifyManager -+-> done
//!      ^                     |        ^         |
//!      |                     +-> CreateTask     |
//!      |                                        |
//!      +---------------- WaitAndRetry <---------+  (score > retry_score
//!                                                    and attempts < max)
//! ```
//!
//! A run keeps its state in memory only. Re-running for the same lead repeats
//! every side effect, so callers must not run two workflows for one lead at
//! the same time.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::collab::{CrmClient, NotificationGateway};
use crate::config::{Thresholds, WorkflowConfig};
use crate::error::Result;
use crate::store::Store;
use crate::types::{NewTask, Priority, RiskAssessment, RiskLevel};

const STUCK_SCORE: u8 = 80;
const STALE_SCORE: u8 = 50;
const BASE_SCORE: u8 = 20;

/// Scores above this mark the lead as needing action.
const ACTION_SCORE: u8 = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunState {
    pub lead_id: u64,
    pub lead_name: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub has_tasks: bool,
    pub task_created: bool,
    pub manager_notified: bool,
    pub attempts: u32,
    pub action_needed: bool,
}

impl WorkflowRunState {
    fn new(lead_id: u64) -> Self {
        Self {
            lead_id,
            lead_name: String::new(),
            risk_score: 0,
            risk_level: RiskLevel::Low,
            has_tasks: false,
            task_created: false,
            manager_notified: false,
            attempts: 0,
            action_needed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    AnalyzeRisk,
    CheckTasks,
    CreateTask,
    NotifyManager,
    WaitAndRetry,
}

/// Final state plus the nodes visited, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowOutcome {
    pub state: WorkflowRunState,
    pub visited: Vec<Node>,
}

impl WorkflowOutcome {
    pub fn visits(&self, node: Node) -> usize {
        self.visited.iter().filter(|n| **n == node).count()
    }
}

/// Fixed staleness bands used instead of the scorer for critical leads.
pub fn band_score(days_since_update: f64, t: &Thresholds) -> u8 {
    if days_since_update > t.stuck_days {
        STUCK_SCORE
    } else if days_since_update > t.stale_days {
        STALE_SCORE
    } else {
        BASE_SCORE
    }
}

pub struct Workflow {
    crm: Arc<dyn CrmClient>,
    gateway: Arc<dyn NotificationGateway>,
    operator: Option<String>,
    config: WorkflowConfig,
    thresholds: Thresholds,
    scores: Option<Arc<Store>>,
}

impl Workflow {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        gateway: Arc<dyn NotificationGateway>,
        operator: Option<String>,
        config: WorkflowConfig,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            crm,
            gateway,
            operator,
            config,
            thresholds,
            scores: None,
        }
    }

    /// Append a `LeadScore` row on every risk analysis pass.
    pub fn with_score_log(mut self, store: Arc<Store>) -> Self {
        self.scores = Some(store);
        self
    }

    pub async fn process(&self, lead_id: u64) -> Result<WorkflowRunState> {
        Ok(self.run(lead_id).await?.state)
    }

    pub async fn run(&self, lead_id: u64) -> Result<WorkflowOutcome> {
        let span = info_span!("workflow", lead_id);
        async move {
            let mut state = WorkflowRunState::new(lead_id);
            let mut visited = Vec::new();
            let mut node = Some(Node::AnalyzeRisk);
            while let Some(current) = node {
                visited.push(current);
                node = self.step(current, &mut state).await?;
            }
            info!(
                risk_score = state.risk_score,
                attempts = state.attempts,
                task_created = state.task_created,
                manager_notified = state.manager_notified,
                "workflow finished"
            );
            Ok(WorkflowOutcome { state, visited })
        }
        .instrument(span)
        .await
    }

    /// Execute `node` against `state` and return the next node, or `None`
    /// when the run is over.
    async fn step(&self, node: Node, state: &mut WorkflowRunState) -> Result<Option<Node>> {
        match node {
            Node::AnalyzeRisk => {
                self.analyze_risk(state).await?;
                Ok(Some(Node::CheckTasks))
            }
            Node::CheckTasks => {
                let tasks = self.crm.list_tasks(state.lead_id).await?;
                state.has_tasks = tasks.iter().any(|t| !t.is_completed);
                Ok(Some(if state.has_tasks {
                    Node::NotifyManager
                } else {
                    Node::CreateTask
                }))
            }
            Node::CreateTask => {
                self.create_task(state).await;
                Ok(Some(Node::NotifyManager))
            }
            Node::NotifyManager => {
                self.notify_manager(state).await;
                if state.risk_score > self.config.retry_score
                    && state.attempts < self.config.max_attempts
                {
                    Ok(Some(Node::WaitAndRetry))
                } else {
                    Ok(None)
                }
            }
            Node::WaitAndRetry => {
                state.attempts += 1;
                info!(attempt = state.attempts, "retrying analysis");
                Ok(Some(Node::AnalyzeRisk))
            }
        }
    }

    async fn analyze_risk(&self, state: &mut WorkflowRunState) -> Result<()> {
        let lead = self.crm.get_lead_detail(state.lead_id).await?;
        let now = Utc::now();
        let days = lead.staleness_days(now.timestamp());
        let score = band_score(days, &self.thresholds);

        state.lead_name = lead.name;
        state.risk_score = score;
        state.risk_level = RiskLevel::from_score(score);
        state.action_needed = score > ACTION_SCORE;
        info!(risk_score = score, risk_level = %state.risk_level, "risk analyzed");

        if let Some(store) = &self.scores {
            let assessment = RiskAssessment {
                risk_score: score,
                risk_level: state.risk_level,
                priority: priority_for(score),
                action_needed: state.action_needed,
                recommended_action: None,
                task_text: None,
                new_status_id: None,
                reasoning: String::new(),
            };
            let lead_id = state.lead_id;
            let recorded = store
                .blocking(move |s| s.insert_score(lead_id, &assessment, now))
                .await;
            if let Err(e) = recorded {
                warn!(error = %e, "failed to record score");
            }
        }
        Ok(())
    }

    async fn create_task(&self, state: &mut WorkflowRunState) {
        let task = NewTask {
            text: self.config.task_text.clone(),
            complete_till: Utc::now().timestamp() + self.config.task_deadline_hours * 3600,
        };
        match self.crm.create_task(state.lead_id, &task).await {
            Ok(_) => {
                info!("task created");
                state.task_created = true;
            }
            Err(e) => {
                warn!(error = %e, "failed to create task");
                state.task_created = false;
            }
        }
    }

    async fn notify_manager(&self, state: &mut WorkflowRunState) {
        let Some(operator) = self.operator.as_deref() else {
            warn!("no operator configured, skipping notification");
            state.manager_notified = false;
            return;
        };
        let text = render_status(state, self.config.max_attempts);
        match self.gateway.send_message(operator, &text).await {
            Ok(()) => state.manager_notified = true,
            Err(e) => {
                warn!(error = %e, "failed to notify operator");
                state.manager_notified = false;
            }
        }
    }
}

fn priority_for(score: u8) -> Priority {
    match RiskLevel::from_score(score) {
        RiskLevel::Critical => Priority::High,
        RiskLevel::High => Priority::Medium,
        _ => Priority::Low,
    }
}

/// Operator-facing status line for one workflow pass.
pub fn render_status(state: &WorkflowRunState, max_attempts: u32) -> String {
    let emoji = if state.risk_level == RiskLevel::Critical {
        "🔴"
    } else {
        "🟠"
    };
    let tasks = if state.has_tasks { "yes" } else { "none" };
    let mut text = format!(
        "{emoji} Lead auto-processing\n\n{} (#{})\n\nRisk: {} ({}%)\nTasks: {tasks}",
        state.lead_name, state.lead_id, state.risk_level, state.risk_score
    );
    if state.task_created {
        text.push_str("\nNew task created");
    }
    text.push_str(&format!(
        "\n\nAttempt {}/{}",
        state.attempts + 1,
        max_attempts + 1
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lead, task, FakeCrm, FakeGateway};

    const DAY: i64 = 86_400;

    fn workflow(crm: Arc<FakeCrm>, gateway: Arc<FakeGateway>, operator: Option<&str>) -> Workflow {
        Workflow::new(
            crm,
            gateway,
            operator.map(str::to_string),
            WorkflowConfig::default(),
            Thresholds::default(),
        )
    }

    #[tokio::test]
    async fn fresh_vip_without_tasks_gets_task_and_no_retry() {
        let now = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![lead(1, 600_000, now - 2 * DAY)]));
        let gateway = Arc::new(FakeGateway::default());
        let wf = workflow(crm.clone(), gateway.clone(), Some("42"));

        let out = wf.run(1).await.unwrap();
        assert_eq!(out.state.risk_score, 20);
        assert_eq!(out.state.risk_level, RiskLevel::Medium);
        assert!(!out.state.has_tasks);
        assert!(out.state.task_created);
        assert!(out.state.manager_notified);
        assert_eq!(out.state.attempts, 0);
        assert!(!out.state.action_needed);
        assert_eq!(
            out.visited,
            vec![
                Node::AnalyzeRisk,
                Node::CheckTasks,
                Node::CreateTask,
                Node::NotifyManager
            ]
        );
        assert_eq!(crm.created_tasks().len(), 1);
        assert_eq!(gateway.messages().len(), 1);
    }

    #[tokio::test]
    async fn stuck_lead_retries_three_times_then_stops() {
        let now = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![lead(5, 0, now - 10 * DAY)]));
        let gateway = Arc::new(FakeGateway::default());
        let wf = workflow(crm.clone(), gateway.clone(), Some("42"));

        let out = wf.run(5).await.unwrap();
        assert_eq!(out.state.risk_score, 80);
        assert_eq!(out.state.attempts, 3);
        assert_eq!(out.visits(Node::AnalyzeRisk), 4);
        assert_eq!(out.visits(Node::WaitAndRetry), 3);
        // No task was ever visible, so every pass created one.
        assert_eq!(crm.created_tasks().len(), 4);
        let last = gateway.messages().pop().unwrap().1;
        assert!(last.contains("Attempt 4/4"), "{last}");
    }

    #[tokio::test]
    async fn low_scores_never_retry() {
        let now = Utc::now().timestamp();
        for days in [0, 1, 4, 6] {
            let mut l = lead(9, 0, now - days * DAY);
            l.tasks.push(task(9, false));
            let crm = Arc::new(FakeCrm::new(vec![l]));
            let wf = workflow(crm, Arc::new(FakeGateway::default()), Some("42"));
            let out = wf.run(9).await.unwrap();
            assert_eq!(out.visits(Node::WaitAndRetry), 0, "days={days}");
            assert_eq!(out.visits(Node::AnalyzeRisk), 1);
            assert!(out.state.has_tasks);
            assert_eq!(out.visits(Node::CreateTask), 0);
        }
    }

    #[tokio::test]
    async fn task_failure_is_not_fatal() {
        let now = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![lead(2, 0, now - DAY)]));
        crm.fail_create_task(true);
        let gateway = Arc::new(FakeGateway::default());
        let wf = workflow(crm, gateway.clone(), Some("42"));

        let state = wf.process(2).await.unwrap();
        assert!(!state.task_created);
        assert!(state.manager_notified);
    }

    #[tokio::test]
    async fn missing_operator_skips_notification() {
        let now = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![lead(3, 0, now - DAY)]));
        let gateway = Arc::new(FakeGateway::default());
        let wf = workflow(crm, gateway.clone(), None);

        let state = wf.process(3).await.unwrap();
        assert!(!state.manager_notified);
        assert!(gateway.messages().is_empty());
    }

    #[tokio::test]
    async fn unknown_lead_fails_the_run() {
        let crm = Arc::new(FakeCrm::new(vec![]));
        let wf = workflow(crm, Arc::new(FakeGateway::default()), Some("42"));
        assert!(wf.process(77).await.is_err());
    }

    #[tokio::test]
    async fn score_log_records_each_pass() {
        let now = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![lead(5, 0, now - 10 * DAY)]));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let wf = workflow(crm, Arc::new(FakeGateway::default()), Some("42"))
            .with_score_log(store.clone());

        wf.run(5).await.unwrap();
        let scores = store.recent_scores(5, 10).unwrap();
        assert_eq!(scores.len(), 4);
        assert!(scores.iter().all(|s| s.score == 80 && s.priority == Priority::High));
    }

    #[test]
    fn bands_follow_thresholds() {
        let t = Thresholds::default();
        assert_eq!(band_score(7.5, &t), 80);
        assert_eq!(band_score(7.0, &t), 50);
        assert_eq!(band_score(3.5, &t), 50);
        assert_eq!(band_score(3.0, &t), 20);
    }
}
