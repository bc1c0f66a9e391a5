//! In-process fakes for the collaborator traits.
//!
//! Each fake records the calls it receives so tests can assert on side
//! effects. Enabled for this crate's tests and, through the `testing`
//! feature, for downstream integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::collab::{CrmClient, NotificationGateway, RiskScorer};
use crate::error::{LeadwatchError, Result};
use crate::types::{
    DetailedAssessment, Lead, LeadFacts, LeadFilter, LeadPatch, MessageRef, NewTask, Pipeline,
    Proposal, RiskAssessment, ScoringContext, Task,
};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A lead with no tasks or notes.
pub fn lead(id: u64, price: i64, updated_at: i64) -> Lead {
    Lead {
        id,
        name: format!("Lead {id}"),
        price,
        status_id: 100,
        pipeline_id: 1,
        created_at: updated_at,
        updated_at,
        tasks: vec![],
        notes: vec![],
    }
}

pub fn task(lead_id: u64, completed: bool) -> Task {
    Task {
        id: lead_id * 10,
        entity_id: lead_id,
        text: "Follow up".into(),
        complete_till: 0,
        is_completed: completed,
        created_at: 0,
    }
}

// ---------------------------------------------------------------------------
// FakeCrm
// ---------------------------------------------------------------------------

/// CRM fake backed by a fixed lead list. Created tasks are recorded but not
/// attached to the leads, so repeated task checks see the original state.
#[derive(Default)]
pub struct FakeCrm {
    leads: Mutex<Vec<Lead>>,
    open_tasks: Mutex<Vec<Task>>,
    created: Mutex<Vec<(u64, NewTask)>>,
    notes: Mutex<Vec<(u64, String)>>,
    updates: Mutex<Vec<(u64, LeadPatch)>>,
    fail_list: Mutex<bool>,
    fail_detail: Mutex<bool>,
    fail_create_task: Mutex<bool>,
    fail_notes: Mutex<bool>,
    create_task_delay: Mutex<Option<Duration>>,
}

impl FakeCrm {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self {
            leads: Mutex::new(leads),
            ..Self::default()
        }
    }

    pub fn set_leads(&self, leads: Vec<Lead>) {
        *locked(&self.leads) = leads;
    }

    pub fn set_open_tasks(&self, tasks: Vec<Task>) {
        *locked(&self.open_tasks) = tasks;
    }

    pub fn fail_list(&self, fail: bool) {
        *locked(&self.fail_list) = fail;
    }

    pub fn fail_detail(&self, fail: bool) {
        *locked(&self.fail_detail) = fail;
    }

    pub fn fail_create_task(&self, fail: bool) {
        *locked(&self.fail_create_task) = fail;
    }

    /// Make `create_task` wait this long before recording the task.
    pub fn delay_create_task(&self, delay: Duration) {
        *locked(&self.create_task_delay) = Some(delay);
    }

    pub fn fail_notes(&self, fail: bool) {
        *locked(&self.fail_notes) = fail;
    }

    pub fn created_tasks(&self) -> Vec<(u64, NewTask)> {
        locked(&self.created).clone()
    }

    pub fn notes(&self) -> Vec<(u64, String)> {
        locked(&self.notes).clone()
    }

    pub fn updates(&self) -> Vec<(u64, LeadPatch)> {
        locked(&self.updates).clone()
    }

    fn find(&self, id: u64) -> Result<Lead> {
        locked(&self.leads)
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(LeadwatchError::LeadNotFound(id))
    }
}

#[async_trait]
impl CrmClient for FakeCrm {
    async fn list_leads(&self, _filter: &LeadFilter) -> Result<Vec<Lead>> {
        if *locked(&self.fail_list) {
            return Err(LeadwatchError::upstream("crm", "connection refused"));
        }
        Ok(locked(&self.leads).clone())
    }

    async fn get_lead_detail(&self, id: u64) -> Result<Lead> {
        if *locked(&self.fail_detail) {
            return Err(LeadwatchError::upstream("crm", "timeout"));
        }
        self.find(id)
    }

    async fn list_tasks(&self, lead_id: u64) -> Result<Vec<Task>> {
        Ok(self.find(lead_id)?.tasks)
    }

    async fn list_open_tasks(&self) -> Result<Vec<Task>> {
        Ok(locked(&self.open_tasks).clone())
    }

    async fn create_task(&self, lead_id: u64, task: &NewTask) -> Result<Task> {
        if *locked(&self.fail_create_task) {
            return Err(LeadwatchError::upstream("crm", "task rejected"));
        }
        let delay = *locked(&self.create_task_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut created = locked(&self.created);
        created.push((lead_id, task.clone()));
        Ok(Task {
            id: created.len() as u64,
            entity_id: lead_id,
            text: task.text.clone(),
            complete_till: task.complete_till,
            is_completed: false,
            created_at: 0,
        })
    }

    async fn update_lead(&self, id: u64, patch: &LeadPatch) -> Result<Lead> {
        let mut lead = self.find(id)?;
        if let Some(status) = patch.status_id {
            lead.status_id = status;
        }
        locked(&self.updates).push((id, patch.clone()));
        Ok(lead)
    }

    async fn add_note(&self, lead_id: u64, text: &str) -> Result<()> {
        if *locked(&self.fail_notes) {
            return Err(LeadwatchError::upstream("crm", "note rejected"));
        }
        locked(&self.notes).push((lead_id, text.to_string()));
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// FakeGateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGateway {
    proposals: Mutex<Vec<(String, Proposal)>>,
    messages: Mutex<Vec<(String, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    answers: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl FakeGateway {
    pub fn fail(&self, fail: bool) {
        *locked(&self.fail) = fail;
    }

    pub fn proposals(&self) -> Vec<(String, Proposal)> {
        locked(&self.proposals).clone()
    }

    /// `(operator, text)` pairs in delivery order.
    pub fn messages(&self) -> Vec<(String, String)> {
        locked(&self.messages).clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        locked(&self.edits).clone()
    }

    pub fn answers(&self) -> Vec<(String, String)> {
        locked(&self.answers).clone()
    }

    fn check(&self) -> Result<()> {
        if *locked(&self.fail) {
            return Err(LeadwatchError::upstream("gateway", "unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for FakeGateway {
    async fn send_proposal(&self, operator: &str, proposal: &Proposal) -> Result<MessageRef> {
        self.check()?;
        let mut proposals = locked(&self.proposals);
        proposals.push((operator.to_string(), proposal.clone()));
        Ok(1000 + proposals.len() as MessageRef)
    }

    async fn send_message(&self, operator: &str, text: &str) -> Result<()> {
        self.check()?;
        locked(&self.messages).push((operator.to_string(), text.to_string()));
        Ok(())
    }

    async fn edit_message(&self, _operator: &str, message: MessageRef, text: &str) -> Result<()> {
        self.check()?;
        locked(&self.edits).push((message, text.to_string()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        locked(&self.answers).push((callback_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeScorer
// ---------------------------------------------------------------------------

/// Scorer fake. Queued batch responses are consumed in order; with an empty
/// queue every lead scores LOW with no action.
#[derive(Default)]
pub struct FakeScorer {
    batches: Mutex<VecDeque<Result<Vec<serde_json::Value>>>>,
    detailed: Mutex<Option<DetailedAssessment>>,
    batch_calls: Mutex<Vec<Vec<LeadFacts>>>,
    contexts: Mutex<Vec<ScoringContext>>,
}

impl FakeScorer {
    pub fn push_batch(&self, results: Vec<serde_json::Value>) {
        locked(&self.batches).push_back(Ok(results));
    }

    /// Queue a batch call that fails as an unparseable response.
    pub fn push_malformed(&self) {
        locked(&self.batches).push_back(Err(LeadwatchError::malformed(
            "scorer",
            "batch response is not an array: string",
        )));
    }

    pub fn set_detailed(&self, d: DetailedAssessment) {
        *locked(&self.detailed) = Some(d);
    }

    pub fn batch_calls(&self) -> Vec<Vec<LeadFacts>> {
        locked(&self.batch_calls).clone()
    }

    pub fn contexts(&self) -> Vec<ScoringContext> {
        locked(&self.contexts).clone()
    }
}

fn quiet(id: u64) -> serde_json::Value {
    serde_json::json!({
        "lead_id": id,
        "risk_score": 10,
        "risk_level": "LOW",
        "priority": "LOW",
        "action_needed": false,
        "reasoning": "ok"
    })
}

#[async_trait]
impl RiskScorer for FakeScorer {
    async fn score(&self, _facts: &LeadFacts, ctx: &ScoringContext) -> Result<DetailedAssessment> {
        locked(&self.contexts).push(ctx.clone());
        Ok(locked(&self.detailed)
            .clone()
            .unwrap_or_else(|| DetailedAssessment {
                assessment: RiskAssessment {
                    reasoning: "ok".into(),
                    ..RiskAssessment::fallback()
                },
                thought: None,
                memory: vec![],
            }))
    }

    async fn score_batch(&self, batch: &[LeadFacts]) -> Result<Vec<serde_json::Value>> {
        locked(&self.batch_calls).push(batch.to_vec());
        match locked(&self.batches).pop_front() {
            Some(result) => result,
            None => Ok(batch.iter().map(|f| quiet(f.id)).collect()),
        }
    }
}
