//! Action executor: turns an approved pending action into CRM mutations.
//!
//! The store's atomic claim is the only concurrency control. Whoever claims
//! an action dispatches it; everyone else gets `InvalidState` and nothing is
//! mutated.
//!
//! Claim, dispatch and finish run as one spawned task. Dropping the caller's
//! future (a client disconnect, a webhook timeout) does not stop it, so a
//! claimed action always reaches `executed` or `failed`.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::action::{ActionPayload, ActionStatus, Decision, DecisionLogEntry, PendingAction};
use crate::collab::CrmClient;
use crate::error::{LeadwatchError, Result};
use crate::store::Store;
use crate::types::{LeadPatch, NewTask};

pub struct Executor {
    crm: Arc<dyn CrmClient>,
    store: Arc<Store>,
}

impl Executor {
    pub fn new(crm: Arc<dyn CrmClient>, store: Arc<Store>) -> Self {
        Self { crm, store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Execute a pending action.
    ///
    /// `ActionNotFound` / `InvalidState` are returned before anything is
    /// touched. Once dispatch starts, the action always ends up `executed`
    /// or `failed`; a dispatch error is returned after `failed` is stored.
    pub async fn execute(&self, id: i64) -> Result<PendingAction> {
        self.detached(id, false).await
    }

    /// Like [`execute`](Self::execute), and also records an `approved`
    /// decision whenever dispatch was attempted. Refusals log nothing.
    pub async fn approve(&self, id: i64) -> Result<PendingAction> {
        self.detached(id, true).await
    }

    async fn detached(&self, id: i64, log_approval: bool) -> Result<PendingAction> {
        let crm = self.crm.clone();
        let store = self.store.clone();
        let run = tokio::spawn(run_claimed(crm, store.clone(), id, log_approval));
        match run.await {
            Ok(result) => result,
            Err(e) => {
                error!(action_id = id, error = %e, "execution task aborted");
                if let Err(store_err) = store
                    .blocking(move |s| s.finish_execution(id, ActionStatus::Failed))
                    .await
                {
                    warn!(action_id = id, error = %store_err, "failed to mark action failed");
                }
                Err(LeadwatchError::Task(e.to_string()))
            }
        }
    }

    /// `pending → rejected`. No CRM mutation.
    pub async fn reject(&self, id: i64) -> Result<PendingAction> {
        let action = self
            .store
            .blocking(move |s| s.transition_pending(id, ActionStatus::Rejected))
            .await?;
        info!(action_id = id, "action rejected");
        Ok(action)
    }

    /// `pending → snoozed`. Snoozed actions are not picked up again
    /// automatically.
    pub async fn snooze(&self, id: i64) -> Result<PendingAction> {
        let action = self
            .store
            .blocking(move |s| s.transition_pending(id, ActionStatus::Snoozed))
            .await?;
        info!(action_id = id, "action snoozed");
        Ok(action)
    }

    /// Audit append only; the action's status is not touched.
    pub async fn log_decision(
        &self,
        id: i64,
        decision: Decision,
        modified_data: Option<serde_json::Value>,
        outcome: Option<String>,
    ) -> Result<DecisionLogEntry> {
        self.store
            .blocking(move |s| s.log_decision(id, decision, modified_data.as_ref(), outcome.as_deref()))
            .await
    }
}

async fn run_claimed(
    crm: Arc<dyn CrmClient>,
    store: Arc<Store>,
    id: i64,
    log_approval: bool,
) -> Result<PendingAction> {
    let action = store.blocking(move |s| s.claim_for_execution(id)).await?;
    info!(action_id = id, lead_id = action.lead_id, action_type = %action.action_type, "executing action");

    let result = match dispatch(crm.as_ref(), &action).await {
        Ok(()) => {
            store
                .blocking(move |s| s.finish_execution(id, ActionStatus::Executed))
                .await?;
            info!(action_id = id, "action executed");
            Ok(())
        }
        Err(e) => {
            warn!(action_id = id, error = %e, "action failed");
            if let Err(store_err) = store
                .blocking(move |s| s.finish_execution(id, ActionStatus::Failed))
                .await
            {
                error!(action_id = id, error = %store_err, "failed to mark action failed");
            }
            Err(e)
        }
    };

    if log_approval {
        let outcome = match &result {
            Ok(()) => "executed".to_string(),
            Err(e) => format!("failed: {e}"),
        };
        let logged = store
            .blocking(move |s| s.log_decision(id, Decision::Approved, None, Some(&outcome)))
            .await;
        if let Err(e) = logged {
            warn!(action_id = id, error = %e, "failed to log decision");
        }
    }

    result?;
    store.blocking(move |s| s.require_action(id)).await
}

async fn dispatch(crm: &dyn CrmClient, action: &PendingAction) -> Result<()> {
    let lead = action.lead_id;
    match action.payload()? {
        ActionPayload::CreateTask {
            text,
            complete_till,
        } => {
            let task = NewTask {
                text: text.clone(),
                complete_till,
            };
            crm.create_task(lead, &task).await?;
            crm.add_note(
                lead,
                &format!("Agent created a task: {text}\n\nReasoning: {}", action.reasoning),
            )
            .await?;
        }
        ActionPayload::UpdateStatus { new_status_id } => {
            let patch = LeadPatch {
                status_id: Some(new_status_id),
                ..LeadPatch::default()
            };
            crm.update_lead(lead, &patch).await?;
            crm.add_note(
                lead,
                &format!("Agent updated the deal status\n\nReasoning: {}", action.reasoning),
            )
            .await?;
        }
        ActionPayload::AddNote { text } => {
            crm.add_note(lead, &text).await?;
        }
        ActionPayload::Wait => {
            crm.add_note(
                lead,
                &format!("Agent: no action required\n\n{}", action.reasoning),
            )
            .await?;
        }
    }
    Ok(())
}
