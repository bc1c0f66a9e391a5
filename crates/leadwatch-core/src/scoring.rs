//! Single-lead analysis with per-lead memory.
//!
//! The scorer sees what it previously asked to remember about the lead and
//! the last few scores; whatever it returns is written back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::collab::{CrmClient, RiskScorer};
use crate::error::Result;
use crate::store::Store;
use crate::types::{DetailedAssessment, LeadFacts, ScoringContext};

const HISTORY_LEN: usize = 3;

fn memory_prefix(lead_id: u64) -> String {
    format!("lead_{lead_id}_")
}

pub struct LeadAnalyst {
    crm: Arc<dyn CrmClient>,
    scorer: Arc<dyn RiskScorer>,
    store: Arc<Store>,
}

impl LeadAnalyst {
    pub fn new(crm: Arc<dyn CrmClient>, scorer: Arc<dyn RiskScorer>, store: Arc<Store>) -> Self {
        Self { crm, scorer, store }
    }

    /// Memory keys are handed to the scorer without the lead prefix.
    pub async fn context(&self, lead_id: u64) -> Result<ScoringContext> {
        self.store
            .blocking(move |s| {
                let prefix = memory_prefix(lead_id);
                let memory = s
                    .memory_with_prefix(&prefix)?
                    .into_iter()
                    .map(|(k, v)| (k.strip_prefix(&prefix).unwrap_or(&k).to_string(), v))
                    .collect();
                let history = s.recent_scores(lead_id, HISTORY_LEN)?;
                Ok(ScoringContext { memory, history })
            })
            .await
    }

    /// Score one lead and persist the score, thought and memory updates.
    /// The score row is required; thought and memory writes only warn.
    pub async fn analyze(&self, lead_id: u64) -> Result<DetailedAssessment> {
        let lead = self.crm.get_lead_detail(lead_id).await?;
        let now = Utc::now();
        let facts = LeadFacts::from_lead(&lead, now.timestamp());
        let ctx = self.context(lead_id).await?;

        let result = self.scorer.score(&facts, &ctx).await?;
        let a = &result.assessment;
        info!(lead_id, risk_score = a.risk_score, risk_level = %a.risk_level, "lead analyzed");

        let saved = result.clone();
        self.store
            .blocking(move |s| save_analysis(s, lead_id, &saved, now))
            .await?;
        Ok(result)
    }
}

fn save_analysis(
    store: &Store,
    lead_id: u64,
    result: &DetailedAssessment,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let a = &result.assessment;
    store.insert_score(lead_id, a, now)?;

    if let Some(thought) = result.thought.as_deref().filter(|t| !t.trim().is_empty()) {
        if let Err(e) = store.insert_thought(lead_id, thought, a.recommended_action.as_deref()) {
            warn!(lead_id, error = %e, "failed to save thought");
        }
    }
    let prefix = memory_prefix(lead_id);
    for m in &result.memory {
        if let Err(e) = store.upsert_memory(&format!("{prefix}{}", m.key), &m.insight) {
            warn!(lead_id, key = %m.key, error = %e, "failed to save memory");
        }
    }
    Ok(())
}
