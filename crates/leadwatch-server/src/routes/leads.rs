use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use leadwatch_core::store::LeadScore;
use leadwatch_core::types::DetailedAssessment;
use leadwatch_core::workflow::WorkflowOutcome;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_SCORE_LIMIT: usize = 10;

#[derive(Deserialize)]
pub struct ScoresQuery {
    pub limit: Option<usize>,
}

/// GET /api/leads/:id/scores: score history, newest first.
pub async fn scores(
    State(app): State<AppState>,
    Path(lead_id): Path<u64>,
    Query(q): Query<ScoresQuery>,
) -> Result<Json<Vec<LeadScore>>, AppError> {
    let store = app.engine.store().clone();
    let limit = q.limit.unwrap_or(DEFAULT_SCORE_LIMIT);
    let rows = blocking(move || store.recent_scores(lead_id, limit)).await?;
    Ok(Json(rows))
}

/// POST /api/leads/:id/analyze: single-lead scoring with memory.
pub async fn analyze(
    State(app): State<AppState>,
    Path(lead_id): Path<u64>,
) -> Result<Json<DetailedAssessment>, AppError> {
    Ok(Json(app.engine.analyst().analyze(lead_id).await?))
}

/// POST /api/leads/:id/process: run the critical-lead workflow once.
pub async fn process(
    State(app): State<AppState>,
    Path(lead_id): Path<u64>,
) -> Result<Json<WorkflowOutcome>, AppError> {
    Ok(Json(app.engine.workflow().run(lead_id).await?))
}
