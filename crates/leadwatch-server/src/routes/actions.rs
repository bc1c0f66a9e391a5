use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use leadwatch_core::action::{ActionStatus, Decision, DecisionLogEntry, PendingAction};

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/actions: actions in `status` (default `pending`); `status=all`
/// lists every status.
pub async fn list_actions(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<PendingAction>>, AppError> {
    let status = match q.status.as_deref() {
        None => Some(ActionStatus::Pending),
        Some("all") => None,
        Some(s) => Some(
            s.parse::<ActionStatus>()
                .map_err(|e| AppError::bad_request(e.to_string()))?,
        ),
    };
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let store = app.engine.store().clone();
    let rows = blocking(move || store.list_actions(status, limit)).await?;
    Ok(Json(rows))
}

/// GET /api/actions/:id
pub async fn get_action(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PendingAction>, AppError> {
    let store = app.engine.store().clone();
    Ok(Json(blocking(move || store.require_action(id)).await?))
}

/// POST /api/actions/:id/approve: execute the action against the CRM.
pub async fn approve(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PendingAction>, AppError> {
    Ok(Json(app.engine.desk().approve(id).await?))
}

/// POST /api/actions/:id/reject
pub async fn reject(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PendingAction>, AppError> {
    Ok(Json(app.engine.desk().reject(id).await?))
}

/// POST /api/actions/:id/snooze
pub async fn snooze(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PendingAction>, AppError> {
    Ok(Json(app.engine.desk().snooze(id).await?))
}

#[derive(Deserialize)]
pub struct DecisionBody {
    pub decision: String,
    #[serde(default)]
    pub modified_data: Option<serde_json::Value>,
    #[serde(default)]
    pub outcome: Option<String>,
}

/// POST /api/actions/:id/decisions: append an audit entry. The action's
/// status is not changed.
pub async fn log_decision(
    State(app): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<DecisionLogEntry>, AppError> {
    let decision: Decision = body.decision.parse()?;
    let store = app.engine.store().clone();
    let entry = blocking(move || {
        store.log_decision(
            id,
            decision,
            body.modified_data.as_ref(),
            body.outcome.as_deref(),
        )
    })
    .await?;
    Ok(Json(entry))
}

/// GET /api/actions/:id/decisions: audit trail, oldest first.
pub async fn list_decisions(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DecisionLogEntry>>, AppError> {
    let store = app.engine.store().clone();
    let entries = blocking(move || {
        store.require_action(id)?;
        store.decisions_for(id)
    })
    .await?;
    Ok(Json(entries))
}
