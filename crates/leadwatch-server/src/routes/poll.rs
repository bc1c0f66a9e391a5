use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/poll: run one poll cycle now. Reports `skipped` when a cycle is
/// already running.
pub async fn poll_now(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let report = app.engine.poller().poll_once().await?;
    Ok(Json(match report {
        Some(report) => serde_json::json!({ "skipped": false, "report": report }),
        None => serde_json::json!({ "skipped": true }),
    }))
}
