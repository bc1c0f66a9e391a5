use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use leadwatch_core::LeadwatchError;

/// Private sentinel carrying an explicit 400 through the `anyhow` chain.
#[derive(Debug)]
struct BadRequest(String);

impl std::fmt::Display for BadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequest {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequest(msg.into()).into())
    }
}

pub fn status_for(e: &LeadwatchError) -> StatusCode {
    match e {
        LeadwatchError::ActionNotFound(_) | LeadwatchError::LeadNotFound(_) => StatusCode::NOT_FOUND,
        LeadwatchError::InvalidState { .. } => StatusCode::CONFLICT,
        LeadwatchError::UnknownActionType(_) | LeadwatchError::InvalidPayload { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LeadwatchError::InvalidDecision(_) | LeadwatchError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        LeadwatchError::ConfigurationMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
        LeadwatchError::TransientUpstream { .. } | LeadwatchError::MalformedResponse { .. } => {
            StatusCode::BAD_GATEWAY
        }
        LeadwatchError::Seen(_)
        | LeadwatchError::Task(_)
        | LeadwatchError::Storage(_)
        | LeadwatchError::Io(_)
        | LeadwatchError::Yaml(_)
        | LeadwatchError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequest>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let (status, message) = match self.0.downcast_ref::<LeadwatchError>() {
            Some(e) => {
                let status = status_for(e);
                // Internal failures are logged, not echoed.
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %e, "request failed");
                    (status, e.operator_message())
                } else {
                    (status, e.to_string())
                }
            }
            None => {
                tracing::error!(error = %self.0, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
