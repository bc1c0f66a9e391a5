use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeadwatchError {
    #[error("upstream {service} failed: {message}")]
    TransientUpstream { service: String, message: String },

    #[error("malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

    /// `status` is the stored status, or "being executed" while another
    /// caller holds the execution claim.
    #[error("action {id} is not pending: {status}")]
    InvalidState { id: i64, status: String },

    #[error("invalid payload for {kind}: {message}")]
    InvalidPayload { kind: String, message: String },

    #[error("action not found: {0}")]
    ActionNotFound(i64),

    #[error("lead not found: {0}")]
    LeadNotFound(u64),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid decision '{0}': must be approved, rejected, or modified")]
    InvalidDecision(String),

    #[error("seen store error: {0}")]
    Seen(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LeadwatchError {
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        Self::TransientUpstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(service: impl Into<String>, message: impl ToString) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Short text safe to show in the notification channel.
    pub fn operator_message(&self) -> String {
        match self {
            Self::InvalidState { id, status } => format!("Action #{id} is already {status}"),
            Self::ActionNotFound(id) => format!("Action #{id} not found"),
            Self::LeadNotFound(id) => format!("Lead #{id} not found"),
            Self::UnknownActionType(kind) => format!("Unsupported action type: {kind}"),
            Self::TransientUpstream { service, .. } => {
                format!("{service} is unavailable right now, try again later")
            }
            Self::MalformedResponse { service, .. } => {
                format!("{service} returned an unexpected response")
            }
            Self::ConfigurationMissing(what) => format!("Not configured: {what}"),
            _ => "Something went wrong, see server logs".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LeadwatchError>;
