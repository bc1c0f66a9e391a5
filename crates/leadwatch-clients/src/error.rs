use leadwatch_core::LeadwatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service}: request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service}: HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service}: failed to decode response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// The service answered but reported a failure in its own envelope.
    #[error("{service}: {message}")]
    Api {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn service(&self) -> &'static str {
        match self {
            Self::Http { service, .. }
            | Self::Status { service, .. }
            | Self::Decode { service, .. }
            | Self::Api { service, .. } => service,
        }
    }
}

impl From<ClientError> for LeadwatchError {
    fn from(e: ClientError) -> Self {
        let service = e.service();
        match e {
            ClientError::Decode { message, .. } => LeadwatchError::malformed(service, message),
            other => LeadwatchError::upstream(service, other),
        }
    }
}
