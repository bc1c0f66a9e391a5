//! Shared request plumbing: client construction and response decoding.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// Longest error body kept in a `Status` error.
const MAX_ERROR_BODY: usize = 300;

pub fn build_client(service: &'static str, timeout_secs: u64) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(concat!("leadwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ClientError::Http { service, source })
}

/// Send-side error mapping for `.send().await`.
pub fn send_err(service: &'static str) -> impl FnOnce(reqwest::Error) -> ClientError {
    move |source| ClientError::Http { service, source }
}

/// Read the body of a successful response as JSON. `204 No Content` yields
/// `None`.
pub async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    resp: Response,
) -> Result<Option<T>, ClientError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|source| ClientError::Http { service, source })?;
    if !status.is_success() {
        return Err(status_error(service, status, &body));
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| ClientError::Decode {
            service,
            message: e.to_string(),
        })
}

/// Like [`read_json`] but treats an empty body as a decode failure.
pub async fn require_json<T: DeserializeOwned>(
    service: &'static str,
    resp: Response,
) -> Result<T, ClientError> {
    read_json(service, resp).await?.ok_or(ClientError::Decode {
        service,
        message: "empty response body".into(),
    })
}

pub fn status_error(service: &'static str, status: StatusCode, body: &str) -> ClientError {
    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_error_bodies_are_truncated_on_char_boundary() {
        let body = "я".repeat(400);
        match status_error("crm", StatusCode::BAD_GATEWAY, &body) {
            ClientError::Status { status, body, .. } => {
                assert_eq!(status, 502);
                assert!(body.len() <= MAX_ERROR_BODY);
                assert!(body.chars().all(|c| c == 'я'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
