use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

/// Header Telegram echoes back when the webhook was registered with a secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const WINDOW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter: at most `limit` events per user in any 60 s span.
pub struct RateLimiter {
    limit: usize,
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute as usize,
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, user: &str) -> bool {
        self.check_at(user, Instant::now())
    }

    /// Record an event at `now` and report whether it is within the limit.
    /// Rejected events are not recorded.
    pub fn check_at(&self, user: &str, now: Instant) -> bool {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let window = events.entry(user.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now);
        true
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
    Limited,
}

impl Access {
    /// Reply shown to the user for a refused event.
    pub fn refusal(self) -> Option<&'static str> {
        match self {
            Access::Allowed => None,
            Access::Denied => Some("Access denied"),
            Access::Limited => Some("Too many requests"),
        }
    }
}

/// Authorization plus rate limiting for the operator-facing webhook.
pub struct Gate {
    allowed: HashSet<String>,
    limiter: RateLimiter,
}

impl Gate {
    pub fn new(allowed: impl IntoIterator<Item = String>, limit_per_minute: u32) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            limiter: RateLimiter::new(limit_per_minute),
        }
    }

    pub fn check(&self, user: &str) -> Access {
        self.check_at(user, Instant::now())
    }

    /// Unknown users are denied without touching the limiter.
    pub fn check_at(&self, user: &str, now: Instant) -> Access {
        if !self.allowed.contains(user) {
            return Access::Denied;
        }
        if self.limiter.check_at(user, now) {
            Access::Allowed
        } else {
            Access::Limited
        }
    }
}

/// True when no secret is configured or the header matches it.
pub fn webhook_secret_ok(expected: Option<&str>, headers: &HeaderMap) -> bool {
    match expected.filter(|s| !s.is_empty()) {
        None => true,
        Some(secret) => headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == secret),
    }
}

// ---------------------------------------------------------------------------
// API token middleware
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ApiAuth {
    pub token: Option<String>,
}

/// Gates `/api/*` behind `Authorization: Bearer <token>`.
///
/// When `token` is `None` the middleware passes every request through.
/// `/api/health` is always public.
pub async fn api_auth_middleware(
    State(auth): State<ApiAuth>,
    req: Request,
    next: Next,
) -> Response {
    let Some(token) = auth.token.as_deref().filter(|t| !t.is_empty()) else {
        return next.run(req).await;
    };
    let path = req.uri().path();
    if !path.starts_with("/api/") || path == "/api/health" {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(token) {
        return next.run(req).await;
    }

    let mut resp = Response::new(Body::from(r#"{"error":"unauthorized"}"#));
    *resp.status_mut() = axum::http::StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    resp
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn test_app(token: Option<&str>) -> Router {
        let auth = ApiAuth {
            token: token.map(str::to_string),
        };
        Router::new()
            .route("/api/actions", get(ok_handler))
            .route("/api/health", get(ok_handler))
            .route("/webhook", get(ok_handler))
            .layer(middleware::from_fn_with_state(auth, api_auth_middleware))
    }

    async fn status(app: Router, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut req = axum::http::Request::builder().uri(uri);
        if let Some(b) = bearer {
            req = req.header("authorization", format!("Bearer {b}"));
        }
        app.oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn limiter_allows_up_to_limit_then_refuses() {
        let limiter = RateLimiter::new(3);
        let t0 = Instant::now();
        assert!(limiter.check_at("7", t0));
        assert!(limiter.check_at("7", t0 + Duration::from_secs(1)));
        assert!(limiter.check_at("7", t0 + Duration::from_secs(2)));
        assert!(!limiter.check_at("7", t0 + Duration::from_secs(3)));
        // Other users have their own window.
        assert!(limiter.check_at("8", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn limiter_window_slides() {
        let limiter = RateLimiter::new(2);
        let t0 = Instant::now();
        assert!(limiter.check_at("7", t0));
        assert!(limiter.check_at("7", t0 + Duration::from_secs(30)));
        assert!(!limiter.check_at("7", t0 + Duration::from_secs(59)));
        // The first event has left the window.
        assert!(limiter.check_at("7", t0 + Duration::from_secs(60)));
        assert!(!limiter.check_at("7", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn gate_denies_unknown_users_without_counting_them() {
        let gate = Gate::new(vec!["42".to_string()], 1);
        let t0 = Instant::now();
        assert_eq!(gate.check_at("99", t0), Access::Denied);
        assert_eq!(gate.check_at("99", t0), Access::Denied);
        assert_eq!(gate.check_at("42", t0), Access::Allowed);
        assert_eq!(gate.check_at("42", t0), Access::Limited);
        assert_eq!(Access::Limited.refusal(), Some("Too many requests"));
        assert_eq!(Access::Denied.refusal(), Some("Access denied"));
    }

    #[test]
    fn gate_with_no_identities_denies_everyone() {
        let gate = Gate::new(Vec::new(), 20);
        assert_eq!(gate.check("42"), Access::Denied);
    }

    #[test]
    fn webhook_secret_matches_header() {
        let mut headers = HeaderMap::new();
        assert!(webhook_secret_ok(None, &headers));
        assert!(!webhook_secret_ok(Some("s3cret"), &headers));
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(!webhook_secret_ok(Some("s3cret"), &headers));
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(webhook_secret_ok(Some("s3cret"), &headers));
    }

    #[tokio::test]
    async fn no_token_passes_through() {
        assert_eq!(status(test_app(None), "/api/actions", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        assert_eq!(
            status(test_app(Some("t")), "/api/actions", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(test_app(Some("t")), "/api/actions", Some("wrong")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn matching_bearer_passes() {
        assert_eq!(
            status(test_app(Some("t")), "/api/actions", Some("t")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn health_and_webhook_are_public() {
        assert_eq!(status(test_app(Some("t")), "/api/health", None).await, StatusCode::OK);
        assert_eq!(status(test_app(Some("t")), "/webhook", None).await, StatusCode::OK);
    }
}
