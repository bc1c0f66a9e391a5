//! HTTP surface for leadwatch: the gateway webhook and a small JSON API
//! over pending actions, lead scores and poll cycles.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use leadwatch_core::engine::Engine;

use crate::auth::{api_auth_middleware, ApiAuth};
use crate::state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let auth = ApiAuth {
        token: engine.config().server.api_token.clone(),
    };
    let app_state = AppState::new(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Gateway
        .route("/webhook", post(routes::webhook::receive))
        // Health
        .route("/api/health", get(routes::health::health))
        // Actions
        .route("/api/actions", get(routes::actions::list_actions))
        .route("/api/actions/{id}", get(routes::actions::get_action))
        .route("/api/actions/{id}/approve", post(routes::actions::approve))
        .route("/api/actions/{id}/reject", post(routes::actions::reject))
        .route("/api/actions/{id}/snooze", post(routes::actions::snooze))
        .route(
            "/api/actions/{id}/decisions",
            get(routes::actions::list_decisions).post(routes::actions::log_decision),
        )
        // Leads
        .route("/api/leads/{id}/scores", get(routes::leads::scores))
        .route("/api/leads/{id}/analyze", post(routes::leads::analyze))
        .route("/api/leads/{id}/process", post(routes::leads::process))
        // Poll
        .route("/api/poll", post(routes::poll::poll_now))
        .layer(middleware::from_fn_with_state(auth, api_auth_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Serve on a pre-bound listener until `shutdown` resolves.
///
/// Accepting a bound `TcpListener` lets the caller read the actual port
/// first (useful when binding port 0).
pub async fn serve_on(
    engine: Arc<Engine>,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(engine);

    tracing::info!("leadwatch server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
