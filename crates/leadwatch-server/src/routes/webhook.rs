//! Gateway webhook: button presses and operator commands.
//!
//! Every well-formed update is acknowledged with 200 so the gateway does not
//! redeliver it; failures are reported to the operator, not to the gateway.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, warn};

use leadwatch_core::operator::{Callback, Command, Origin};

use crate::auth::{webhook_secret_ok, Access};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

fn ok() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
}

/// POST /webhook
pub async fn receive(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> (StatusCode, Json<serde_json::Value>) {
    let secret = app.engine.config().gateway.webhook_secret.as_deref();
    if !webhook_secret_ok(secret, &headers) {
        warn!(update_id = update.update_id, "webhook secret mismatch");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        );
    }

    if let Some(query) = update.callback_query {
        on_callback(&app, query).await;
    } else if let Some(message) = update.message {
        on_message(&app, message).await;
    } else {
        debug!(update_id = update.update_id, "ignoring update");
    }
    ok()
}

async fn on_callback(app: &AppState, query: CallbackQuery) {
    let gateway = app.engine.gateway();
    let user = query.from.id.to_string();
    let access = app.gate.check(&user);
    if let Some(refusal) = access.refusal() {
        warn!(user = %user, ?access, "callback refused");
        if let Err(e) = gateway.answer_callback(&query.id, refusal).await {
            warn!(error = %e, "failed to answer callback");
        }
        return;
    }

    let data = query.data.unwrap_or_default();
    let ack = match data.parse::<Callback>() {
        Ok(callback) => {
            let origin = query.message.map(|m| Origin {
                chat: m.chat.id.to_string(),
                message: m.message_id,
                text: m.text.unwrap_or_default(),
            });
            app.engine.desk().handle_callback(callback, origin.as_ref()).await
        }
        Err(e) => {
            warn!(data = %data, error = %e, "unrecognized callback");
            "Unknown action".to_string()
        }
    };
    if let Err(e) = gateway.answer_callback(&query.id, &ack).await {
        warn!(error = %e, "failed to answer callback");
    }
}

async fn on_message(app: &AppState, message: Message) {
    let Some(command) = message.text.as_deref().and_then(Command::parse) else {
        return;
    };
    let chat = message.chat.id.to_string();
    let user = message
        .from
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| chat.clone());

    match app.gate.check(&user) {
        Access::Allowed => {
            if let Err(e) = app.engine.desk().handle_command(&chat, command).await {
                warn!(?command, error = %e, "failed to answer command");
            }
        }
        refused => {
            warn!(user = %user, access = ?refused, "command refused");
            if let Some(text) = refused.refusal() {
                if let Err(e) = app.engine.gateway().send_message(&chat, text).await {
                    warn!(error = %e, "failed to send refusal");
                }
            }
        }
    }
}
