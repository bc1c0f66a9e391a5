//! Telegram Bot API gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use leadwatch_core::collab::NotificationGateway;
use leadwatch_core::config::GatewayConfig;
use leadwatch_core::types::{MessageRef, Proposal, ProposalButton};
use leadwatch_core::{LeadwatchError, Result};

use crate::error::ClientError;
use crate::http::{build_client, send_err, status_error};

const SERVICE: &str = "gateway";
/// Telegram rejects longer message texts.
pub const MAX_MESSAGE_CHARS: usize = 4096;
const BUTTONS_PER_ROW: usize = 2;

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Inline keyboard rows for a proposal, two buttons per row.
pub fn keyboard(proposal: &Proposal) -> Vec<Vec<InlineButton>> {
    let id_for = |b: ProposalButton| match b {
        ProposalButton::Details => proposal.lead_id as i64,
        _ => proposal.action_id,
    };
    proposal
        .buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(|b| InlineButton {
                    text: b.label().to_string(),
                    callback_data: format!("{}_{}", b.callback_prefix(), id_for(*b)),
                })
                .collect()
        })
        .collect()
}

/// Cut `text` to the gateway's length limit, marking the cut.
pub fn clamp_text(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    out.push('…');
    out
}

pub struct TelegramGateway {
    http: reqwest::Client,
    base: String,
}

impl TelegramGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LeadwatchError::ConfigurationMissing("gateway.bot_token".into()))?;
        Ok(Self {
            http: build_client(SERVICE, config.timeout_secs)?,
            base: format!("{}/bot{token}", config.api_base.trim_end_matches('/')),
        })
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        debug!(method, "gateway call");
        let resp = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        let status = resp.status();
        let text = resp.text().await.map_err(send_err(SERVICE))?;
        match serde_json::from_str::<Envelope>(&text) {
            Ok(env) if env.ok => Ok(env.result.unwrap_or(Value::Null)),
            Ok(env) => Err(ClientError::Api {
                service: SERVICE,
                message: env
                    .description
                    .unwrap_or_else(|| format!("{method} failed with HTTP {}", status.as_u16())),
            }
            .into()),
            Err(_) if !status.is_success() => Err(status_error(SERVICE, status, &text).into()),
            Err(e) => Err(ClientError::Decode {
                service: SERVICE,
                message: e.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl NotificationGateway for TelegramGateway {
    async fn send_proposal(&self, operator: &str, proposal: &Proposal) -> Result<MessageRef> {
        let body = json!({
            "chat_id": operator,
            "text": clamp_text(&proposal.text),
            "reply_markup": { "inline_keyboard": keyboard(proposal) },
        });
        let result = self.call("sendMessage", &body).await?;
        let sent: SentMessage = serde_json::from_value(result)
            .map_err(|e| LeadwatchError::malformed(SERVICE, e))?;
        Ok(sent.message_id)
    }

    async fn send_message(&self, operator: &str, text: &str) -> Result<()> {
        let body = json!({ "chat_id": operator, "text": clamp_text(text) });
        self.call("sendMessage", &body).await.map(drop)
    }

    async fn edit_message(&self, operator: &str, message: MessageRef, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": operator,
            "message_id": message,
            "text": clamp_text(text),
        });
        self.call("editMessageText", &body).await.map(drop)
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        let body = json!({ "callback_query_id": callback_id, "text": text });
        self.call("answerCallbackQuery", &body).await.map(drop)
    }
}
