//! Operator surface: button callbacks and text commands coming back from
//! the notification gateway.
//!
//! Authorization and rate limiting are the transport's job; everything here
//! assumes the caller is an allowed operator.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use crate::action::{Decision, PendingAction};
use crate::collab::NotificationGateway;
use crate::digest::{DigestKind, Digests};
use crate::error::{LeadwatchError, Result};
use crate::executor::Executor;
use crate::types::MessageRef;

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Approve(i64),
    Reject(i64),
    /// Carries a lead id, not an action id.
    Details(u64),
    Snooze(i64),
}

static CALLBACK_RE: OnceLock<Regex> = OnceLock::new();

fn callback_re() -> &'static Regex {
    CALLBACK_RE.get_or_init(|| Regex::new(r"^(execute|reject|details|snooze)_(\d+)$").unwrap())
}

impl FromStr for Callback {
    type Err = LeadwatchError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LeadwatchError::InvalidPayload {
            kind: "callback".into(),
            message: format!("unrecognized callback data '{s}'"),
        };
        let caps = callback_re().captures(s).ok_or_else(invalid)?;
        let id: u64 = caps[2].parse().map_err(|_| invalid())?;
        let action_id = i64::try_from(id).map_err(|_| invalid())?;
        Ok(match &caps[1] {
            "execute" => Callback::Approve(action_id),
            "reject" => Callback::Reject(action_id),
            "details" => Callback::Details(id),
            _ => Callback::Snooze(action_id),
        })
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Today,
    Hot,
    Risk,
    Week,
    Stats,
}

impl Command {
    /// Parse `/name` or `/name@bot`, ignoring arguments. Free text and
    /// unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Some(match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "today" => Command::Today,
            "hot" => Command::Hot,
            "risk" => Command::Risk,
            "week" => Command::Week,
            "stats" => Command::Stats,
            _ => return None,
        })
    }
}

pub const HELP_TEXT: &str = "Commands:\n\n\
/today — dashboard for the day\n\
/hot — VIP and important leads\n\
/risk — stuck leads\n\
/week — week overview\n\
/stats — agent statistics";

// ---------------------------------------------------------------------------
// Desk
// ---------------------------------------------------------------------------

/// The message a callback came from, so it can be edited in place.
#[derive(Debug, Clone)]
pub struct Origin {
    pub chat: String,
    pub message: MessageRef,
    pub text: String,
}

pub struct Desk {
    executor: Arc<Executor>,
    digests: Arc<Digests>,
    gateway: Arc<dyn NotificationGateway>,
}

impl Desk {
    pub fn new(
        executor: Arc<Executor>,
        digests: Arc<Digests>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            executor,
            digests,
            gateway,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn digests(&self) -> &Arc<Digests> {
        &self.digests
    }

    /// Execute and record an `approved` decision whenever dispatch was
    /// attempted. Refusals (`ActionNotFound`, `InvalidState`) log nothing,
    /// and a failed audit write does not turn a success into an error.
    pub async fn approve(&self, id: i64) -> Result<PendingAction> {
        self.executor.approve(id).await
    }

    pub async fn reject(&self, id: i64) -> Result<PendingAction> {
        let action = self.executor.reject(id).await?;
        if let Err(e) = self
            .executor
            .log_decision(id, Decision::Rejected, None, None)
            .await
        {
            warn!(action_id = id, error = %e, "failed to log decision");
        }
        Ok(action)
    }

    pub async fn snooze(&self, id: i64) -> Result<PendingAction> {
        self.executor.snooze(id).await
    }

    /// Handle a button press and return the short acknowledgement text.
    ///
    /// Errors become operator-safe messages; they never leave this method.
    pub async fn handle_callback(&self, callback: Callback, origin: Option<&Origin>) -> String {
        info!(?callback, "operator callback");
        let (result, suffix, ack) = match callback {
            Callback::Approve(id) => (self.approve(id).await.map(drop), "✅ Executed", "Executed!"),
            Callback::Reject(id) => (self.reject(id).await.map(drop), "❌ Rejected", "Rejected"),
            Callback::Snooze(id) => (self.snooze(id).await.map(drop), "⏰ Snoozed", "Snoozed"),
            Callback::Details(lead_id) => {
                return match origin {
                    Some(o) => self.send_details(&o.chat, lead_id).await,
                    None => String::new(),
                };
            }
        };

        match result {
            Ok(()) => {
                if let Some(o) = origin {
                    let text = format!("{}\n\n{suffix}", o.text);
                    if let Err(e) = self.gateway.edit_message(&o.chat, o.message, &text).await {
                        warn!(error = %e, "failed to edit proposal message");
                    }
                }
                ack.to_string()
            }
            Err(e) => {
                warn!(error = %e, "callback failed");
                format!("Error: {}", e.operator_message())
            }
        }
    }

    async fn send_details(&self, chat: &str, lead_id: u64) -> String {
        let text = match self.digests.details(lead_id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(lead_id, error = %e, "failed to load lead details");
                return format!("Error: {}", e.operator_message());
            }
        };
        if let Err(e) = self.gateway.send_message(chat, &text).await {
            warn!(error = %e, "failed to send details");
        }
        String::new()
    }

    /// Reply text for a command.
    pub async fn command_reply(&self, command: Command) -> Result<String> {
        let now = Utc::now();
        match command {
            Command::Start => Ok(format!("🤖 Lead agent is running\n\n{HELP_TEXT}")),
            Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Today => self.digests.render(DigestKind::Morning).await,
            Command::Hot => self.digests.hot(now).await,
            Command::Risk => self.digests.risk(now).await,
            Command::Week => self.digests.render(DigestKind::Weekly).await,
            Command::Stats => self.digests.stats().await,
        }
    }

    /// Answer a command in `chat`. Failures are reported as a short message.
    pub async fn handle_command(&self, chat: &str, command: Command) -> Result<()> {
        info!(?command, "operator command");
        let reply = match self.command_reply(command).await {
            Ok(text) => text,
            Err(e) => {
                warn!(?command, error = %e, "command failed");
                "❌ Failed to load data".to_string()
            }
        };
        self.gateway.send_message(chat, &reply).await
    }
}
