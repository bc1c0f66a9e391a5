//! `leadwatch-clients`: HTTP implementations of the leadwatch collaborator
//! traits.
//!
//! ```text
//! Config ──► collaborators()
//!              ├─ AmoCrmClient      CrmClient            amoCRM v4 REST
//!              ├─ TelegramGateway   NotificationGateway  Telegram Bot API
//!              └─ GeminiScorer      RiskScorer           Gemini generateContent
//! ```
//!
//! Every client carries a request timeout from its config section. Transport
//! and status failures surface as `TransientUpstream`, undecodable bodies as
//! `MalformedResponse`.

pub mod amocrm;
pub mod error;
pub mod gemini;
mod http;
pub mod telegram;

use std::sync::Arc;

use leadwatch_core::config::Config;
use leadwatch_core::engine::Collaborators;
use leadwatch_core::Result;

pub use amocrm::AmoCrmClient;
pub use error::ClientError;
pub use gemini::GeminiScorer;
pub use telegram::TelegramGateway;

/// Build all three clients from `config`. Fails with `ConfigurationMissing`
/// naming the first absent credential.
pub fn collaborators(config: &Config) -> Result<Collaborators> {
    Ok(Collaborators {
        crm: Arc::new(AmoCrmClient::new(&config.crm)?),
        gateway: Arc::new(TelegramGateway::new(&config.gateway)?),
        scorer: Arc::new(GeminiScorer::new(&config.scorer)?),
    })
}
