//! Gemini `generateContent` risk scorer.
//!
//! Both modes ask for JSON output at temperature 0 and parse the returned
//! text with the core's fence-tolerant parsers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use leadwatch_core::collab::{parse_batch_response, parse_detailed_response, RiskScorer};
use leadwatch_core::config::ScorerConfig;
use leadwatch_core::types::{DetailedAssessment, LeadFacts, ScoringContext};
use leadwatch_core::{LeadwatchError, Result};

use crate::http::{build_client, require_json, send_err};

const SERVICE: &str = "scorer";

const BATCH_SYSTEM: &str = "You are a CRM analyst scoring sales leads for the risk of being lost.
Criteria:
- budget >= 500000 is VIP: always HIGH priority
- budget >= 100000 is important: at least MEDIUM priority
- no update for 7+ days: HIGH risk
- no tasks and no update for 3+ days: MEDIUM risk
risk_level is LOW (0-25), MEDIUM (26-50), HIGH (51-75) or CRITICAL (76-100).
recommended_action, when action_needed, is one of create_task, update_status, add_note, wait.
Keep reasoning to one line.";

const SINGLE_SYSTEM: &str = "You are a CRM analyst. Assess one lead's risk (0-100) and whether action is needed.
risk_level is LOW (0-25), MEDIUM (26-50), HIGH (51-75) or CRITICAL (76-100).
recommended_action is one of create_task, update_status, add_note, wait.
You may return a short private `thought` and `memory` items ({key, insight}) worth remembering about this lead.";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Compact one-line-per-lead listing used in the batch prompt.
pub fn batch_prompt(batch: &[LeadFacts]) -> String {
    let mut out = format!(
        "Score these {} leads. Reply with JSON only: \
         {{\"results\":[{{\"lead_id\":1,\"risk_score\":30,\"risk_level\":\"MEDIUM\",\
         \"priority\":\"LOW\",\"action_needed\":false,\"recommended_action\":null,\
         \"task_text\":null,\"reasoning\":\"...\"}}]}}\n\
         Results must be in the same order as the leads.\n\nLeads:\n",
        batch.len()
    );
    for f in batch {
        out.push_str(&format!(
            "#{} \"{}\": {}d since update, budget {}, status {}, tasks {}, notes {}\n",
            f.id, f.name, f.staleness_days, f.budget, f.status_id, f.task_count, f.note_count
        ));
    }
    out
}

pub fn single_prompt(facts: &LeadFacts, ctx: &ScoringContext) -> String {
    let mut out = format!(
        "Lead #{} \"{}\":\n- updated {} days ago\n- budget {}\n- tasks {}\n- notes {}\n- status {}\n",
        facts.id,
        facts.name,
        facts.staleness_days,
        facts.budget,
        facts.task_count,
        facts.note_count,
        facts.status_id
    );
    if !ctx.memory.is_empty() {
        out.push_str("\nWhat you remembered earlier:\n");
        for (key, insight) in &ctx.memory {
            out.push_str(&format!("- {key}: {insight}\n"));
        }
    }
    if !ctx.history.is_empty() {
        out.push_str("\nRecent scores (newest first):\n");
        for s in &ctx.history {
            out.push_str(&format!(
                "- {}: {} ({}), priority {}\n",
                s.calculated_at.format("%Y-%m-%d"),
                s.score,
                s.risk_level,
                s.priority
            ));
        }
    }
    out.push_str(
        "\nReply with JSON only: {\"risk_score\":0,\"risk_level\":\"LOW\",\"priority\":\"LOW\",\
         \"action_needed\":false,\"recommended_action\":null,\"task_text\":null,\
         \"new_status_id\":null,\"reasoning\":\"...\",\"thought\":null,\"memory\":[]}",
    );
    out
}

pub struct GeminiScorer {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LeadwatchError::ConfigurationMissing("scorer.api_key".into()))?;
        Ok(Self {
            http: build_client(SERVICE, config.timeout_secs)?,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                config.api_base.trim_end_matches('/'),
                config.model
            ),
            api_key,
        })
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0, "responseMimeType": "application/json" },
        });
        let resp = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        let parsed: GenerateResponse = require_json(SERVICE, resp).await?;
        parsed
            .text()
            .ok_or_else(|| LeadwatchError::malformed(SERVICE, "response has no text candidate"))
    }
}

#[async_trait]
impl RiskScorer for GeminiScorer {
    async fn score(&self, facts: &LeadFacts, ctx: &ScoringContext) -> Result<DetailedAssessment> {
        let text = self.generate(SINGLE_SYSTEM, &single_prompt(facts, ctx)).await?;
        parse_detailed_response(&text)
    }

    async fn score_batch(&self, batch: &[LeadFacts]) -> Result<Vec<serde_json::Value>> {
        debug!(size = batch.len(), "scoring batch");
        let text = self.generate(BATCH_SYSTEM, &batch_prompt(batch)).await?;
        let results = parse_batch_response(&text)?;
        if results.len() != batch.len() {
            warn!(expected = batch.len(), got = results.len(), "batch result count mismatch");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leadwatch_core::store::LeadScore;
    use leadwatch_core::types::{Priority, RiskLevel};

    fn scorer(url: &str) -> GeminiScorer {
        GeminiScorer::new(&ScorerConfig {
            api_base: url.to_string(),
            api_key: Some("k".into()),
            model: "gemini-2.5-flash".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn facts(id: u64) -> LeadFacts {
        LeadFacts {
            id,
            name: format!("Lead {id}"),
            staleness_days: 4,
            budget: 150_000,
            status_id: 100,
            task_count: 0,
            note_count: 1,
        }
    }

    fn envelope(text: &str) -> String {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}).to_string()
    }

    const PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

    #[tokio::test]
    async fn batch_parses_fenced_results_object() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", PATH)
            .match_header("x-goog-api-key", "k")
            .with_body(envelope(
                "```json\n{\"results\":[{\"lead_id\":1,\"risk_score\":60,\"risk_level\":\"HIGH\",\"priority\":\"MEDIUM\"}]}\n```",
            ))
            .create_async()
            .await;
        let out = scorer(&server.url()).score_batch(&[facts(1)]).await.unwrap();
        m.assert_async().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["risk_score"], 60);
    }

    #[tokio::test]
    async fn unparseable_batch_text_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_body(envelope("I could not score these leads"))
            .create_async()
            .await;
        let err = scorer(&server.url()).score_batch(&[facts(1)]).await.unwrap_err();
        assert!(matches!(err, LeadwatchError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;
        let err = scorer(&server.url()).score_batch(&[facts(1)]).await.unwrap_err();
        assert!(matches!(err, LeadwatchError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn quota_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"quota"}}"#)
            .create_async()
            .await;
        let err = scorer(&server.url()).score_batch(&[facts(1)]).await.unwrap_err();
        assert!(matches!(err, LeadwatchError::TransientUpstream { .. }));
    }

    #[tokio::test]
    async fn single_mode_returns_thought_and_memory() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_body(envelope(
                r#"{"risk_score":80,"risk_level":"CRITICAL","priority":"HIGH","action_needed":true,
                   "recommended_action":"create_task","reasoning":"silent",
                   "thought":"call today","memory":[{"key":"channel","insight":"phone"}]}"#,
            ))
            .create_async()
            .await;
        let out = scorer(&server.url())
            .score(&facts(3), &ScoringContext::default())
            .await
            .unwrap();
        assert_eq!(out.assessment.risk_level, RiskLevel::Critical);
        assert_eq!(out.thought.as_deref(), Some("call today"));
        assert_eq!(out.memory[0].key, "channel");
    }

    #[test]
    fn single_prompt_includes_memory_and_history() {
        let ctx = ScoringContext {
            memory: vec![("channel".into(), "phone".into())],
            history: vec![LeadScore {
                id: 1,
                lead_id: 3,
                score: 50,
                risk_level: RiskLevel::Medium,
                priority: Priority::Low,
                calculated_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            }],
        };
        let prompt = single_prompt(&facts(3), &ctx);
        assert!(prompt.contains("- channel: phone"));
        assert!(prompt.contains("2024-05-01: 50"));
    }

    #[test]
    fn batch_prompt_lists_every_lead_in_order() {
        let prompt = batch_prompt(&[facts(1), facts(2)]);
        let first = prompt.find("#1 ").unwrap();
        let second = prompt.find("#2 ").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Score these 2 leads"));
    }
}
