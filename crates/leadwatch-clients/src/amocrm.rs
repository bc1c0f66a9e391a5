//! amoCRM v4 REST client.
//!
//! List endpoints wrap their items in `_embedded` and answer `204 No
//! Content` when nothing matches.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use leadwatch_core::collab::CrmClient;
use leadwatch_core::config::CrmConfig;
use leadwatch_core::types::{
    Lead, LeadFilter, LeadPatch, NewTask, Note, Pipeline, PipelineStatus, Task,
};
use leadwatch_core::{LeadwatchError, Result};

use crate::error::ClientError;
use crate::http::{build_client, read_json, require_json, send_err, status_error};

const SERVICE: &str = "crm";
const PAGE_SIZE: u32 = 250;
/// Upper bound on pages fetched by one `list_leads` call.
const MAX_PAGES: u32 = 40;
/// amoCRM's generic "follow up" task type.
const TASK_TYPE_FOLLOW_UP: u64 = 1;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(rename = "_embedded")]
    embedded: T,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LeadsEmbedded {
    #[serde(default)]
    leads: Vec<AmoLead>,
}

#[derive(Debug, Deserialize)]
struct TasksEmbedded {
    #[serde(default)]
    tasks: Vec<AmoTask>,
}

#[derive(Debug, Deserialize)]
struct NotesEmbedded {
    #[serde(default)]
    notes: Vec<AmoNote>,
}

#[derive(Debug, Deserialize)]
struct PipelinesEmbedded {
    #[serde(default)]
    pipelines: Vec<AmoPipeline>,
}

#[derive(Debug, Deserialize)]
struct AmoLead {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    status_id: Option<u64>,
    #[serde(default)]
    pipeline_id: Option<u64>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

impl From<AmoLead> for Lead {
    fn from(a: AmoLead) -> Self {
        Lead {
            id: a.id,
            name: a.name.unwrap_or_default(),
            price: a.price.unwrap_or(0),
            status_id: a.status_id.unwrap_or(0),
            pipeline_id: a.pipeline_id.unwrap_or(0),
            created_at: a.created_at.unwrap_or(0),
            updated_at: a.updated_at.unwrap_or(0),
            tasks: vec![],
            notes: vec![],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AmoTask {
    id: u64,
    #[serde(default)]
    entity_id: Option<u64>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    complete_till: Option<i64>,
    #[serde(default)]
    is_completed: bool,
    #[serde(default)]
    created_at: Option<i64>,
}

impl From<AmoTask> for Task {
    fn from(a: AmoTask) -> Self {
        Task {
            id: a.id,
            entity_id: a.entity_id.unwrap_or(0),
            text: a.text.unwrap_or_default(),
            complete_till: a.complete_till.unwrap_or(0),
            is_completed: a.is_completed,
            created_at: a.created_at.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AmoNote {
    id: u64,
    #[serde(default)]
    params: Option<NoteParams>,
}

#[derive(Debug, Default, Deserialize)]
struct NoteParams {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AmoPipeline {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "_embedded", default)]
    embedded: Option<StatusesEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusesEmbedded {
    #[serde(default)]
    statuses: Vec<PipelineStatus>,
}

#[derive(Debug, Serialize)]
struct TaskBody<'a> {
    entity_id: u64,
    entity_type: &'static str,
    text: &'a str,
    complete_till: i64,
    task_type_id: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AmoCrmClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl AmoCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(LeadwatchError::ConfigurationMissing("crm.base_url".into()));
        }
        let token = config
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LeadwatchError::ConfigurationMissing("crm.access_token".into()))?;
        Ok(Self {
            http: build_client(SERVICE, config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Option<T>, ClientError> {
        debug!(path, "crm GET");
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        read_json(SERVICE, resp).await
    }

    async fn tasks(&self, query: &[(&str, String)]) -> Result<Vec<Task>> {
        let page: Option<Page<TasksEmbedded>> = self.get("/tasks", query).await?;
        Ok(page
            .map(|p| p.embedded.tasks.into_iter().map(Task::from).collect())
            .unwrap_or_default())
    }

    async fn notes(&self, lead_id: u64) -> Result<Vec<Note>> {
        let page: Option<Page<NotesEmbedded>> =
            self.get(&format!("/leads/{lead_id}/notes"), &[]).await?;
        Ok(page
            .map(|p| {
                p.embedded
                    .notes
                    .into_iter()
                    .map(|n| Note {
                        id: n.id,
                        text: n.params.unwrap_or_default().text.unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// The lead list endpoint carries no tasks; one open-task query fills them
/// in so the "no active task" rules see real data.
fn attach_open_tasks(leads: &mut [Lead], open: Vec<Task>) {
    let mut by_lead: HashMap<u64, Vec<Task>> = HashMap::new();
    for task in open {
        by_lead.entry(task.entity_id).or_default().push(task);
    }
    for lead in leads {
        if let Some(tasks) = by_lead.remove(&lead.id) {
            lead.tasks = tasks;
        }
    }
}

#[async_trait]
impl CrmClient for AmoCrmClient {
    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>> {
        let limit = filter.limit.unwrap_or(PAGE_SIZE).min(PAGE_SIZE);
        let mut leads = Vec::new();
        for page_no in 1..=MAX_PAGES {
            let mut query = vec![("limit", limit.to_string()), ("page", page_no.to_string())];
            if let Some(q) = &filter.query {
                query.push(("query", q.clone()));
            }
            let Some(page) = self.get::<Page<LeadsEmbedded>>("/leads", &query).await? else {
                break;
            };
            leads.extend(page.embedded.leads.into_iter().map(Lead::from));
            if filter.limit.is_some() || page.links.next.is_none() {
                break;
            }
        }
        if !leads.is_empty() {
            attach_open_tasks(&mut leads, self.list_open_tasks().await?);
        }
        debug!(count = leads.len(), "fetched leads");
        Ok(leads)
    }

    async fn get_lead_detail(&self, id: u64) -> Result<Lead> {
        let lead: Option<AmoLead> = match self.get(&format!("/leads/{id}"), &[]).await {
            Err(ClientError::Status { status: 404, .. }) => return Err(LeadwatchError::LeadNotFound(id)),
            other => other?,
        };
        let mut lead = Lead::from(lead.ok_or(LeadwatchError::LeadNotFound(id))?);
        lead.tasks = self.list_tasks(id).await?;
        lead.notes = self.notes(id).await?;
        Ok(lead)
    }

    async fn list_tasks(&self, lead_id: u64) -> Result<Vec<Task>> {
        self.tasks(&[
            ("filter[entity_id]", lead_id.to_string()),
            ("filter[entity_type]", "leads".to_string()),
        ])
        .await
    }

    async fn list_open_tasks(&self) -> Result<Vec<Task>> {
        self.tasks(&[
            ("filter[is_completed]", "0".to_string()),
            ("filter[entity_type]", "leads".to_string()),
            ("order[complete_till]", "asc".to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ])
        .await
    }

    async fn create_task(&self, lead_id: u64, task: &NewTask) -> Result<Task> {
        let body = [TaskBody {
            entity_id: lead_id,
            entity_type: "leads",
            text: &task.text,
            complete_till: task.complete_till,
            task_type_id: TASK_TYPE_FOLLOW_UP,
        }];
        let resp = self
            .http
            .post(self.url("/tasks"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        let page: Page<TasksEmbedded> = require_json(SERVICE, resp).await?;
        let id = page.embedded.tasks.first().map(|t| t.id).ok_or_else(|| {
            LeadwatchError::malformed(SERVICE, "task creation returned no task")
        })?;
        Ok(Task {
            id,
            entity_id: lead_id,
            text: task.text.clone(),
            complete_till: task.complete_till,
            is_completed: false,
            created_at: 0,
        })
    }

    async fn update_lead(&self, id: u64, patch: &LeadPatch) -> Result<Lead> {
        let resp = self
            .http
            .patch(self.url(&format!("/leads/{id}")))
            .bearer_auth(&self.token)
            .json(patch)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(LeadwatchError::LeadNotFound(id));
        }
        let lead: AmoLead = require_json(SERVICE, resp).await?;
        let mut lead = Lead::from(lead);
        if let Some(status) = patch.status_id {
            lead.status_id = status;
        }
        Ok(lead)
    }

    async fn add_note(&self, lead_id: u64, text: &str) -> Result<()> {
        let body = json!([{ "note_type": "common", "params": { "text": text } }]);
        let resp = self
            .http
            .post(self.url(&format!("/leads/{lead_id}/notes")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(send_err(SERVICE))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(SERVICE, status, &body).into());
        }
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let page: Option<Page<PipelinesEmbedded>> = self.get("/leads/pipelines", &[]).await?;
        Ok(page
            .map(|p| {
                p.embedded
                    .pipelines
                    .into_iter()
                    .map(|p| Pipeline {
                        id: p.id,
                        name: p.name,
                        statuses: p.embedded.unwrap_or_default().statuses,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadwatch_core::attention::needs_attention;
    use leadwatch_core::config::Thresholds;
    use mockito::Matcher;

    fn client(url: &str) -> AmoCrmClient {
        AmoCrmClient::new(&CrmConfig {
            base_url: url.to_string(),
            access_token: Some("secret".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn missing_token_is_configuration_missing() {
        let err = AmoCrmClient::new(&CrmConfig {
            base_url: "https://example.amocrm.ru".into(),
            access_token: None,
            timeout_secs: 5,
        })
        .err()
        .unwrap();
        assert!(matches!(err, LeadwatchError::ConfigurationMissing(ref k) if k == "crm.access_token"));
    }

    #[tokio::test]
    async fn list_leads_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let p1 = server
            .mock("GET", "/api/v4/leads")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .match_header("authorization", "Bearer secret")
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"_embedded":{"leads":[{"id":1,"name":"A","price":600000,"updated_at":10},
                    {"id":2,"name":"B","price":null}]},"_links":{"next":{"href":"x"}}}"#,
            )
            .create_async()
            .await;
        let p2 = server
            .mock("GET", "/api/v4/leads")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/tasks")
            .match_query(Matcher::Any)
            .with_status(204)
            .create_async()
            .await;

        let leads = client(&server.url()).list_leads(&LeadFilter::default()).await.unwrap();
        p1.assert_async().await;
        p2.assert_async().await;
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].price, 600_000);
        assert_eq!(leads[0].updated_at, 10);
        assert_eq!(leads[1].price, 0);
    }

    #[tokio::test]
    async fn listed_leads_carry_open_tasks() {
        let now = 1_700_000_000;
        let stale = now - 5 * 86_400;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/leads")
            .match_query(Matcher::Any)
            .with_body(format!(
                r#"{{"_embedded":{{"leads":[{{"id":1,"price":60000,"updated_at":{stale}}},
                    {{"id":2,"price":60000,"updated_at":{stale}}}]}}}}"#
            ))
            .create_async()
            .await;
        let tasks = server
            .mock("GET", "/api/v4/tasks")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("filter[is_completed]".into(), "0".into()),
                Matcher::UrlEncoded("filter[entity_type]".into(), "leads".into()),
            ]))
            .with_body(r#"{"_embedded":{"tasks":[{"id":3,"entity_id":1,"text":"Call","is_completed":false}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let leads = client(&server.url()).list_leads(&LeadFilter::default()).await.unwrap();
        tasks.assert_async().await;
        assert!(leads[0].has_active_task());
        assert!(!leads[1].has_active_task());

        let t = Thresholds::default();
        assert!(!needs_attention(&leads[0], now, &t));
        assert!(needs_attention(&leads[1], now, &t));
    }

    #[tokio::test]
    async fn lead_detail_attaches_tasks_and_notes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/leads/7")
            .with_body(r#"{"id":7,"name":"Acme","price":150000,"status_id":5,"updated_at":100}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/tasks")
            .match_query(Matcher::UrlEncoded("filter[entity_id]".into(), "7".into()))
            .with_body(r#"{"_embedded":{"tasks":[{"id":3,"entity_id":7,"text":"Call","is_completed":false}]}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/leads/7/notes")
            .with_body(r#"{"_embedded":{"notes":[{"id":9,"params":{"text":"hi"}},{"id":10}]}}"#)
            .create_async()
            .await;

        let lead = client(&server.url()).get_lead_detail(7).await.unwrap();
        assert_eq!(lead.name, "Acme");
        assert_eq!(lead.tasks.len(), 1);
        assert!(lead.has_active_task());
        assert_eq!(lead.notes.iter().map(|n| n.text.as_str()).collect::<Vec<_>>(), vec!["hi", ""]);
    }

    #[tokio::test]
    async fn unknown_lead_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/leads/404")
            .with_status(404)
            .create_async()
            .await;
        let err = client(&server.url()).get_lead_detail(404).await.unwrap_err();
        assert!(matches!(err, LeadwatchError::LeadNotFound(404)));
    }

    #[tokio::test]
    async fn create_task_posts_array_body() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/v4/tasks")
            .match_body(Matcher::Json(json!([{
                "entity_id": 7, "entity_type": "leads", "text": "Call back",
                "complete_till": 500, "task_type_id": 1
            }])))
            .with_body(r#"{"_embedded":{"tasks":[{"id":42}]}}"#)
            .create_async()
            .await;
        let task = client(&server.url())
            .create_task(
                7,
                &NewTask {
                    text: "Call back".into(),
                    complete_till: 500,
                },
            )
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(task.id, 42);
        assert_eq!(task.entity_id, 7);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/leads/7/notes")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let err = client(&server.url()).add_note(7, "x").await.unwrap_err();
        assert!(matches!(err, LeadwatchError::TransientUpstream { .. }));
    }

    #[tokio::test]
    async fn no_content_means_empty_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/tasks")
            .match_query(Matcher::Any)
            .with_status(204)
            .create_async()
            .await;
        assert!(client(&server.url()).list_open_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pipelines_carry_statuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/leads/pipelines")
            .with_body(
                r#"{"_embedded":{"pipelines":[{"id":1,"name":"Sales",
                    "_embedded":{"statuses":[{"id":142,"name":"Won"}]}}]}}"#,
            )
            .create_async()
            .await;
        let pipelines = client(&server.url()).list_pipelines().await.unwrap();
        assert_eq!(pipelines[0].statuses[0].id, 142);
    }
}
