//! HTTP task store client
//!
//! Speaks a narrow JSON protocol against the shared store service. The
//! service is expected to apply patches atomically per record, evaluate the
//! conditional update server-side, answer 404 for unknown records, and 409
//! for ingest-key collisions. Bearer-token auth; the token comes from the
//! environment, never the config file.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::StoreConfig;
use crate::error::{DroverError, DroverResult};
use crate::store::{RuleUpdate, StoreError, StoreResult, TaskFilter, TaskPatch, TaskStore};
use crate::types::{
    Episode, EpisodeDraft, EpisodeId, Rule, RuleDraft, RuleId, Task, TaskId, TaskStatus,
    ThreadMessage,
};

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdatedResponse {
    updated: bool,
}

/// [`TaskStore`] implementation backed by the shared store service.
pub struct HttpStore {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpStore {
    /// Build a client from configuration. The bearer token is read from the
    /// environment variable named in `config.auth_token_env`; absence means
    /// unauthenticated requests, which a production store will reject.
    pub fn new(config: &StoreConfig) -> DroverResult<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| DroverError::config("store.base_url is required for the http backend"))?;
        let auth_token = std::env::var(&config.auth_token_env)
            .ok()
            .filter(|token| !token.is_empty());
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| DroverError::config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.http.request(method, self.endpoint(path));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    /// Send a request and decode a JSON body, mapping protocol statuses to
    /// the store error taxonomy.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> StoreResult<T> {
        let response = request
            .send()
            .await
            .map_err(|error| StoreError::Unavailable(format!("{context}: {error}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(context.to_string())),
            StatusCode::CONFLICT => Err(StoreError::DuplicateKey(context.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                Err(StoreError::Protocol(format!(
                    "{context}: {status}: {snippet}"
                )))
            }
            _ => response.json::<T>().await.map_err(|error| {
                StoreError::Protocol(format!("{context}: invalid response body: {error}"))
            }),
        }
    }

    /// Like [`send`](Self::send) for endpoints that answer with no body.
    async fn send_unit(&self, request: RequestBuilder, context: &str) -> StoreResult<()> {
        let response = request
            .send()
            .await
            .map_err(|error| StoreError::Unavailable(format!("{context}: {error}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(context.to_string())),
            StatusCode::CONFLICT => Err(StoreError::DuplicateKey(context.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                Err(StoreError::Protocol(format!(
                    "{context}: {status}: {snippet}"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TaskStore for HttpStore {
    async fn get_task(&self, id: &TaskId) -> StoreResult<Task> {
        let path = format!("/tasks/{id}");
        self.send(self.request(Method::GET, &path), &format!("get task {id}"))
            .await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        self.send(
            self.request(Method::POST, "/tasks/query").json(filter),
            "list tasks",
        )
        .await
    }

    async fn create_task(&self, task: Task) -> StoreResult<TaskId> {
        let response: IdResponse = self
            .send(
                self.request(Method::POST, "/tasks").json(&task),
                "create task",
            )
            .await?;
        Ok(TaskId::from(response.id))
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<()> {
        let path = format!("/tasks/{id}/patch");
        self.send_unit(
            self.request(Method::POST, &path).json(&patch),
            &format!("patch task {id}"),
        )
        .await
    }

    async fn update_task_if_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        patch: TaskPatch,
    ) -> StoreResult<bool> {
        let path = format!("/tasks/{id}/claim");
        let body = json!({ "expected": expected, "patch": patch });
        let response: UpdatedResponse = self
            .send(
                self.request(Method::POST, &path).json(&body),
                &format!("conditional update of task {id}"),
            )
            .await?;
        Ok(response.updated)
    }

    async fn list_thread_messages(&self, task_id: &TaskId) -> StoreResult<Vec<ThreadMessage>> {
        let path = format!("/tasks/{task_id}/messages");
        self.send(
            self.request(Method::GET, &path),
            &format!("list messages of task {task_id}"),
        )
        .await
    }

    async fn record_episode(&self, draft: EpisodeDraft) -> StoreResult<EpisodeId> {
        let response: IdResponse = self
            .send(
                self.request(Method::POST, "/episodes").json(&draft),
                "record episode",
            )
            .await?;
        Ok(EpisodeId::from(response.id))
    }

    async fn mark_feedback_processed(&self, task_id: &TaskId) -> StoreResult<()> {
        let path = format!("/tasks/{task_id}/feedback-processed");
        self.send_unit(
            self.request(Method::POST, &path),
            &format!("mark feedback processed on task {task_id}"),
        )
        .await
    }

    async fn list_undistilled_episodes(&self) -> StoreResult<Vec<Episode>> {
        self.send(
            self.request(Method::GET, "/episodes/undistilled"),
            "list undistilled episodes",
        )
        .await
    }

    async fn mark_episodes_distilled(&self, ids: &[EpisodeId]) -> StoreResult<()> {
        let body = json!({ "ids": ids });
        self.send_unit(
            self.request(Method::POST, "/episodes/distilled").json(&body),
            "mark episodes distilled",
        )
        .await
    }

    async fn create_rule(&self, draft: RuleDraft) -> StoreResult<RuleId> {
        let response: IdResponse = self
            .send(
                self.request(Method::POST, "/rules").json(&draft),
                "create rule",
            )
            .await?;
        Ok(RuleId::from(response.id))
    }

    async fn update_rule(&self, id: &RuleId, update: RuleUpdate) -> StoreResult<()> {
        let path = format!("/rules/{id}/patch");
        self.send_unit(
            self.request(Method::POST, &path).json(&update),
            &format!("patch rule {id}"),
        )
        .await
    }

    async fn list_active_rules(&self) -> StoreResult<Vec<Rule>> {
        self.send(self.request(Method::GET, "/rules/active"), "list rules")
            .await
    }
}
