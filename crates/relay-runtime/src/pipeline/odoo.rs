//! C4: Odoo webhook client (§4.4).

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use relay_core::{RelayError, Result};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Fields a handler may set when creating an Odoo `project.task` via webhook.
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub name: String,
    pub description: Option<String>,
    pub assignee_id: Option<i64>,
    pub process_instance_key: Option<i64>,
    pub element_instance_key: Option<i64>,
    pub bpmn_process_id: Option<String>,
    pub create_process: Option<bool>,
}

/// Webhook client with no internal retry/backoff loop of its own — callers
/// that need retry wrap calls with `relay_core::retry` (§4.4).
#[derive(Clone)]
pub struct OdooClient {
    http: Client,
    webhook_url: String,
    project_id: i64,
}

impl OdooClient {
    pub fn new(webhook_url: impl Into<String>, project_id: i64) -> Self {
        Self {
            http: Client::builder()
                .timeout(TIMEOUT)
                .build()
                .expect("reqwest client builder"),
            webhook_url: webhook_url.into(),
            project_id,
        }
    }

    /// Create a `project.task` and return the created record id.
    pub async fn create_task(&self, request: TaskRequest) -> Result<i64> {
        let mut body = json!({
            "_model": "project.project",
            "_id": self.project_id,
            "name": request.name,
        });

        if let Some(description) = request.description {
            body["description"] = json!(description);
        }
        if let Some(assignee_id) = request.assignee_id {
            body["x_studio_camunda_user_ids"] = json!(assignee_id);
        }
        if let Some(key) = request.process_instance_key {
            body["process_instance_key"] = json!(key);
        }
        if let Some(key) = request.element_instance_key {
            body["element_instance_key"] = json!(key);
        }
        if let Some(id) = request.bpmn_process_id {
            body["bpmn_process_id"] = json!(id);
        }
        if let Some(create_process) = request.create_process {
            body["create_process"] = json!(create_process);
        }

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("odoo webhook post: {e}")))?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Transient(format!("odoo response decode: {e}")))?;

        data.get("id")
            .or_else(|| data.get("task_id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::Validation("odoo response missing id/task_id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_task_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
            .mount(&server)
            .await;

        let client = OdooClient::new(format!("{}/webhook", server.uri()), 7);
        let id = client
            .create_task(TaskRequest {
                name: "deploy failed".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, 42);
    }

    #[tokio::test]
    async fn falls_back_to_task_id_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": 9})))
            .mount(&server)
            .await;

        let client = OdooClient::new(server.uri(), 1);
        let id = client
            .create_task(TaskRequest {
                name: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, 9);
    }

    #[tokio::test]
    async fn error_status_raises_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = OdooClient::new(server.uri(), 1);
        let result = client
            .create_task(TaskRequest {
                name: "x".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(RelayError::Http { status: 500, .. })));
    }
}
