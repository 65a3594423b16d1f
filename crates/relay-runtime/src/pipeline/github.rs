//! C4: GitHub REST/GraphQL client (§4.4).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use relay_core::{RelayError, Result};

const API_BASE: &str = "https://api.github.com";
const TIMEOUT: Duration = Duration::from_secs(30);

/// Async GitHub client with two credentials: a regular token used for reads,
/// comments and merges, and a "deploy" token used only for PR *creation*
/// (policy: the regular token must not be able to open PRs).
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    token: String,
    deploy_pat: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, deploy_pat: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(TIMEOUT)
                .build()
                .expect("reqwest client builder"),
            token: token.into(),
            deploy_pat: deploy_pat.into(),
        }
    }

    fn bearer(&self, use_deploy_pat: bool) -> String {
        let token = if use_deploy_pat && !self.deploy_pat.is_empty() {
            &self.deploy_pat
        } else {
            &self.token
        };
        format!("Bearer {token}")
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        use_deploy_pat: bool,
        body: Option<Value>,
        query: Option<&[(&str, &str)]>,
    ) -> Result<Value> {
        let mut req = self
            .http
            .request(method, url)
            .header("Authorization", self.bearer(use_deploy_pat))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(body) = body {
            req = req.json(&body);
        }
        if let Some(query) = query {
            req = req.query(query);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("github request: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        resp.json()
            .await
            .map_err(|e| RelayError::Transient(format!("github response decode: {e}")))
    }

    pub async fn get_pr(&self, repo: &str, pr_number: u64) -> Result<Value> {
        let url = format!("{API_BASE}/repos/{repo}/pulls/{pr_number}");
        self.request(reqwest::Method::GET, &url, false, None, None)
            .await
    }

    pub async fn merge_pr(
        &self,
        repo: &str,
        pr_number: u64,
        method: &str,
        commit_title: Option<&str>,
    ) -> Result<Value> {
        let url = format!("{API_BASE}/repos/{repo}/pulls/{pr_number}/merge");
        let mut body = json!({ "merge_method": method });
        if let Some(title) = commit_title {
            body["commit_title"] = json!(title);
        }
        self.request(reqwest::Method::PUT, &url, false, Some(body), None)
            .await
    }

    pub async fn comment_pr(&self, repo: &str, pr_number: u64, body: &str) -> Result<Value> {
        let url = format!("{API_BASE}/repos/{repo}/issues/{pr_number}/comments");
        self.request(
            reqwest::Method::POST,
            &url,
            false,
            Some(json!({ "body": body })),
            None,
        )
        .await
    }

    pub async fn create_pr(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<Value> {
        let url = format!("{API_BASE}/repos/{repo}/pulls");
        self.request(
            reqwest::Method::POST,
            &url,
            true,
            Some(json!({
                "head": head,
                "base": base,
                "title": title,
                "body": body,
                "draft": draft,
            })),
            None,
        )
        .await
    }

    /// Mark a draft PR ready for review via the GraphQL mutation
    /// `markPullRequestReadyForReview`, after resolving its `node_id` (§4.4).
    pub async fn mark_pr_ready(&self, repo: &str, pr_number: u64) -> Result<Value> {
        let pr = self.get_pr(repo, pr_number).await?;
        let node_id = pr
            .get("node_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Validation(format!("PR #{pr_number} has no node_id")))?;

        let query = r#"
            mutation($pullRequestId: ID!) {
                markPullRequestReadyForReview(input: {pullRequestId: $pullRequestId}) {
                    pullRequest { number }
                }
            }
        "#;

        self.request(
            reqwest::Method::POST,
            &format!("{API_BASE}/graphql"),
            false,
            Some(json!({
                "query": query,
                "variables": { "pullRequestId": node_id },
            })),
            None,
        )
        .await
    }

    /// Find the most recent comment on the PR authored by `bot_login` whose
    /// body mentions "score" or "review" (§4.4).
    pub async fn get_bot_review_comment(
        &self,
        repo: &str,
        pr_number: u64,
        bot_login: &str,
    ) -> Result<Option<Value>> {
        let url = format!("{API_BASE}/repos/{repo}/issues/{pr_number}/comments");
        let comments = self
            .request(
                reqwest::Method::GET,
                &url,
                false,
                None,
                Some(&[("per_page", "100"), ("sort", "created"), ("direction", "desc")]),
            )
            .await?;

        let Some(comments) = comments.as_array() else {
            return Ok(None);
        };

        for comment in comments {
            let user = comment.get("user").cloned().unwrap_or(Value::Null);
            let login = user.get("login").and_then(Value::as_str).unwrap_or("");
            let is_bot = user.get("type").and_then(Value::as_str) == Some("Bot");
            if login == bot_login || is_bot {
                let body = comment.get("body").and_then(Value::as_str).unwrap_or("");
                let lower = body.to_lowercase();
                if lower.contains("score") || lower.contains("review") {
                    return Ok(Some(comment.clone()));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> (GitHubClient, String) {
        (GitHubClient::new("tok", "deploy-tok"), server.uri())
    }

    #[tokio::test]
    async fn error_status_raises_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/app/pulls/1"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let client = GitHubClient::new("tok", "");
        let url = format!("{}/repos/acme/app/pulls/1", server.uri());
        let result = client
            .request(reqwest::Method::GET, &url, false, None, None)
            .await;
        match result {
            Err(RelayError::Http { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_content_status_yields_null() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = GitHubClient::new("tok", "");
        let url = format!("{}/repos/acme/app/pulls/1/merge", server.uri());
        let result = client
            .request(reqwest::Method::PUT, &url, false, None, None)
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn create_pr_uses_deploy_pat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/app/pulls"))
            .and(header("Authorization", "Bearer deploy-tok"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"number": 7})))
            .mount(&server)
            .await;

        let (client, base) = client_for(&server).await;
        let url = format!("{base}/repos/acme/app/pulls");
        let result = client
            .request(
                reqwest::Method::POST,
                &url,
                true,
                Some(json!({"head":"h","base":"b","title":"t","body":"","draft":false})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result["number"], 7);
    }

    #[tokio::test]
    async fn get_bot_review_comment_filters_by_keyword() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/app/issues/1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"user": {"login": "someone"}, "body": "looks fine"},
                {"user": {"login": "review-bot", "type": "Bot"}, "body": "Score: 8/10"},
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new("tok", "");
        let url = format!("{}/repos/acme/app/issues/1/comments", server.uri());
        let comments = client
            .request(
                reqwest::Method::GET,
                &url,
                false,
                None,
                Some(&[("per_page", "100"), ("sort", "created"), ("direction", "desc")]),
            )
            .await
            .unwrap();
        let comments = comments.as_array().unwrap();
        let found = comments.iter().find(|c| {
            let body = c.get("body").and_then(Value::as_str).unwrap_or("");
            body.to_lowercase().contains("score")
        });
        assert!(found.is_some());
    }
}
