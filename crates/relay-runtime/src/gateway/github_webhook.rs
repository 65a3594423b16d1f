//! `POST /webhook/github` routing (§4.8 "GitHub routing").

use relay_core::{Message, Result, Variables};
use serde::Deserialize;
use serde_json::json;

use crate::pipeline::channel::gateway_protocol::PublishMessageRequest;
use crate::pipeline::channel::ChannelFactory;

use super::server::GatewayState;

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    number: i64,
    pull_request: PullRequest,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    title: String,
    html_url: String,
    head: Ref,
    base: Ref,
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct Ref {
    #[serde(rename = "ref")]
    r#ref: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

/// Every configured server's settings flattened under `<name>_host`,
/// `<name>_ssh_user`, `<name>_ssh_port`, `<name>_repo_dir`, `<name>_db_name`,
/// `<name>_container`, `<name>_port` (§4.8).
fn flatten_servers(state: &GatewayState, vars: &mut Variables) {
    for (name, server) in state.config.servers.iter() {
        vars.insert(format!("{name}_host"), json!(server.host));
        vars.insert(format!("{name}_ssh_user"), json!(server.ssh_user));
        vars.insert(format!("{name}_ssh_port"), json!(server.ssh_port));
        vars.insert(format!("{name}_repo_dir"), json!(server.repo_dir));
        vars.insert(format!("{name}_db_name"), json!(server.db_name));
        vars.insert(format!("{name}_container"), json!(server.container));
        vars.insert(format!("{name}_port"), json!(server.port));
    }
}

async fn publish(factory: &ChannelFactory, message: Message) -> Result<()> {
    let mut client = factory.connect().await?;
    let payload = serde_json::to_string(&message.variables).unwrap_or_else(|_| "{}".to_string());
    client
        .publish_message(PublishMessageRequest {
            name: message.name.clone(),
            correlation_key: message.correlation_key,
            time_to_live: 60_000,
            message_id: String::new(),
            variables: payload,
        })
        .await
        .map_err(|e| relay_core::RelayError::Transient(format!("publish_message {}: {e}", message.name)))?;
    Ok(())
}

/// Returns `Ok(true)` if a message was published, `Ok(false)` if the event
/// was intentionally ignored (still a 200 so GitHub does not retry).
pub async fn handle(state: &GatewayState, body: &[u8]) -> Result<bool> {
    let event: PullRequestEvent = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(_) => return Ok(false),
    };

    if event.pull_request.base.r#ref != "staging" {
        return Ok(false);
    }

    match event.action.as_str() {
        "opened" | "reopened" | "ready_for_review" => {
            let mut vars = Variables::from_iter([
                ("pr_number".to_string(), json!(event.number)),
                ("pr_title".to_string(), json!(event.pull_request.title)),
                ("pr_url".to_string(), json!(event.pull_request.html_url)),
                ("head_branch".to_string(), json!(event.pull_request.head.r#ref)),
                ("base_branch".to_string(), json!(event.pull_request.base.r#ref)),
                ("repository".to_string(), json!(event.repository.full_name)),
                ("is_draft".to_string(), json!(event.pull_request.draft)),
            ]);
            flatten_servers(state, &mut vars);

            let message = Message::new("msg_pr_event", &event.pull_request.head.r#ref).with_variables(vars);
            publish(&state.channel_factory, message).await?;
            Ok(true)
        }
        "synchronize" => {
            let vars = Variables::from_iter([("pr_number".to_string(), json!(event.number))]);
            let message = Message::new("msg_pr_updated", event.number.to_string()).with_variables(vars);
            publish(&state.channel_factory, message).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
