//! `POST /webhook/odoo` routing (§4.8 "Odoo routing").

use relay_core::{Message, Result, Variables};
use serde::Deserialize;
use serde_json::json;

use crate::pipeline::channel::gateway_protocol::PublishMessageRequest;

use super::server::GatewayState;

#[derive(Debug, Deserialize, Default)]
struct OdooPayload {
    action: Option<String>,
    task_id: Option<serde_json::Value>,
    process_instance_key: Option<serde_json::Value>,
    x_studio_camunda_process_instance_key: Option<serde_json::Value>,
}

fn non_empty(value: &Option<serde_json::Value>) -> Option<String> {
    let value = value.as_ref()?;
    let s = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// `true` if a message/cancellation was handled, `false` if the payload
/// didn't carry a correlation key at all (still answered 200).
pub async fn handle(state: &GatewayState, body: &[u8]) -> Result<bool> {
    let payload: OdooPayload = serde_json::from_slice(body).unwrap_or_default();

    let process_instance_key = non_empty(&payload.process_instance_key)
        .or_else(|| non_empty(&payload.x_studio_camunda_process_instance_key));
    let task_id = non_empty(&payload.task_id);

    let Some(correlation_key) = task_id.clone().or_else(|| process_instance_key.clone()) else {
        return Ok(false);
    };

    if payload.action.as_deref() == Some("cancel") {
        let Some(pik) = process_instance_key else {
            return Ok(false);
        };
        cancel_process_instance(state, &pik).await?;
        return Ok(true);
    }

    let vars = Variables::from_iter([
        ("task_id".to_string(), json!(task_id.unwrap_or_default())),
        ("process_instance_key".to_string(), json!(process_instance_key.unwrap_or_default())),
    ]);
    let message = Message::new("msg_odoo_task_done", correlation_key).with_variables(vars);

    let mut client = state.channel_factory.connect().await?;
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

    Ok(true)
}

async fn cancel_process_instance(state: &GatewayState, process_instance_key: &str) -> Result<()> {
    let url = format!("{}/v2/process-instances/{process_instance_key}/cancellation", state.config.engine.rest_address);

    let response = state
        .http
        .post(&url)
        .basic_auth("demo", Some("demo"))
        .send()
        .await
        .map_err(|e| relay_core::RelayError::Transient(format!("cancellation request: {e}")))?;

    if response.status().as_u16() == 404 {
        tracing::info!(process_instance_key, "process instance already terminated");
        return Ok(());
    }
    if !response.status().is_success() {
        return Err(relay_core::RelayError::Http {
            status: response.status().as_u16(),
            message: format!("cancellation of {process_instance_key} failed"),
        });
    }
    Ok(())
}
