//! OneBot v11 bot: delivers through the HTTP API of a OneBot implementation.
//!
//! Groups go to `send_group_msg`, private destinations to `send_private_msg`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::bots::{Bot, http_client};
use crate::config::Platform;
use crate::dispatch::Destination;
use crate::error::ChannelError;

/// Outgoing OneBot bot.
pub struct OneBot {
    self_id: String,
    endpoint: String,
    access_token: Option<SecretString>,
    client: reqwest::Client,
}

/// Response envelope shared by every OneBot action.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    status: String,
    retcode: i64,
    #[serde(default)]
    message: Option<String>,
}

impl OneBot {
    pub fn new(
        self_id: String,
        endpoint: String,
        access_token: Option<SecretString>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            self_id,
            endpoint,
            access_token,
            client: http_client()?,
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/{action}", self.endpoint.trim_end_matches('/'))
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let mut request = self.client.post(self.action_url(action)).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("{action} returned {status}: {err}")));
        }

        let envelope: ActionResponse = resp
            .json()
            .await
            .map_err(|e| send_failed(format!("{action} response unreadable: {e}")))?;
        check_envelope(action, &envelope)
    }
}

#[async_trait]
impl Bot for OneBot {
    fn platform(&self) -> Platform {
        Platform::Onebot
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send_message(
        &self,
        destination: &Destination,
        content: &str,
    ) -> Result<(), ChannelError> {
        let (action, body) = action_for(destination, content);
        self.call(action, body).await?;
        tracing::info!(destination = %destination, "OneBot message sent");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.call("get_status", serde_json::json!({}))
            .await
            .map_err(|e| {
                tracing::warn!("OneBot get_status failed: {e}");
                ChannelError::HealthCheckFailed {
                    name: format!("onebot:{}", self.self_id),
                }
            })
    }
}

/// Pick the action and build its parameters.
fn action_for(destination: &Destination, content: &str) -> (&'static str, serde_json::Value) {
    let id = numeric_or_string(destination.id());
    match destination {
        Destination::Group(_) => (
            "send_group_msg",
            serde_json::json!({ "group_id": id, "message": content, "auto_escape": true }),
        ),
        Destination::Private(_) => (
            "send_private_msg",
            serde_json::json!({ "user_id": id, "message": content, "auto_escape": true }),
        ),
    }
}

/// OneBot ids are integers; keep anything else as given.
fn numeric_or_string(id: &str) -> serde_json::Value {
    id.parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::from(id))
}

fn check_envelope(action: &str, envelope: &ActionResponse) -> Result<(), ChannelError> {
    if envelope.retcode == 0 && envelope.status != "failed" {
        return Ok(());
    }
    Err(send_failed(format!(
        "{action} failed with retcode {}: {}",
        envelope.retcode,
        envelope.message.as_deref().unwrap_or("no message")
    )))
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "onebot".into(),
        reason,
    }
}
