//! Telegram bot: delivers through the Bot API `sendMessage` method.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::bots::{Bot, http_client};
use crate::config::Platform;
use crate::dispatch::Destination;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Outgoing Telegram bot.
pub struct TelegramBot {
    self_id: String,
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(self_id: String, bot_token: SecretString) -> Result<Self, ChannelError> {
        Ok(Self {
            self_id,
            bot_token,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: http_client()?,
        })
    }

    /// Point the bot at a different Bot API server (local bot API, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base.trim_end_matches('/'),
            self.bot_token.expose_secret()
        )
    }

    /// Send a text message, splitting it at Telegram's length limit.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single chunk as plain text.
    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&message_body(chat_id, text))
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("sendMessage returned {status}: {err}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Bot for TelegramBot {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send_message(
        &self,
        destination: &Destination,
        content: &str,
    ) -> Result<(), ChannelError> {
        // Private chats and groups share the chat_id namespace.
        self.send_text(destination.id(), content).await?;
        tracing::info!(destination = %destination, "Telegram message sent");
        Ok(())
    }

    /// Verify the token with `getMe`.
    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            tracing::warn!(status = %resp.status(), "Telegram getMe rejected");
            Err(ChannelError::HealthCheckFailed {
                name: format!("telegram:{}", self.self_id),
            })
        }
    }
}

/// `sendMessage` parameters. No `parse_mode`, so Telegram shows the text
/// exactly as rendered.
fn message_body(chat_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    })
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

/// Split a message into chunks that fit Telegram's length limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::test_server::serve_once;

    fn bot() -> TelegramBot {
        TelegramBot::new("relay".into(), SecretString::from("123:abc")).unwrap()
    }

    #[test]
    fn identifies_as_telegram() {
        let bot = bot();
        assert_eq!(bot.platform(), Platform::Telegram);
        assert_eq!(bot.self_id(), "relay");
    }

    #[test]
    fn api_url_embeds_token() {
        assert_eq!(
            bot().api_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(
            bot().with_api_base("http://localhost:8081/").api_url("getMe"),
            "http://localhost:8081/bot123:abc/getMe"
        );
    }

    #[test]
    fn message_body_has_no_parse_mode() {
        let body = message_body("-100", "a_b_c *bold*");
        assert_eq!(body["chat_id"], "-100");
        assert_eq!(body["text"], "a_b_c *bold*");
        assert!(body.get("parse_mode").is_none());
    }

    #[tokio::test]
    async fn sends_rendered_text_verbatim() {
        let (base, server) = serve_once("200 OK", r#"{"ok":true,"result":{}}"#).await;
        bot()
            .with_api_base(base)
            .send_message(&Destination::Group("-100".into()), "code a_b_c *x*")
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.head.starts_with("POST /bot123:abc/sendMessage "));
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["text"], "code a_b_c *x*");
        assert!(body.get("parse_mode").is_none());
    }

    #[tokio::test]
    async fn rejected_send_is_reported_once() {
        let (base, server) =
            serve_once("400 Bad Request", r#"{"ok":false,"description":"chat not found"}"#).await;
        let err = bot()
            .with_api_base(base)
            .send_message(&Destination::Private("42".into()), "hi")
            .await
            .unwrap_err();

        // A second POST would hit a closed listener instead.
        assert!(err.to_string().contains("chat not found"), "{err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn health_check_calls_get_me() {
        let (base, server) = serve_once("200 OK", r#"{"ok":true,"result":{}}"#).await;
        bot().with_api_base(base).health_check().await.unwrap();
        assert!(server.await.unwrap().head.starts_with("GET /bot123:abc/getMe "));

        let (base, _server) = serve_once("401 Unauthorized", r#"{"ok":false}"#).await;
        let err = bot().with_api_base(base).health_check().await.unwrap_err();
        assert!(matches!(err, ChannelError::HealthCheckFailed { .. }));
    }

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // Three bytes per char; 4096 is not a multiple of three.
        let msg = "验".repeat(2000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4095);
        assert_eq!(chunks.concat(), msg);
    }
}
