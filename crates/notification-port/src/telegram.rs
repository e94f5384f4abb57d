//! Telegram Bot API transport.
//!
//! Inbound commands come from `getUpdates` long polling; the update offset
//! is advanced past every update returned, which acknowledges it on the
//! next poll so no command is handed out twice.

use crate::port::parse_bind_command;
use crate::{BindCommand, NotificationPort, TransportError, TransportResult};
use async_trait::async_trait;
use identity_store::ChatId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Extra time on top of the long-poll window before the HTTP request is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Timeout for a single `sendMessage` call.
const SEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for the Telegram transport.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: Url,
    pub token: String,
    pub poll_timeout: Duration,
}

/// Telegram Bot API client.
pub struct TelegramTransport {
    http_client: reqwest::Client,
    api_url: Url,
    token: String,
    poll_timeout: Duration,
    next_offset: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: config.api_url,
            token: config.token,
            poll_timeout: config.poll_timeout,
            next_offset: AtomicI64::new(0),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> TransportResult<T> {
        let status = response.status();
        let body = response.text().await?;
        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|err| {
            TransportError::Decode(format!("HTTP {}: {}", status.as_u16(), err))
        })?;
        into_result(parsed)
    }
}

fn into_result<T>(response: ApiResponse<T>) -> TransportResult<T> {
    match (response.ok, response.result) {
        (true, Some(result)) => Ok(result),
        (true, None) => Err(TransportError::Decode(
            "response marked ok without a result".to_string(),
        )),
        (false, _) => Err(TransportError::Api {
            code: response.error_code,
            description: response
                .description
                .unwrap_or_else(|| "no description".to_string()),
        }),
    }
}

/// Keep `/start` messages, drop everything else. Returns the next offset.
fn collect_bind_commands(updates: Vec<Update>, current_offset: i64) -> (Vec<BindCommand>, i64) {
    let mut next_offset = current_offset;
    let mut commands = Vec::new();

    for update in updates {
        next_offset = next_offset.max(update.update_id + 1);
        let Some(message) = update.message else {
            continue;
        };
        let is_bind = message.text.as_deref().is_some_and(parse_bind_command);
        if !is_bind {
            debug!(
                update_id = update.update_id,
                chat_id = message.chat.id,
                "Ignoring non-bind message"
            );
            continue;
        }
        commands.push(BindCommand {
            label: message.chat.username,
            identity: ChatId(message.chat.id),
        });
    }

    (commands, next_offset)
}

#[async_trait]
impl NotificationPort for TelegramTransport {
    async fn send(&self, identity: ChatId, text: &str) -> TransportResult<()> {
        let response = self
            .http_client
            .post(self.method_url("sendMessage"))
            .timeout(SEND_REQUEST_TIMEOUT)
            .json(&SendMessageRequest {
                chat_id: identity.get(),
                text,
            })
            .send()
            .await?;

        let _: serde_json::Value = Self::decode(response).await?;
        debug!(chat_id = %identity, "Message delivered");
        Ok(())
    }

    async fn poll_commands(&self) -> TransportResult<Vec<BindCommand>> {
        let offset = self.next_offset.load(Ordering::Acquire);
        let mut query = vec![
            ("timeout", self.poll_timeout.as_secs().to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if offset > 0 {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .http_client
            .get(self.method_url("getUpdates"))
            .timeout(self.poll_timeout + POLL_GRACE)
            .query(&query)
            .send()
            .await?;

        let updates: Vec<Update> = Self::decode(response).await?;
        let update_count = updates.len();
        let (commands, next_offset) = collect_bind_commands(updates, offset);
        self.next_offset.store(next_offset, Ordering::Release);

        if update_count > 0 {
            info!(
                updates = update_count,
                bind_commands = commands.len(),
                next_offset,
                "Received Telegram updates"
            );
        }
        Ok(commands)
    }
}
