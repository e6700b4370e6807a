//! Telegram Bot API transport

use super::{ChatTransport, EventSource, InboundEvent, OutgoingMessage, TransportError};
use crate::state_machine::{Command, Event};
use crate::store::{ChatId, MessageId};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Extra time allowed on top of the long-poll timeout before the HTTP
/// request itself is abandoned
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Telegram transport over the HTTPS Bot API
pub struct TelegramTransport {
    client: Client,
    base_url: String,
    poll_timeout: Duration,
    /// Next `getUpdates` offset (last seen `update_id` + 1)
    next_offset: AtomicI64,
    /// Filled in by `identify`; commands addressed to other bots are ignored
    bot_username: String,
}

impl TelegramTransport {
    pub fn new(token: &str, api_base: &str, poll_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(poll_timeout + POLL_GRACE)
            .build()
            .map_err(|e| TransportError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
            poll_timeout,
            next_offset: AtomicI64::new(0),
            bot_username: String::new(),
        })
    }

    /// Look up this bot's username with `getMe`. Also checks the token.
    pub async fn identify(&mut self) -> Result<&str, TransportError> {
        let me: TgUser = self.call("getMe", &serde_json::json!({})).await?;
        self.bot_username = me.username.ok_or_else(|| {
            TransportError::invalid_request("getMe: account has no username")
        })?;
        Ok(&self.bot_username)
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(params)
            .send()
            .await
            .map_err(|e| {
                // The URL carries the bot token; keep it out of errors and logs
                let e = e.without_url();
                if e.is_timeout() {
                    TransportError::network(format!("{method}: request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::network(format!("{method}: connection failed: {e}"))
                } else {
                    TransportError::unknown(format!("{method}: request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TransportError::network(format!("{method}: failed to read response: {}", e.without_url()))
        })?;

        decode_response(method, status.as_u16(), &body)
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, TransportError> {
        let request = SendMessageRequest::from_outgoing(chat, message);
        let sent: TgMessage = self.call("sendMessage", &request).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        let request = DeleteMessageRequest {
            chat_id: chat.0,
            message_id: message_id.0,
        };
        let _: bool = self.call("deleteMessage", &request).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for TelegramTransport {
    async fn next_batch(&self) -> Result<Vec<InboundEvent>, TransportError> {
        let request = GetUpdatesRequest {
            offset: self.next_offset.load(Ordering::SeqCst),
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let updates: Vec<Update> = self.call("getUpdates", &request).await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_offset.fetch_max(last + 1, Ordering::SeqCst);
        }

        Ok(updates
            .into_iter()
            .filter_map(|u| u.into_event(&self.bot_username))
            .collect())
    }
}

/// Decode a Bot API envelope, classifying failures
fn decode_response<R: DeserializeOwned>(
    method: &str,
    status: u16,
    body: &str,
) -> Result<R, TransportError> {
    let envelope: ApiResponse<R> = serde_json::from_str(body).map_err(|e| {
        if (200..300).contains(&status) {
            TransportError::unknown(format!("{method}: failed to parse response: {e}"))
        } else {
            classify_error(method, status, body, None)
        }
    })?;

    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            error_code,
            description,
            parameters,
            ..
        } => {
            let code = error_code.unwrap_or(status);
            let description = description.unwrap_or_else(|| "no description".to_string());
            let retry_after = parameters.and_then(|p| p.retry_after).map(Duration::from_secs);
            Err(classify_error(method, code, &description, retry_after))
        }
    }
}

fn classify_error(
    method: &str,
    code: u16,
    description: &str,
    retry_after: Option<Duration>,
) -> TransportError {
    let message = format!("{method}: {description}");
    let err = match code {
        401 | 403 => TransportError::auth(message),
        404 => TransportError::not_found(message),
        400 if description.to_ascii_lowercase().contains("not found") => {
            TransportError::not_found(message)
        }
        400 => TransportError::invalid_request(message),
        429 => TransportError::rate_limit(message),
        500..=599 => TransportError::server_error(message),
        _ => TransportError::unknown(format!("{method}: HTTP {code}: {description}")),
    };
    match retry_after {
        Some(duration) => err.with_retry_after(duration),
        None => err,
    }
}

// Bot API types

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_parameters: Option<ReplyParameters>,
}

impl<'a> SendMessageRequest<'a> {
    fn from_outgoing(chat: ChatId, message: &'a OutgoingMessage) -> Self {
        Self {
            chat_id: chat.0,
            text: &message.text,
            parse_mode: message.markdown.then_some("Markdown"),
            disable_notification: message.silent,
            reply_parameters: message.reply_to.map(|id| ReplyParameters {
                message_id: id.0,
                allow_sending_without_reply: true,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplyParameters {
    message_id: i64,
    allow_sending_without_reply: bool,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

impl Update {
    /// Text messages become events; everything else is dropped
    fn into_event(self, bot_username: &str) -> Option<InboundEvent> {
        let message = self.message?;
        let text = message.text?;
        let message_id = MessageId(message.message_id);

        let event = match Command::parse(&text, bot_username) {
            Some(command) => Event::Command {
                command,
                message_id,
            },
            None => Event::ReplyMessage {
                message_id,
                replied_to: message.reply_to_message.map(|m| MessageId(m.message_id)),
                text,
            },
        };

        Some(InboundEvent {
            chat: ChatId(message.chat.id),
            event,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    text: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    username: Option<String>,
}
