//! Chat platform transport abstraction
//!
//! The runtime only needs three primitives from the platform: send a
//! message, delete a message, and receive inbound events. Everything else
//! about the platform lives behind these traits.

mod error;
pub mod telegram;

pub use error::{TransportError, TransportErrorKind};
pub use telegram::TelegramTransport;

use crate::state_machine::Event;
use crate::store::{ChatId, MessageId};
use async_trait::async_trait;
use std::sync::Arc;

/// A message to be posted into a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    /// Deliver without a notification
    pub silent: bool,
    /// Interpret `text` as Markdown
    pub markdown: bool,
    /// Reply to this message in the same conversation
    pub reply_to: Option<MessageId>,
}

impl OutgoingMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            silent: false,
            markdown: false,
            reply_to: None,
        }
    }

    pub fn markdown(mut self) -> Self {
        self.markdown = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// An inbound event, addressed to one conversation
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat: ChatId,
    pub event: Event,
}

/// Outbound chat primitives
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post a message, returning the platform's id for it
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, TransportError>;

    /// Remove a message. Fails if it is already gone or cannot be deleted.
    async fn delete_message(&self, chat: ChatId, message_id: MessageId)
        -> Result<(), TransportError>;
}

/// Source of inbound events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next batch of events. An empty batch is a normal
    /// outcome of a long poll that timed out.
    async fn next_batch(&self) -> Result<Vec<InboundEvent>, TransportError>;
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, TransportError> {
        (**self).send_message(chat, message).await
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        (**self).delete_message(chat, message_id).await
    }
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    async fn next_batch(&self) -> Result<Vec<InboundEvent>, TransportError> {
        (**self).next_batch().await
    }
}

/// Outcome of a best-effort operation. Callers log it; it is never
/// propagated as an error.
#[derive(Debug)]
pub enum Advisory {
    Done,
    /// Nothing to do
    Skipped,
    Failed(TransportError),
}

impl Advisory {
    /// Best-effort delete of `message_id`, if there is one
    pub async fn delete<T: ChatTransport + ?Sized>(
        transport: &T,
        chat: ChatId,
        message_id: Option<MessageId>,
    ) -> Self {
        let Some(message_id) = message_id else {
            return Self::Skipped;
        };
        match transport.delete_message(chat, message_id).await {
            Ok(()) => Self::Done,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn log(&self, chat: ChatId, what: &str) {
        match self {
            Self::Done => tracing::debug!(chat_id = %chat, what, "Deleted"),
            Self::Skipped => {}
            Self::Failed(e) if e.kind == TransportErrorKind::NotFound => {
                tracing::debug!(chat_id = %chat, what, error = %e, "Already gone, ignoring");
            }
            Self::Failed(e) => {
                tracing::warn!(chat_id = %chat, what, error = %e, "Delete failed, ignoring");
            }
        }
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport {
    inner: Arc<dyn ChatTransport>,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn ChatTransport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ChatTransport for LoggingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_message(chat, message).await;
        let duration = start.elapsed();

        match &result {
            Ok(message_id) => tracing::debug!(
                chat_id = %chat,
                message_id = %message_id,
                duration_ms = %duration.as_millis(),
                "Message sent"
            ),
            Err(e) => tracing::error!(
                chat_id = %chat,
                duration_ms = %duration.as_millis(),
                error = %e.message,
                retryable = e.kind.is_retryable(),
                "Send failed"
            ),
        }

        result
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.delete_message(chat, message_id).await;
        tracing::debug!(
            chat_id = %chat,
            message_id = %message_id,
            duration_ms = %start.elapsed().as_millis(),
            ok = result.is_ok(),
            "Delete attempted"
        );
        result
    }
}
