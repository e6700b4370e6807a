//! Anchor manager
//!
//! Replaces a conversation's scroll in place: best-effort delete of the old
//! message, send of the new one, then the new id becomes the anchor.

use crate::store::{ChatId, MessageId, Store, StoreError};
use crate::transport::{Advisory, ChatTransport, OutgoingMessage, TransportError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The new scroll could not be sent; the stored anchor is unchanged
    #[error("Failed to send scroll: {0}")]
    Send(#[from] TransportError),
    /// The scroll was sent but the new anchor could not be persisted
    #[error("Scroll {sent} sent but anchor not persisted: {source}")]
    Persist {
        sent: MessageId,
        #[source]
        source: StoreError,
    },
}

/// Owns the delete-old / send-new / store-anchor sequence.
///
/// Callers must serialize `replace` per conversation; the runtime does so by
/// giving every conversation its own mailbox.
pub struct AnchorManager<T: ChatTransport> {
    transport: Arc<T>,
    store: Arc<Store>,
}

impl<T: ChatTransport> AnchorManager<T> {
    pub fn new(transport: Arc<T>, store: Arc<Store>) -> Self {
        Self { transport, store }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Replace the displayed scroll with `text` and return the new anchor.
    ///
    /// Deletion failure of the previous scroll never blocks the send. If the
    /// send fails, the stored anchor still points at the previous scroll.
    pub async fn replace(&self, chat: ChatId, text: &str) -> Result<MessageId, ReplaceError> {
        let previous = self.store.get_or_create(chat).await.anchor();

        Advisory::delete(self.transport.as_ref(), chat, previous)
            .await
            .log(chat, "previous scroll");

        let message = OutgoingMessage::new(text).markdown().silent();
        let anchor = self.transport.send_message(chat, &message).await?;

        self.store
            .update(chat, |state| state.set_anchor(anchor))
            .await
            .map_err(|source| ReplaceError::Persist {
                sent: anchor,
                source,
            })?;

        tracing::info!(
            chat_id = %chat,
            previous = ?previous.map(|m| m.0),
            anchor = %anchor,
            "Scroll replaced"
        );
        Ok(anchor)
    }
}
