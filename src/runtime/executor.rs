//! Conversation runtime executor

use super::{RuntimeError, ScrollNotice};
use crate::anchor::AnchorManager;
use crate::render::{HELP_TEXT, PURGE_ACK};
use crate::state_machine::{transition, Effect, Event, ScrollContext};
use crate::store::{ChatId, ConversationState, Store};
use crate::transport::{Advisory, ChatTransport, OutgoingMessage};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Drains one conversation's mailbox.
///
/// Events are handled strictly one at a time, so the read / transition /
/// replace / flush sequence for this conversation never interleaves with
/// another event for the same conversation.
pub struct ConversationRuntime<T: ChatTransport + 'static> {
    chat: ChatId,
    context: ScrollContext,
    store: Arc<Store>,
    anchors: Arc<AnchorManager<T>>,
    event_rx: mpsc::Receiver<Event>,
    notice_tx: broadcast::Sender<ScrollNotice>,
}

impl<T: ChatTransport + 'static> ConversationRuntime<T> {
    pub fn new(
        chat: ChatId,
        context: ScrollContext,
        store: Arc<Store>,
        anchors: Arc<AnchorManager<T>>,
        event_rx: mpsc::Receiver<Event>,
        notice_tx: broadcast::Sender<ScrollNotice>,
    ) -> Self {
        Self {
            chat,
            context,
            store,
            anchors,
            event_rx,
            notice_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(chat_id = %self.chat, "Starting conversation runtime");

        while let Some(event) = self.event_rx.recv().await {
            if let Err(e) = self.process_event(event).await {
                // Known degraded state: the anchor may point at a deleted
                // scroll until the next successful replace.
                tracing::error!(chat_id = %self.chat, error = %e, "Error handling event");
                self.notify(ScrollNotice::Failed {
                    message: e.to_string(),
                });
            }
            self.notify(ScrollNotice::Settled);
        }

        tracing::debug!(chat_id = %self.chat, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), RuntimeError> {
        if let Event::Command { command, .. } = &event {
            tracing::info!(chat_id = %self.chat, command = command.name(), "Command received");
        }

        let state = self.store.get_or_create(self.chat).await;

        let result = match transition(&state, &self.context, event) {
            Ok(r) => r,
            Err(reason) => {
                tracing::debug!(chat_id = %self.chat, reason = %reason, "Ignoring message");
                self.notify(ScrollNotice::Ignored { reason });
                return Ok(());
            }
        };

        // Effects run in order; a failed replace skips whatever follows it
        for effect in result.effects {
            self.execute_effect(effect, &result.new_state).await?;
        }

        Ok(())
    }

    async fn execute_effect(
        &self,
        effect: Effect,
        new_state: &ConversationState,
    ) -> Result<(), RuntimeError> {
        match effect {
            Effect::PersistState => {
                let snapshot = new_state.clone();
                self.store.update(self.chat, move |stored| *stored = snapshot).await?;
            }

            Effect::ReplaceScroll { text } => {
                let anchor = self.anchors.replace(self.chat, &text).await?;
                self.notify(ScrollNotice::Replaced { anchor });
            }

            Effect::SendHelp => {
                let help = OutgoingMessage::new(HELP_TEXT).markdown();
                self.anchors.transport().send_message(self.chat, &help).await?;
            }

            Effect::SendAck { reply_to } => {
                let ack = OutgoingMessage::new(PURGE_ACK).reply_to(reply_to);
                self.anchors.transport().send_message(self.chat, &ack).await?;
            }

            Effect::DeleteReply { message_id } => {
                Advisory::delete(self.anchors.transport().as_ref(), self.chat, Some(message_id))
                    .await
                    .log(self.chat, "absorbed reply");
            }
        }

        Ok(())
    }

    fn notify(&self, notice: ScrollNotice) {
        // No subscribers is the normal case outside tests
        let _ = self.notice_tx.send(notice);
    }
}
