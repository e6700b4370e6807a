//! Pure state transition function
//!
//! Decides what an inbound event does to a conversation's items and which
//! effects follow. The anchor itself is never changed here: it moves only
//! when the anchor manager has actually sent a replacement scroll.

use super::{Command, Effect, Event, ScrollContext, ScrollPhase};
use crate::render::render;
use crate::store::{ConversationState, MessageId};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConversationState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Why an inbound message was not absorbed. Not an error for the user:
/// the message is simply ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("message is not a reply")]
    NotAReply,
    #[error("reply has no text")]
    EmptyText,
    #[error("no scroll has been posted")]
    NoScroll,
    #[error("reply targets {replied_to}, live scroll is {anchor}")]
    StaleAnchor {
        anchor: MessageId,
        replied_to: MessageId,
    },
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &ConversationState,
    context: &ScrollContext,
    event: Event,
) -> Result<TransitionResult, Rejection> {
    match event {
        // Awaken works from either phase and always lands in Active
        Event::Command {
            command: Command::Awaken,
            ..
        } => Ok(TransitionResult::new(state.clone())
            .with_effect(Effect::replace_scroll(render(state.items())))
            .with_effect(Effect::SendHelp)),

        // Bring-to-bottom: same content, new message
        Event::Command {
            command: Command::List,
            ..
        } => Ok(TransitionResult::new(state.clone())
            .with_effect(Effect::replace_scroll(render(state.items())))),

        Event::Command {
            command: Command::Purge,
            message_id,
        } => {
            let mut new_state = state.clone();
            new_state.clear_items();
            let persist = (new_state != *state).then_some(Effect::PersistState);

            Ok(TransitionResult::new(new_state)
                .with_effects(persist)
                .with_effect(Effect::replace_scroll(render::<String>(&[])))
                .with_effect(Effect::SendAck {
                    reply_to: message_id,
                }))
        }

        Event::ReplyMessage {
            message_id,
            replied_to,
            text,
        } => {
            let replied_to = replied_to.ok_or(Rejection::NotAReply)?;
            let text = text.trim();
            if text.is_empty() {
                return Err(Rejection::EmptyText);
            }

            match ScrollPhase::of(state) {
                ScrollPhase::NoScroll => return Err(Rejection::NoScroll),
                phase @ ScrollPhase::Active { anchor } if !phase.accepts_reply_to(replied_to) => {
                    return Err(Rejection::StaleAnchor { anchor, replied_to });
                }
                ScrollPhase::Active { .. } => {}
            }

            let mut new_state = state.clone();
            new_state.push_item(text);
            let text = render(new_state.items());

            let cleanup = context
                .auto_delete_replies
                .then_some(Effect::DeleteReply { message_id });

            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::PersistState)
                .with_effect(Effect::replace_scroll(text))
                .with_effects(cleanup))
        }
    }
}
