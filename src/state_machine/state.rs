//! Scroll lifecycle phases and per-runtime context

use crate::store::{ConversationState, MessageId};

/// Where a conversation is in the scroll lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    /// No scroll has been posted yet
    NoScroll,
    /// `anchor` is the one live scroll message
    Active { anchor: MessageId },
}

impl ScrollPhase {
    pub fn of(state: &ConversationState) -> Self {
        match state.anchor() {
            Some(anchor) => Self::Active { anchor },
            None => Self::NoScroll,
        }
    }

    /// Whether a reply targeting `replied_to` may append to the scroll
    pub fn accepts_reply_to(self, replied_to: MessageId) -> bool {
        matches!(self, Self::Active { anchor } if anchor == replied_to)
    }
}

/// Static settings a transition may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollContext {
    /// Delete absorbed replies once the scroll has been replaced
    pub auto_delete_replies: bool,
}

impl ScrollContext {
    pub fn new(auto_delete_replies: bool) -> Self {
        Self {
            auto_delete_replies,
        }
    }
}

impl Default for ScrollContext {
    fn default() -> Self {
        Self::new(true)
    }
}
