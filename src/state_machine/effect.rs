//! Effects produced by state transitions

use crate::store::MessageId;

/// Effects to be executed, in order, after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist the new state (items changed)
    PersistState,

    /// Replace the displayed scroll with freshly rendered text
    ReplaceScroll { text: String },

    /// Post the static help text (not part of the scroll)
    SendHelp,

    /// Acknowledge a purge, replying to the command message
    SendAck { reply_to: MessageId },

    /// Best-effort removal of the reply that was just absorbed
    DeleteReply { message_id: MessageId },
}

impl Effect {
    pub fn replace_scroll(text: impl Into<String>) -> Self {
        Effect::ReplaceScroll { text: text.into() }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Effect::ReplaceScroll { .. })
    }
}
