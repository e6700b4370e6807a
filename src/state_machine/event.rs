//! Events that can occur in a conversation

use crate::store::MessageId;

/// Explicit commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `/start`: post the scroll (again) plus the help text
    Awaken,
    /// `/list`: re-post the scroll at the bottom of the conversation
    List,
    /// `/clear`: erase every item
    Purge,
}

impl Command {
    /// Parse a command message such as `/list` or `/clear@SomeBot now`.
    ///
    /// An `@username` suffix must name this bot (`bot_username`, compared
    /// case-insensitively); a command addressed to another bot is plain text.
    /// Returns `None` for plain text and for commands this bot doesn't know.
    pub fn parse(text: &str, bot_username: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = match name.split_once('@') {
            Some((name, addressee)) if addressee.eq_ignore_ascii_case(bot_username) => name,
            Some(_) => return None,
            None => name,
        };

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Awaken),
            "list" => Some(Self::List),
            "clear" => Some(Self::Purge),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Awaken => "start",
            Self::List => "list",
            Self::Purge => "clear",
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Command {
        command: Command,
        /// The message that carried the command
        message_id: MessageId,
    },
    /// Any other text message; only replies to the live scroll append
    ReplyMessage {
        message_id: MessageId,
        replied_to: Option<MessageId>,
        text: String,
    },
}
