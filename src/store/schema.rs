//! Persisted conversation records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Maximum length of a stored item, in Unicode scalar values
pub const MAX_ITEM_LEN: usize = 120;

/// Field that held the anchor before it was renamed
const LEGACY_ANCHOR_FIELD: &str = "msg_id";

/// Chat platform conversation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Chat platform message identifier, unique within a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scroll state for one conversation.
///
/// `items` only grows one bounded line at a time or is cleared wholesale;
/// `anchor` is only rewritten by the anchor manager once a replacement
/// scroll has been sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    anchor: Option<MessageId>,
}

impl ConversationState {
    #[cfg(test)]
    pub fn new(items: Vec<String>, anchor: Option<MessageId>) -> Self {
        Self { items, anchor }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn anchor(&self) -> Option<MessageId> {
        self.anchor
    }

    /// Append one item, silently truncated to [`MAX_ITEM_LEN`]
    pub fn push_item(&mut self, text: &str) {
        self.items.push(truncate_item(text));
    }

    pub fn clear_items(&mut self) {
        self.items.clear();
    }

    pub(crate) fn set_anchor(&mut self, anchor: MessageId) {
        self.anchor = Some(anchor);
    }
}

/// Keep at most [`MAX_ITEM_LEN`] characters of `text`, no marker appended
pub fn truncate_item(text: &str) -> String {
    text.chars().take(MAX_ITEM_LEN).collect()
}

/// Bring a raw record up to the current layout.
///
/// Returns true if the record was changed. Idempotent: a record that already
/// carries `anchor` and `items` is left untouched.
pub fn migrate_record(record: &mut Map<String, Value>) -> bool {
    let mut changed = false;

    if !record.contains_key("anchor") {
        let legacy = record.remove(LEGACY_ANCHOR_FIELD).unwrap_or(Value::Null);
        record.insert("anchor".to_string(), legacy);
        changed = true;
    }

    if !record.contains_key("items") {
        record.insert("items".to_string(), Value::Array(vec![]));
        changed = true;
    }

    changed
}
