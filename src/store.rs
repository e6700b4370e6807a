//! Conversation state table
//!
//! Owns every `ConversationState`, keyed by chat. The whole table is
//! serialized and handed to the backend after each mutation, while the
//! table lock is still held, so two conversations' mutations never
//! interleave with a flush.

mod backend;
mod schema;

pub use backend::{JsonFileBackend, Persistence};
pub use schema::{truncate_item, ChatId, ConversationState, MessageId, MAX_ITEM_LEN};

use schema::migrate_record;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("State table is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Failed to serialize state table: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

type Table = BTreeMap<ChatId, ConversationState>;

/// In-memory table mirrored to a [`Persistence`] backend
pub struct Store {
    table: Mutex<Table>,
    backend: Box<dyn Persistence>,
}

impl Store {
    /// Load the table from the backend, migrating legacy records.
    ///
    /// A missing document is an empty table. A document that is not a JSON
    /// object fails the load; individual broken records are reset instead.
    pub async fn load(backend: impl Persistence + 'static) -> StoreResult<Self> {
        let (table, migrated) = match backend.read().await? {
            Some(bytes) => decode_table(&bytes)?,
            None => (Table::new(), false),
        };

        tracing::info!(conversations = table.len(), migrated, "State table loaded");

        let store = Self {
            table: Mutex::new(table),
            backend: Box::new(backend),
        };
        if migrated {
            store.flush().await?;
        }
        Ok(store)
    }

    /// Snapshot of a conversation's state, creating an empty one on first use
    pub async fn get_or_create(&self, chat: ChatId) -> ConversationState {
        self.table.lock().await.entry(chat).or_default().clone()
    }

    /// Mutate one conversation and flush the table before releasing it
    pub async fn update<R: Send>(
        &self,
        chat: ChatId,
        f: impl FnOnce(&mut ConversationState) -> R + Send,
    ) -> StoreResult<R> {
        let mut table = self.table.lock().await;
        let result = f(table.entry(chat).or_default());
        self.write_table(&table).await?;
        Ok(result)
    }

    /// Persist the entire table
    pub async fn flush(&self) -> StoreResult<()> {
        let table = self.table.lock().await;
        self.write_table(&table).await
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    async fn write_table(&self, table: &Table) -> StoreResult<()> {
        let document = serde_json::to_vec_pretty(table).map_err(StoreError::Encode)?;
        self.backend.write(&document).await
    }
}

/// Parse a stored document, returning the table and whether any record
/// had to be rewritten.
fn decode_table(bytes: &[u8]) -> StoreResult<(Table, bool)> {
    let raw: Map<String, Value> = serde_json::from_slice(bytes).map_err(StoreError::Decode)?;
    let mut table = Table::new();
    let mut migrated = false;

    for (key, value) in raw {
        let Ok(chat) = key.parse::<i64>().map(ChatId) else {
            tracing::warn!(key = %key, "Dropping record with non-numeric chat id");
            migrated = true;
            continue;
        };

        let state = match value {
            Value::Object(mut record) => {
                migrated |= migrate_record(&mut record);
                serde_json::from_value(Value::Object(record)).unwrap_or_else(|e| {
                    tracing::warn!(chat_id = %chat, error = %e, "Resetting malformed record");
                    migrated = true;
                    ConversationState::default()
                })
            }
            other => {
                tracing::warn!(chat_id = %chat, record = %other, "Resetting non-object record");
                migrated = true;
                ConversationState::default()
            }
        };
        table.insert(chat, state);
    }

    Ok((table, migrated))
}
