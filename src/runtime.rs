//! Runtime for scroll conversations
//!
//! Every conversation gets its own task draining a mailbox, which
//! serializes that conversation's events while different conversations
//! proceed concurrently. The polling loop routes inbound events to the
//! right mailbox.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;

use crate::anchor::{AnchorManager, ReplaceError};
use crate::state_machine::{Event, Rejection, ScrollContext};
use crate::store::{ChatId, MessageId, Store, StoreError};
use crate::transport::{ChatTransport, EventSource, InboundEvent, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const MAILBOX_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Replace(#[from] ReplaceError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Runtime for chat {0} has stopped")]
    MailboxClosed(ChatId),
    #[error("Mailbox for chat {0} is full")]
    MailboxFull(ChatId),
}

/// Outcomes published by a conversation runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollNotice {
    /// A new scroll is live
    Replaced { anchor: MessageId },
    /// The message was not absorbed
    Ignored { reason: Rejection },
    /// Handling stopped part-way; state may be degraded
    Failed { message: String },
    /// The runtime finished with one event
    Settled,
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub notice_tx: broadcast::Sender<ScrollNotice>,
}

/// Manager for all conversation runtimes
pub struct RuntimeManager<T: ChatTransport + 'static> {
    store: Arc<Store>,
    anchors: Arc<AnchorManager<T>>,
    context: ScrollContext,
    runtimes: RwLock<HashMap<ChatId, ConversationHandle>>,
    tasks: Mutex<JoinSet<()>>,
}

impl<T: ChatTransport + 'static> RuntimeManager<T> {
    pub fn new(store: Arc<Store>, transport: Arc<T>, context: ScrollContext) -> Self {
        Self {
            anchors: Arc::new(AnchorManager::new(transport, store.clone())),
            store,
            context,
            runtimes: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Get or start the runtime for a conversation
    pub async fn get_or_create(&self, chat: ChatId) -> ConversationHandle {
        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(&chat).filter(|h| !h.event_tx.is_closed()) {
            return handle.clone();
        }

        let (event_tx, event_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let runtime = ConversationRuntime::new(
            chat,
            self.context,
            self.store.clone(),
            self.anchors.clone(),
            event_rx,
            notice_tx.clone(),
        );
        self.tasks.lock().await.spawn(runtime.run());

        let handle = ConversationHandle {
            event_tx,
            notice_tx,
        };
        runtimes.insert(chat, handle.clone());
        handle
    }

    /// Queue an event for a conversation, waiting for mailbox space
    #[allow(dead_code)] // Used by tests
    pub async fn send_event(&self, chat: ChatId, event: Event) -> Result<(), RuntimeError> {
        let handle = self.get_or_create(chat).await;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::MailboxClosed(chat))
    }

    /// Queue an event without waiting for mailbox space.
    ///
    /// A conversation that is backed up must not hold up routing for the
    /// others, so a full mailbox rejects the event instead.
    pub async fn dispatch(&self, chat: ChatId, event: Event) -> Result<(), RuntimeError> {
        let handle = self.get_or_create(chat).await;
        handle.event_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => RuntimeError::MailboxFull(chat),
            TrySendError::Closed(_) => RuntimeError::MailboxClosed(chat),
        })
    }

    /// Subscribe to a conversation's notices
    #[allow(dead_code)] // Used by tests and external observers
    pub async fn subscribe(&self, chat: ChatId) -> broadcast::Receiver<ScrollNotice> {
        self.get_or_create(chat).await.notice_tx.subscribe()
    }

    /// Pull events from `source` and route them until `shutdown` fires
    pub async fn run_polling<S: EventSource + ?Sized>(&self, source: &S, shutdown: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            let batch = tokio::select! {
                () = shutdown.cancelled() => break,
                batch = source.next_batch() => batch,
            };

            match batch {
                Ok(events) => {
                    failures = 0;
                    for InboundEvent { chat, event } in events {
                        match self.dispatch(chat, event).await {
                            Ok(()) => {}
                            Err(e @ RuntimeError::MailboxFull(_)) => {
                                tracing::warn!(chat_id = %chat, error = %e, "Dropping event");
                            }
                            Err(e) => {
                                tracing::error!(chat_id = %chat, error = %e, "Failed to route event");
                            }
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = e.retry_after.unwrap_or_else(|| poll_backoff(failures));
                    tracing::warn!(
                        error = %e,
                        kind = ?e.kind,
                        attempt = failures,
                        delay_ms = %delay.as_millis(),
                        "Polling failed, backing off"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Polling stopped");
    }

    /// Close every mailbox and wait for queued events to drain
    pub async fn shutdown(&self) {
        self.runtimes.write().await.clear();

        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Conversation runtime panicked");
            }
        }
        tracing::info!("All conversation runtimes stopped");
    }
}

/// Exponential backoff for consecutive polling failures: 1s, 2s, 4s ... 30s
fn poll_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(5);
    Duration::from_secs(1 << exponent).min(MAX_POLL_BACKOFF)
}
