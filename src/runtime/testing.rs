//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::{RuntimeManager, ScrollNotice};
use crate::state_machine::{Command, Event, ScrollContext};
use crate::store::{ChatId, MessageId, Persistence, Store, StoreResult};
use crate::transport::{
    ChatTransport, EventSource, InboundEvent, OutgoingMessage, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Mock Transport
// ============================================================================

/// Transport that records every call and hands out increasing message ids
pub struct MockTransport {
    next_id: AtomicI64,
    send_failures: Mutex<VecDeque<TransportError>>,
    delete_failures: Mutex<VecDeque<TransportError>>,
    send_delay: Option<Duration>,
    sent: Mutex<Vec<(ChatId, OutgoingMessage, MessageId)>>,
    deleted: Mutex<Vec<(ChatId, MessageId)>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            send_failures: Mutex::new(VecDeque::new()),
            delete_failures: Mutex::new(VecDeque::new()),
            send_delay: None,
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Make every send take `delay` (for interleaving tests)
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_delete(&self, error: TransportError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<(ChatId, OutgoingMessage, MessageId)> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts sent to one chat, in order
    pub fn sent_texts(&self, chat: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == chat)
            .map(|(_, m, _)| m.text.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.deleted.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, TransportError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().unwrap().push((chat, message.clone(), id));
        Ok(id)
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.deleted.lock().unwrap().push((chat, message_id));
        match self.delete_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// In-Memory Persistence
// ============================================================================

/// Backend holding the last written document in memory
#[derive(Default)]
pub struct MemoryBackend {
    document: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: String) -> Self {
        Self {
            document: Mutex::new(Some(document.into_bytes())),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn document(&self) -> Option<Vec<u8>> {
        self.document.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for MemoryBackend {
    async fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.document())
    }

    async fn write(&self, document: &[u8]) -> StoreResult<()> {
        *self.document.lock().unwrap() = Some(document.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Channel Event Source
// ============================================================================

/// Event source fed by the test through a channel
pub struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::Receiver<Result<Vec<InboundEvent>, TransportError>>>,
}

impl ChannelSource {
    pub fn channel() -> (mpsc::Sender<Result<Vec<InboundEvent>, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(16);
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_batch(&self) -> Result<Vec<InboundEvent>, TransportError> {
        match self.rx.lock().await.recv().await {
            Some(batch) => batch,
            // Sender gone: behave like a long poll that never returns
            None => std::future::pending().await,
        }
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

/// A `RuntimeManager` wired to mocks
pub struct TestRuntime {
    pub manager: Arc<RuntimeManager<MockTransport>>,
    pub transport: Arc<MockTransport>,
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<Store>,
    next_inbound_id: AtomicI64,
}

pub struct TestRuntimeBuilder {
    transport: MockTransport,
    context: ScrollContext,
    document: Option<String>,
}

#[allow(dead_code)]
impl TestRuntimeBuilder {
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn auto_delete_replies(mut self, enabled: bool) -> Self {
        self.context = ScrollContext::new(enabled);
        self
    }

    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub async fn build(self) -> TestRuntime {
        let backend = Arc::new(match self.document {
            Some(document) => MemoryBackend::with_document(document),
            None => MemoryBackend::new(),
        });
        let store = Arc::new(Store::load(backend.clone()).await.expect("load store"));
        let transport = Arc::new(self.transport);
        let manager = Arc::new(RuntimeManager::new(
            store.clone(),
            transport.clone(),
            self.context,
        ));

        TestRuntime {
            manager,
            transport,
            backend,
            store,
            next_inbound_id: AtomicI64::new(1),
        }
    }
}

#[allow(dead_code)]
impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            transport: MockTransport::new(),
            context: ScrollContext::default(),
            document: None,
        }
    }

    /// Id for a user-sent message (kept well below the mock's scroll ids)
    pub fn inbound_id(&self) -> MessageId {
        MessageId(self.next_inbound_id.fetch_add(1, Ordering::SeqCst))
    }

    pub async fn subscribe(&self, chat: ChatId) -> broadcast::Receiver<ScrollNotice> {
        self.manager.subscribe(chat).await
    }

    pub async fn command(&self, chat: ChatId, command: Command) -> MessageId {
        let message_id = self.inbound_id();
        self.manager
            .send_event(chat, Event::Command { command, message_id })
            .await
            .expect("send command");
        message_id
    }

    pub async fn reply(&self, chat: ChatId, replied_to: Option<MessageId>, text: &str) -> MessageId {
        let message_id = self.inbound_id();
        self.manager
            .send_event(
                chat,
                Event::ReplyMessage {
                    message_id,
                    replied_to,
                    text: text.to_string(),
                },
            )
            .await
            .expect("send reply");
        message_id
    }

    pub async fn anchor(&self, chat: ChatId) -> Option<MessageId> {
        self.store.get_or_create(chat).await.anchor()
    }

    pub async fn items(&self, chat: ChatId) -> Vec<String> {
        self.store.get_or_create(chat).await.items().to_vec()
    }
}

/// Collect notices until `settled` events have finished, or time out
pub async fn wait_settled(
    rx: &mut broadcast::Receiver<ScrollNotice>,
    settled: usize,
    timeout: Duration,
) -> Vec<ScrollNotice> {
    let mut notices = Vec::new();
    let mut remaining = settled;
    let deadline = tokio::time::Instant::now() + timeout;

    while remaining > 0 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Ok(ScrollNotice::Settled)) => remaining -= 1,
            Ok(Ok(notice)) => notices.push(notice),
            _ => continue,
        }
    }
    assert_eq!(remaining, 0, "timed out waiting for events to settle: {notices:?}");
    notices
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{render, HELP_TEXT, PURGE_ACK};
    use crate::runtime::{RuntimeError, MAILBOX_CAPACITY};
    use crate::state_machine::Rejection;
    use tokio_util::sync::CancellationToken;

    const CHAT: ChatId = ChatId(-4242);
    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_mock_transport_ids_increase() {
        let transport = MockTransport::new();
        let a = transport.send_message(CHAT, &OutgoingMessage::new("a")).await.unwrap();
        let b = transport.send_message(CHAT, &OutgoingMessage::new("b")).await.unwrap();
        assert!(b > a);

        transport.fail_next_send(TransportError::network("down"));
        assert!(transport.send_message(CHAT, &OutgoingMessage::new("c")).await.is_err());
        assert_eq!(transport.sent().len(), 2);
    }

    /// The reference walkthrough: awaken, append, stale reply, list, clear
    #[tokio::test]
    async fn test_scroll_lifecycle_scenario() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m1 = rt.anchor(CHAT).await.expect("scroll posted");
        assert!(rt.items(CHAT).await.is_empty());
        assert_eq!(rt.transport.sent_texts(CHAT), vec![render::<String>(&[]), HELP_TEXT.to_string()]);

        let reply = rt.reply(CHAT, Some(m1), "buy milk").await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m2 = rt.anchor(CHAT).await.unwrap();
        assert_ne!(m1, m2);
        assert_eq!(rt.items(CHAT).await, vec!["buy milk".to_string()]);
        // Old scroll and the absorbed reply were both removed
        assert_eq!(rt.transport.deleted(), vec![(CHAT, m1), (CHAT, reply)]);

        rt.reply(CHAT, Some(m1), "ignored").await;
        let seen = wait_settled(&mut notices, 1, WAIT).await;
        assert_eq!(
            seen,
            vec![ScrollNotice::Ignored {
                reason: Rejection::StaleAnchor {
                    anchor: m2,
                    replied_to: m1
                }
            }]
        );
        assert_eq!(rt.items(CHAT).await, vec!["buy milk".to_string()]);
        assert_eq!(rt.anchor(CHAT).await, Some(m2));

        rt.command(CHAT, Command::List).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m3 = rt.anchor(CHAT).await.unwrap();
        assert_ne!(m2, m3);
        assert_eq!(rt.items(CHAT).await, vec!["buy milk".to_string()]);

        let clear = rt.command(CHAT, Command::Purge).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m4 = rt.anchor(CHAT).await.unwrap();
        assert_ne!(m3, m4);
        assert!(rt.items(CHAT).await.is_empty());

        let (_, ack, _) = rt.transport.sent().pop().unwrap();
        assert_eq!(ack.text, PURGE_ACK);
        assert_eq!(ack.reply_to, Some(clear));
        assert!(!ack.markdown, "acknowledgment is plain text");
    }

    #[tokio::test]
    async fn test_state_flushed_after_append() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let anchor = rt.anchor(CHAT).await;
        rt.reply(CHAT, anchor, "persist me").await;
        wait_settled(&mut notices, 1, WAIT).await;

        let document: serde_json::Value =
            serde_json::from_slice(&rt.backend.document().unwrap()).unwrap();
        let record = &document[CHAT.to_string()];
        assert_eq!(record["items"], serde_json::json!(["persist me"]));
        assert_eq!(record["anchor"], serde_json::json!(rt.anchor(CHAT).await.unwrap().0));
    }

    #[tokio::test]
    async fn test_ignored_messages_change_nothing() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;

        // Nothing posted yet, so even a reply can't land
        rt.reply(CHAT, Some(MessageId(1)), "early").await;
        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 2, WAIT).await;
        let anchor = rt.anchor(CHAT).await;
        let sends = rt.transport.sent().len();
        let writes = rt.backend.write_count();

        rt.reply(CHAT, None, "not a reply").await;
        rt.reply(CHAT, anchor, "   ").await;
        let seen = wait_settled(&mut notices, 2, WAIT).await;

        assert_eq!(
            seen,
            vec![
                ScrollNotice::Ignored {
                    reason: Rejection::NotAReply
                },
                ScrollNotice::Ignored {
                    reason: Rejection::EmptyText
                },
            ]
        );
        assert_eq!(rt.anchor(CHAT).await, anchor);
        assert_eq!(rt.transport.sent().len(), sends);
        assert_eq!(rt.backend.write_count(), writes);
        assert!(rt.items(CHAT).await.is_empty());
    }

    #[tokio::test]
    async fn test_replies_kept_when_auto_delete_off() {
        let rt = TestRuntime::builder().auto_delete_replies(false).build().await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m1 = rt.anchor(CHAT).await.unwrap();
        rt.reply(CHAT, Some(m1), "keep my reply").await;
        wait_settled(&mut notices, 1, WAIT).await;

        assert_eq!(rt.transport.deleted(), vec![(CHAT, m1)]);
    }

    #[tokio::test]
    async fn test_delete_failure_still_replaces() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m1 = rt.anchor(CHAT).await.unwrap();

        rt.transport
            .fail_next_delete(TransportError::not_found("message to delete not found"));
        rt.command(CHAT, Command::List).await;
        let seen = wait_settled(&mut notices, 1, WAIT).await;

        let m2 = rt.anchor(CHAT).await.unwrap();
        assert_ne!(m1, m2);
        assert_eq!(seen, vec![ScrollNotice::Replaced { anchor: m2 }]);
    }

    #[tokio::test]
    async fn test_send_failure_degrades_then_heals() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m1 = rt.anchor(CHAT).await.unwrap();

        rt.transport.fail_next_send(TransportError::network("connection reset"));
        let reply = rt.reply(CHAT, Some(m1), "lost scroll").await;
        let seen = wait_settled(&mut notices, 1, WAIT).await;

        assert!(matches!(seen.as_slice(), [ScrollNotice::Failed { .. }]));
        // Item was kept, anchor is stale, the reply itself was not deleted
        assert_eq!(rt.items(CHAT).await, vec!["lost scroll".to_string()]);
        assert_eq!(rt.anchor(CHAT).await, Some(m1));
        assert!(!rt.transport.deleted().contains(&(CHAT, reply)));

        rt.command(CHAT, Command::List).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let healed = rt.anchor(CHAT).await.unwrap();
        assert_ne!(healed, m1);
        assert_eq!(
            rt.transport.sent_texts(CHAT).last(),
            Some(&render(&["lost scroll"]))
        );
    }

    /// Two replies racing for the same scroll: only the first lands
    #[tokio::test]
    async fn test_racing_replies_to_same_anchor() {
        let rt = TestRuntime::builder()
            .transport(MockTransport::new().with_send_delay(Duration::from_millis(20)))
            .build()
            .await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.command(CHAT, Command::Awaken).await;
        wait_settled(&mut notices, 1, WAIT).await;
        let m1 = rt.anchor(CHAT).await;

        rt.reply(CHAT, m1, "first").await;
        rt.reply(CHAT, m1, "second").await;
        let seen = wait_settled(&mut notices, 2, WAIT).await;

        assert_eq!(rt.items(CHAT).await, vec!["first".to_string()]);
        assert!(seen
            .iter()
            .any(|n| matches!(n, ScrollNotice::Ignored { reason: Rejection::StaleAnchor { .. } })));
    }

    #[tokio::test]
    async fn test_conversations_do_not_share_state() {
        let rt = TestRuntime::builder().build().await;
        let other = ChatId(77);
        let mut a = rt.subscribe(CHAT).await;
        let mut b = rt.subscribe(other).await;

        rt.command(CHAT, Command::Awaken).await;
        rt.command(other, Command::Awaken).await;
        wait_settled(&mut a, 1, WAIT).await;
        wait_settled(&mut b, 1, WAIT).await;

        let anchor_a = rt.anchor(CHAT).await;
        rt.reply(CHAT, anchor_a, "only here").await;
        // A reply in the other chat that names this chat's anchor id
        rt.reply(other, anchor_a, "wrong chat").await;
        wait_settled(&mut a, 1, WAIT).await;
        wait_settled(&mut b, 1, WAIT).await;

        assert_eq!(rt.items(CHAT).await, vec!["only here".to_string()]);
        assert!(rt.items(other).await.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_state_resumes() {
        let rt = TestRuntime::builder()
            .document(r#"{"-4242": {"items": ["from before"], "msg_id": 12}}"#)
            .build()
            .await;
        let mut notices = rt.subscribe(CHAT).await;

        rt.reply(CHAT, Some(MessageId(12)), "after upgrade").await;
        wait_settled(&mut notices, 1, WAIT).await;

        assert_eq!(
            rt.items(CHAT).await,
            vec!["from before".to_string(), "after upgrade".to_string()]
        );
        assert!(rt.transport.deleted().contains(&(CHAT, MessageId(12))));
    }

    #[tokio::test]
    async fn test_polling_routes_and_recovers() {
        let rt = TestRuntime::builder().build().await;
        let mut notices = rt.subscribe(CHAT).await;
        let (tx, source) = ChannelSource::channel();
        let shutdown = CancellationToken::new();

        let manager = rt.manager.clone();
        let poll_shutdown = shutdown.clone();
        let poller = tokio::spawn(async move { manager.run_polling(&source, poll_shutdown).await });

        tx.send(Err(TransportError::rate_limit("slow down").with_retry_after(Duration::from_millis(10))))
            .await
            .unwrap();
        tx.send(Ok(vec![InboundEvent {
            chat: CHAT,
            event: Event::Command {
                command: Command::Awaken,
                message_id: MessageId(1),
            },
        }]))
        .await
        .unwrap();

        let seen = wait_settled(&mut notices, 1, WAIT).await;
        assert!(matches!(seen.as_slice(), [ScrollNotice::Replaced { .. }]));

        shutdown.cancel();
        tokio::time::timeout(WAIT, poller).await.unwrap().unwrap();
        rt.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_rejects_when_mailbox_full() {
        let rt = TestRuntime::builder()
            .transport(MockTransport::new().with_send_delay(Duration::from_millis(100)))
            .build()
            .await;

        let mut full = 0;
        for id in 0..MAILBOX_CAPACITY + 4 {
            let event = Event::Command {
                command: Command::List,
                message_id: MessageId(id as i64),
            };
            match rt.manager.dispatch(CHAT, event).await {
                Ok(()) => {}
                Err(RuntimeError::MailboxFull(chat)) => {
                    assert_eq!(chat, CHAT);
                    full += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(full >= 2, "expected a full mailbox, rejected {full}");
    }

    /// One chat with a long backlog must not delay routing for another
    #[tokio::test]
    async fn test_busy_chat_does_not_stall_polling() {
        let rt = TestRuntime::builder()
            .transport(MockTransport::new().with_send_delay(Duration::from_millis(100)))
            .build()
            .await;
        let quiet = ChatId(9);
        let mut notices = rt.subscribe(quiet).await;
        let (tx, source) = ChannelSource::channel();
        let shutdown = CancellationToken::new();

        let manager = rt.manager.clone();
        let poll_shutdown = shutdown.clone();
        let poller = tokio::spawn(async move { manager.run_polling(&source, poll_shutdown).await });

        let mut batch: Vec<InboundEvent> = (0..MAILBOX_CAPACITY as i64 * 2)
            .map(|id| InboundEvent {
                chat: CHAT,
                event: Event::Command {
                    command: Command::List,
                    message_id: MessageId(id),
                },
            })
            .collect();
        batch.push(InboundEvent {
            chat: quiet,
            event: Event::Command {
                command: Command::Awaken,
                message_id: MessageId(1),
            },
        });
        tx.send(Ok(batch)).await.unwrap();

        let seen = wait_settled(&mut notices, 1, WAIT).await;
        assert!(matches!(seen.as_slice(), [ScrollNotice::Replaced { .. }]));

        shutdown.cancel();
        tokio::time::timeout(WAIT, poller).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_events() {
        let rt = TestRuntime::builder()
            .transport(MockTransport::new().with_send_delay(Duration::from_millis(10)))
            .build()
            .await;

        rt.command(CHAT, Command::Awaken).await;
        rt.command(CHAT, Command::List).await;
        rt.manager.shutdown().await;

        // Awaken: scroll + help; List: scroll
        assert_eq!(rt.transport.sent().len(), 3);
        assert!(rt.anchor(CHAT).await.is_some());
    }
}
