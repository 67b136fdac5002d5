//! Scripted mail provider and recording broker for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::domain::ports::{
    BrokerError, BrokerSubscription, EventBroker, HistoryChange, HistoryPage, HistoryQuery,
    HistoryRecord, MailProvider, MailProviderError, MessageMetadata, WatchRegistration,
};
use crate::domain::{ChangeEvent, HistoryCursor, MailboxAddress, MessageId, UserTopic};

/// Holds the next history call open until released.
#[derive(Default)]
pub struct HistoryGate {
    entered: Notify,
    release: Notify,
}

impl HistoryGate {
    /// Wait until a history call is parked at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

type PageKey = (HistoryCursor, Option<String>);
type PageResult = Result<HistoryPage, MailProviderError>;

/// Provider double serving pre-registered history pages and messages.
pub struct FakeMailProvider {
    pages: Mutex<HashMap<PageKey, PageResult>>,
    history_failures: Mutex<VecDeque<MailProviderError>>,
    messages: Mutex<HashMap<MessageId, MessageMetadata>>,
    current: Mutex<HistoryCursor>,
    history_delay: Mutex<Option<Duration>>,
    history_gate: Mutex<Option<Arc<HistoryGate>>>,
    watch_expiry: DateTime<Utc>,
    history_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    watch_calls: AtomicUsize,
}

impl FakeMailProvider {
    pub fn new(current: HistoryCursor, watch_expiry: DateTime<Utc>) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            history_failures: Mutex::new(VecDeque::new()),
            messages: Mutex::new(HashMap::new()),
            current: Mutex::new(current),
            history_delay: Mutex::new(None),
            history_gate: Mutex::new(None),
            watch_expiry,
            history_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
        }
    }

    /// Serve `page` for a request starting at `start` with `token`.
    pub fn with_page(self, start: u64, token: Option<&str>, page: HistoryPage) -> Self {
        lock(&self.pages).insert((HistoryCursor::new(start), token.map(str::to_owned)), Ok(page));
        self
    }

    /// Fail requests starting at `start` with `token`.
    pub fn with_page_error(self, start: u64, token: Option<&str>, error: MailProviderError) -> Self {
        lock(&self.pages).insert((HistoryCursor::new(start), token.map(str::to_owned)), Err(error));
        self
    }

    /// Make message metadata available to batch and single fetches.
    pub fn with_message(self, id: &str, history_id: u64) -> Self {
        let metadata = message(id, history_id);
        lock(&self.messages).insert(metadata.id.clone(), metadata);
        self
    }

    /// Fail the next history call with `error`.
    pub fn fail_next_history(&self, error: MailProviderError) {
        lock(&self.history_failures).push_back(error);
    }

    /// Delay every history call by `delay` (use with paused Tokio time).
    pub fn stall_history(&self, delay: Duration) {
        *lock(&self.history_delay) = Some(delay);
    }

    /// Park the next history call until the returned gate is released.
    pub fn gate_next_history(&self) -> Arc<HistoryGate> {
        let gate = Arc::new(HistoryGate::default());
        *lock(&self.history_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_current(&self, cursor: HistoryCursor) {
        *lock(&self.current) = cursor;
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for FakeMailProvider {
    async fn list_history(
        &self,
        _mailbox: &MailboxAddress,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, MailProviderError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.history_gate).take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let delay = *lock(&self.history_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.history_failures).pop_front() {
            return Err(error);
        }
        lock(&self.pages)
            .get(&(query.start, query.page_token.clone()))
            .cloned()
            .unwrap_or_else(|| {
                Err(MailProviderError::stale_cursor(format!(
                    "no history from {}",
                    query.start
                )))
            })
    }

    async fn get_message(
        &self,
        _mailbox: &MailboxAddress,
        id: &MessageId,
    ) -> Result<MessageMetadata, MailProviderError> {
        lock(&self.messages)
            .get(id)
            .cloned()
            .ok_or_else(|| MailProviderError::not_found(id.to_string()))
    }

    async fn batch_get_messages(
        &self,
        _mailbox: &MailboxAddress,
        ids: &[MessageId],
    ) -> Result<Vec<MessageMetadata>, MailProviderError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let messages = lock(&self.messages);
        Ok(ids.iter().filter_map(|id| messages.get(id).cloned()).collect())
    }

    async fn current_cursor(
        &self,
        _mailbox: &MailboxAddress,
    ) -> Result<HistoryCursor, MailProviderError> {
        Ok(*lock(&self.current))
    }

    async fn register_watch(
        &self,
        _mailbox: &MailboxAddress,
        _topic: &str,
    ) -> Result<WatchRegistration, MailProviderError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WatchRegistration {
            history_id: *lock(&self.current),
            expires_at: self.watch_expiry,
        })
    }

    async fn deregister_watch(&self, _mailbox: &MailboxAddress) -> Result<(), MailProviderError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a history page from `(record id, changes)` pairs.
pub fn page(
    history_id: u64,
    next_page_token: Option<&str>,
    records: Vec<(u64, Vec<HistoryChange>)>,
) -> HistoryPage {
    HistoryPage {
        records: records
            .into_iter()
            .map(|(id, changes)| HistoryRecord {
                id: HistoryCursor::new(id),
                changes,
            })
            .collect(),
        next_page_token: next_page_token.map(str::to_owned),
        history_id: HistoryCursor::new(history_id),
    }
}

pub fn message_id(raw: &str) -> MessageId {
    match MessageId::new(raw) {
        Ok(id) => id,
        Err(error) => panic!("invalid test message id {raw:?}: {error}"),
    }
}

pub fn message(id: &str, history_id: u64) -> MessageMetadata {
    MessageMetadata {
        id: message_id(id),
        thread_id: Some(format!("thread-{id}")),
        label_ids: vec!["INBOX".to_owned()],
        snippet: Some(format!("snippet for {id}")),
        history_id: Some(HistoryCursor::new(history_id)),
        internal_date: Some(1_790_000_000_000),
    }
}

/// Broker double keeping every published payload.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<(String, String)>>,
    fail_publish: std::sync::atomic::AtomicBool,
}

impl RecordingBroker {
    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    /// Decoded events published to `topic`, in order.
    pub fn events_for(&self, topic: &str) -> Vec<ChangeEvent> {
        lock(&self.published)
            .iter()
            .filter(|(published_topic, _)| published_topic == topic)
            .map(|(_, payload)| match serde_json::from_str(payload) {
                Ok(event) => event,
                Err(error) => panic!("undecodable payload {payload}: {error}"),
            })
            .collect()
    }

    pub fn published_count(&self) -> usize {
        lock(&self.published).len()
    }
}

#[async_trait]
impl EventBroker for RecordingBroker {
    async fn publish(&self, topic: &UserTopic, payload: String) -> Result<(), BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::unavailable("publish disabled"));
        }
        lock(&self.published).push((topic.as_str().to_owned(), payload));
        Ok(())
    }

    async fn subscribe(&self, _topic: &UserTopic) -> Result<BrokerSubscription, BrokerError> {
        Err(BrokerError::unavailable("recording broker does not deliver"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}
