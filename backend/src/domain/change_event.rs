//! Change events fanned out to a user's live connections.
//!
//! Events travel over the broker as JSON and are re-framed by the stream
//! gateway. They are never persisted; clients merge them idempotently.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{AccountId, HistoryCursor, MessageId, UserId};
use super::ports::MessageMetadata;

/// Kind of change or control signal carried by a [`ChangeEvent`].
///
/// The serialised names are the stream's event-type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A message appeared in the mailbox.
    #[serde(rename = "new_item")]
    Created,
    /// A message's labels or flags changed.
    #[serde(rename = "item_update")]
    Updated,
    /// A message was removed.
    #[serde(rename = "item_delete")]
    Deleted,
    /// A reconciliation attempt finished (whatever its result).
    #[serde(rename = "sync_complete")]
    SyncComplete,
    /// Keep-alive emitted by the stream gateway.
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// First frame on every new stream.
    #[serde(rename = "connected")]
    Connected,
    /// Non-transient problem the client must act on.
    #[serde(rename = "error")]
    Error,
}

impl ChangeKind {
    /// Wire tag used for the stream's `event:` line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "new_item",
            Self::Updated => "item_update",
            Self::Deleted => "item_delete",
            Self::SyncComplete => "sync_complete",
            Self::Heartbeat => "heartbeat",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported in `sync_complete` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Changes were found and published.
    Applied,
    /// The notification was already covered by the watermark.
    Noop,
    /// Another pass held the account lock.
    Skipped,
    /// The pass failed and will be retried by the push transport.
    Failed,
    /// The stored cursor is too old; a full resync is required.
    ResyncRequired,
    /// The watermark was moved to the provider's current cursor.
    Rebased,
}

/// Immutable event published to a user's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Recipient user.
    pub user_id: UserId,
    /// Change kind, serialised as the stream event type.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Kind-specific payload.
    pub data: Value,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event with an arbitrary payload.
    #[must_use]
    pub fn new(user_id: UserId, kind: ChangeKind, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind,
            data,
            timestamp,
        }
    }

    /// `new_item` / `item_update` event for fetched message metadata.
    #[must_use]
    pub fn message(
        user_id: UserId,
        kind: ChangeKind,
        account_id: &AccountId,
        message: &MessageMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let data = json!({
            "accountId": account_id,
            "messageId": message.id,
            "threadId": message.thread_id,
            "labelIds": message.label_ids,
            "snippet": message.snippet,
            "historyId": message.history_id,
            "internalDate": message.internal_date,
        });
        Self::new(user_id, kind, data, timestamp)
    }

    /// `item_delete` event; deletions carry only identifiers.
    #[must_use]
    pub fn deleted(
        user_id: UserId,
        account_id: &AccountId,
        message_id: &MessageId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let data = json!({ "accountId": account_id, "messageId": message_id });
        Self::new(user_id, ChangeKind::Deleted, data, timestamp)
    }

    /// `sync_complete` event closing one webhook dispatch or rebase.
    #[must_use]
    pub fn sync_complete(
        user_id: UserId,
        account_id: &AccountId,
        history_id: HistoryCursor,
        status: SyncStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut data = json!({
            "accountId": account_id,
            "historyId": history_id,
            "status": status,
        });
        if status == SyncStatus::Rebased {
            data["fullResync"] = Value::Bool(true);
        }
        Self::new(user_id, ChangeKind::SyncComplete, data, timestamp)
    }

    /// `error` event asking the client to perform a full reload.
    #[must_use]
    pub fn resync_required(
        user_id: UserId,
        account_id: &AccountId,
        history_id: HistoryCursor,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let data = json!({
            "code": "full_resync_required",
            "accountId": account_id,
            "historyId": history_id,
        });
        Self::new(user_id, ChangeKind::Error, data, timestamp)
    }
}

/// Per-user broker topic: `user:{id}:updates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserTopic(String);

impl UserTopic {
    /// Topic for the given user.
    ///
    /// # Examples
    /// ```
    /// use mailpush::domain::{UserId, UserTopic};
    ///
    /// let user = UserId::new("42").expect("valid user id");
    /// assert_eq!(UserTopic::for_user(&user).as_str(), "user:42:updates");
    /// ```
    #[must_use]
    pub fn for_user(user_id: &UserId) -> Self {
        Self(format!("user:{user_id}:updates"))
    }

    /// Topic name as sent to the broker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UserTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    //! Wire-shape coverage for change events.
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    #[fixture]
    fn user() -> UserId {
        UserId::new("user-1").expect("valid user")
    }

    #[fixture]
    fn account() -> AccountId {
        AccountId::new("acct-1").expect("valid account")
    }

    #[rstest]
    fn sync_complete_serialises_history_id_and_status(
        user: UserId,
        account: AccountId,
        now: DateTime<Utc>,
    ) {
        let event = ChangeEvent::sync_complete(
            user,
            &account,
            HistoryCursor::new(105),
            SyncStatus::Applied,
            now,
        );
        insta::assert_json_snapshot!(event, @r#"
        {
          "userId": "user-1",
          "type": "sync_complete",
          "data": {
            "accountId": "acct-1",
            "historyId": 105,
            "status": "applied"
          },
          "timestamp": "2026-10-01T09:30:00Z"
        }
        "#);
    }

    #[rstest]
    fn rebased_sync_complete_flags_full_resync(
        user: UserId,
        account: AccountId,
        now: DateTime<Utc>,
    ) {
        let event = ChangeEvent::sync_complete(
            user,
            &account,
            HistoryCursor::new(900),
            SyncStatus::Rebased,
            now,
        );
        assert_eq!(event.data["fullResync"], Value::Bool(true));
    }

    #[rstest]
    fn events_round_trip_through_broker_json(
        user: UserId,
        account: AccountId,
        now: DateTime<Utc>,
    ) {
        let message_id = MessageId::new("m-1").expect("valid message id");
        let event = ChangeEvent::deleted(user, &account, &message_id, now);
        let encoded = serde_json::to_string(&event).expect("encode");
        let decoded: ChangeEvent = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, event);
        assert_eq!(decoded.kind.as_str(), "item_delete");
    }

    #[rstest]
    fn topic_is_scoped_per_user() {
        let a = UserId::new("a").expect("valid");
        let b = UserId::new("b").expect("valid");
        assert_ne!(UserTopic::for_user(&a), UserTopic::for_user(&b));
    }
}
