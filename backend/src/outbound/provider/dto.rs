//! DTOs for decoding the provider's history, message, profile and watch
//! responses.
//!
//! Numeric ids arrive as decimal strings; [`HistoryCursor`] accepts both forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::{
    HistoryChange, HistoryPage, HistoryRecord, MessageMetadata, WatchRegistration,
};
use crate::domain::{HistoryCursor, MessageId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HistoryListDto {
    #[serde(default)]
    pub(super) history: Vec<HistoryRecordDto>,
    pub(super) next_page_token: Option<String>,
    pub(super) history_id: HistoryCursor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HistoryRecordDto {
    pub(super) id: HistoryCursor,
    #[serde(default)]
    pub(super) messages_added: Vec<MessageRefDto>,
    #[serde(default)]
    pub(super) messages_deleted: Vec<MessageRefDto>,
    #[serde(default)]
    pub(super) labels_added: Vec<MessageRefDto>,
    #[serde(default)]
    pub(super) labels_removed: Vec<MessageRefDto>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageRefDto {
    pub(super) message: MessageIdDto,
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageIdDto {
    pub(super) id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MessageDto {
    pub(super) id: String,
    pub(super) thread_id: Option<String>,
    #[serde(default)]
    pub(super) label_ids: Vec<String>,
    pub(super) snippet: Option<String>,
    pub(super) history_id: Option<HistoryCursor>,
    pub(super) internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProfileDto {
    pub(super) history_id: HistoryCursor,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WatchRequestDto<'a> {
    pub(super) topic_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WatchResponseDto {
    pub(super) history_id: HistoryCursor,
    pub(super) expiration: String,
}

fn message_id(raw: String) -> Result<MessageId, String> {
    MessageId::new(raw).map_err(|error| format!("invalid message id: {error}"))
}

impl HistoryListDto {
    pub(super) fn into_domain_page(self) -> Result<HistoryPage, String> {
        let records = self
            .history
            .into_iter()
            .map(HistoryRecordDto::into_domain_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HistoryPage {
            records,
            next_page_token: self.next_page_token.filter(|token| !token.is_empty()),
            history_id: self.history_id,
        })
    }
}

impl HistoryRecordDto {
    /// Flatten the four change lists into one sequence.
    ///
    /// The wire format groups changes by kind, so intra-record order is
    /// added, label changes, then deletions.
    fn into_domain_record(self) -> Result<HistoryRecord, String> {
        let mut changes = Vec::with_capacity(
            self.messages_added.len()
                + self.labels_added.len()
                + self.labels_removed.len()
                + self.messages_deleted.len(),
        );
        for entry in self.messages_added {
            changes.push(HistoryChange::MessageAdded(message_id(entry.message.id)?));
        }
        for entry in self.labels_added {
            changes.push(HistoryChange::LabelsAdded(message_id(entry.message.id)?));
        }
        for entry in self.labels_removed {
            changes.push(HistoryChange::LabelsRemoved(message_id(entry.message.id)?));
        }
        for entry in self.messages_deleted {
            changes.push(HistoryChange::MessageDeleted(message_id(entry.message.id)?));
        }
        Ok(HistoryRecord {
            id: self.id,
            changes,
        })
    }
}

impl MessageDto {
    pub(super) fn into_domain_message(self) -> Result<MessageMetadata, String> {
        let internal_date = self
            .internal_date
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|error| format!("invalid internalDate {raw:?}: {error}"))
            })
            .transpose()?;
        Ok(MessageMetadata {
            id: message_id(self.id)?,
            thread_id: self.thread_id,
            label_ids: self.label_ids,
            snippet: self.snippet,
            history_id: self.history_id,
            internal_date,
        })
    }
}

impl WatchResponseDto {
    pub(super) fn into_domain_registration(self) -> Result<WatchRegistration, String> {
        let millis = self
            .expiration
            .parse::<i64>()
            .map_err(|error| format!("invalid watch expiration {:?}: {error}", self.expiration))?;
        let expires_at: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| format!("watch expiration {millis} is out of range"))?;
        Ok(WatchRegistration {
            history_id: self.history_id,
            expires_at,
        })
    }
}
