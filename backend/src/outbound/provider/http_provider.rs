//! Reqwest-backed mail provider adapter.
//!
//! This adapter owns transport details only: URL construction, bearer
//! credentials, timeout and HTTP status mapping, and JSON decoding into the
//! domain's history and message shapes. Retries and circuit breaking live in
//! the domain's resilient wrapper.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use super::dto::{HistoryListDto, MessageDto, ProfileDto, WatchRequestDto, WatchResponseDto};
use crate::domain::ports::{
    HistoryPage, HistoryQuery, MailProvider, MailProviderError, MessageMetadata,
    WatchRegistration,
};
use crate::domain::{HistoryCursor, MailboxAddress, MessageId};

const DEFAULT_USER_AGENT: &str = "mailpush/0.1";
const BATCH_FETCH_CONCURRENCY: usize = 4;

/// Which endpoint a response came from; 404 means different things.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    History,
    Message,
    Other,
}

/// Mail provider adapter speaking the Gmail-style REST API.
pub struct HttpMailProvider {
    client: Client,
    base_url: Url,
    access_token: Zeroizing<String>,
}

impl HttpMailProvider {
    /// Build an adapter rooted at `base_url` (for example
    /// `https://gmail.googleapis.com/gmail/v1/`).
    ///
    /// `timeout` is a transport-level ceiling; the resilient wrapper applies
    /// its own per-call bound on top.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base_url: Url,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            access_token: Zeroizing::new(access_token.into()),
        })
    }

    fn mailbox_url(
        &self,
        mailbox: &MailboxAddress,
        tail: &[&str],
    ) -> Result<Url, MailProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                MailProviderError::invalid_request("provider base URL cannot carry a path")
            })?;
            segments.pop_if_empty().push("users").push(mailbox.as_str());
            segments.extend(tail);
        }
        Ok(url)
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(self.access_token.as_str())
            .header(header::ACCEPT, "application/json")
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: Endpoint,
    ) -> Result<T, MailProviderError> {
        let response = self
            .authorised(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let body = read_success_body(response, endpoint).await?;
        serde_json::from_slice(&body).map_err(|error| {
            MailProviderError::decode(format!("invalid provider JSON payload: {error}"))
        })
    }
}

async fn read_success_body(
    response: Response,
    endpoint: Endpoint,
) -> Result<Vec<u8>, MailProviderError> {
    let status = response.status();
    let retry_after = retry_after(&response);
    let body = response.bytes().await.map_err(map_transport_error)?;
    if !status.is_success() {
        return Err(map_status_error(status, retry_after, body.as_ref(), endpoint));
    }
    Ok(body.to_vec())
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl MailProvider for HttpMailProvider {
    async fn list_history(
        &self,
        mailbox: &MailboxAddress,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, MailProviderError> {
        let mut url = self.mailbox_url(mailbox, &["history"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("startHistoryId", &query.start.to_string());
            if let Some(token) = &query.page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let dto: HistoryListDto = self
            .fetch_json(self.client.get(url), Endpoint::History)
            .await?;
        dto.into_domain_page().map_err(MailProviderError::decode)
    }

    async fn get_message(
        &self,
        mailbox: &MailboxAddress,
        id: &MessageId,
    ) -> Result<MessageMetadata, MailProviderError> {
        let mut url = self.mailbox_url(mailbox, &["messages", id.as_str()])?;
        url.query_pairs_mut().append_pair("format", "metadata");
        let dto: MessageDto = self
            .fetch_json(self.client.get(url), Endpoint::Message)
            .await?;
        dto.into_domain_message().map_err(MailProviderError::decode)
    }

    async fn batch_get_messages(
        &self,
        mailbox: &MailboxAddress,
        ids: &[MessageId],
    ) -> Result<Vec<MessageMetadata>, MailProviderError> {
        let fetches: Vec<_> = ids.iter().map(|id| self.get_message(mailbox, id)).collect();
        let results: Vec<Result<MessageMetadata, MailProviderError>> = stream::iter(fetches)
            .buffered(BATCH_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut found = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(message) => found.push(message),
                Err(MailProviderError::NotFound { .. }) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(found)
    }

    async fn current_cursor(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<HistoryCursor, MailProviderError> {
        let url = self.mailbox_url(mailbox, &["profile"])?;
        let dto: ProfileDto = self
            .fetch_json(self.client.get(url), Endpoint::Other)
            .await?;
        Ok(dto.history_id)
    }

    async fn register_watch(
        &self,
        mailbox: &MailboxAddress,
        topic: &str,
    ) -> Result<WatchRegistration, MailProviderError> {
        let url = self.mailbox_url(mailbox, &["watch"])?;
        let request = self
            .client
            .post(url)
            .json(&WatchRequestDto { topic_name: topic });
        let dto: WatchResponseDto = self.fetch_json(request, Endpoint::Other).await?;
        dto.into_domain_registration()
            .map_err(MailProviderError::decode)
    }

    async fn deregister_watch(&self, mailbox: &MailboxAddress) -> Result<(), MailProviderError> {
        let url = self.mailbox_url(mailbox, &["stop"])?;
        let response = self
            .authorised(self.client.post(url))
            .send()
            .await
            .map_err(map_transport_error)?;
        read_success_body(response, Endpoint::Other).await.map(|_| ())
    }
}

fn map_transport_error(error: reqwest::Error) -> MailProviderError {
    if error.is_timeout() {
        MailProviderError::timeout(error.to_string())
    } else if error.is_decode() {
        MailProviderError::decode(error.to_string())
    } else {
        MailProviderError::transport(error.to_string())
    }
}

fn map_status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
    endpoint: Endpoint,
) -> MailProviderError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => MailProviderError::rate_limited(message, retry_after),
        StatusCode::NOT_FOUND if endpoint == Endpoint::History => {
            MailProviderError::stale_cursor(message)
        }
        StatusCode::NOT_FOUND => MailProviderError::not_found(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MailProviderError::unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            MailProviderError::timeout(message)
        }
        _ if status.is_server_error() => MailProviderError::server(status.as_u16(), message),
        _ => MailProviderError::invalid_request(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
#[path = "http_provider_tests.rs"]
mod tests;
