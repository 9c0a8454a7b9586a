use async_trait::async_trait;
use thiserror::Error;

use crate::features::trade::message::ChatMessage;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("history endpoint returned status {0}")]
    Status(u16),
    #[error("no remote history endpoint configured")]
    Unconfigured,
}

/// Authoritative server-held message history for a room.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, HistoryError>;
}

/// REST-backed history source: `GET {base}/rooms/{room}/messages`.
pub struct HttpHistoryApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHistoryApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HistoryApi for HttpHistoryApi {
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let url = format!(
            "{}/rooms/{}/messages",
            self.base_url.trim_end_matches('/'),
            room_id
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(HistoryError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Stand-in for clients running without a server: every fetch reports the
/// remote side as unreachable, so callers fall back to their local view.
pub struct NoRemoteHistory;

#[async_trait]
impl HistoryApi for NoRemoteHistory {
    async fn fetch_history(&self, _room_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        Err(HistoryError::Unconfigured)
    }
}
