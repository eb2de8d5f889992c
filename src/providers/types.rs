use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Attachment;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Text shown to the user inside an error bubble; transport details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::AuthError(msg)
            | ProviderError::RequestFailed(msg)
            | ProviderError::InvalidResponse(msg) => msg.clone(),
            ProviderError::NetworkError(_) => "Connection failed".to_string(),
        }
    }
}

/// One outbound chat turn as posted to the backend.
#[derive(Clone)]
pub struct ChatRequest {
    pub access_token: String,
    pub chat_id: String,
    pub message: Option<String>,
    pub file: Option<Attachment>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("access_token", &"***")
            .field("chat_id", &self.chat_id)
            .field("message", &self.message.as_ref().map(|m| m.len()))
            .field("file", &self.file)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The backend accepted the request; body chunks follow.
    Opened,
    Chunk(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub photographer: Option<String>,
}
