use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, GeneratedImage, ProviderError, StreamEvent};
use crate::models::{Conversation, MessageRow, Session, User};

/// The hosted AI backend: streamed chat replies and image lookups.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Post one turn and forward the decoded reply as it arrives. Errors
    /// returned here happened before the first byte of the body.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;

    async fn generate_image(
        &self,
        query: &str,
        access_token: &str,
    ) -> Result<GeneratedImage, ProviderError>;
}

/// Row-level-secured chat and message tables.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn list_chats(&self, access_token: &str) -> Result<Vec<Conversation>, ProviderError>;

    async fn create_chat(
        &self,
        access_token: &str,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, ProviderError>;

    async fn rename_chat(
        &self,
        access_token: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<(), ProviderError>;

    async fn delete_chats(&self, access_token: &str, ids: &[String]) -> Result<(), ProviderError>;

    async fn list_messages(
        &self,
        access_token: &str,
        chat_id: &str,
    ) -> Result<Vec<MessageRow>, ProviderError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Browser URL that starts the OAuth sign-in.
    fn authorize_url(&self, redirect_to: &str) -> String;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError>;

    async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;
}
