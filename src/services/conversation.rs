use anyhow::{Context, Result};

use crate::models::{Conversation, Message, DEFAULT_TITLE};
use crate::providers::ChatStore;

const TITLE_CHARS: usize = 30;

/// Title for a conversation named after its first message: the first 30
/// characters of the raw text, with `...` appended when it was longer.
pub fn derive_title(raw_text: &str) -> String {
    let mut chars = raw_text.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Only conversations still carrying the default title are renamed, and only
/// when the user actually typed something.
pub fn should_retitle(conversation: &Conversation, raw_text: &str) -> bool {
    conversation.has_default_title() && !raw_text.trim().is_empty()
}

pub async fn load_conversations(
    store: &dyn ChatStore,
    access_token: &str,
) -> Result<Vec<Conversation>> {
    store
        .list_chats(access_token)
        .await
        .context("Failed to load chats")
}

pub async fn load_messages(
    store: &dyn ChatStore,
    access_token: &str,
    chat_id: &str,
) -> Result<Vec<Message>> {
    let rows = store
        .list_messages(access_token, chat_id)
        .await
        .with_context(|| format!("Failed to load messages for chat {}", chat_id))?;
    Ok(rows.into_iter().map(Message::from).collect())
}

pub async fn create_conversation(
    store: &dyn ChatStore,
    access_token: &str,
    user_id: &str,
) -> Result<Conversation> {
    store
        .create_chat(access_token, user_id, DEFAULT_TITLE)
        .await
        .context("Failed to create chat")
}

/// Persist the derived title; returns it so the caller can update its cache.
pub async fn retitle_conversation(
    store: &dyn ChatStore,
    access_token: &str,
    chat_id: &str,
    raw_text: &str,
) -> Result<String> {
    let title = derive_title(raw_text.trim());
    store
        .rename_chat(access_token, chat_id, &title)
        .await
        .context("Failed to rename chat")?;
    Ok(title)
}

pub async fn delete_conversations(
    store: &dyn ChatStore,
    access_token: &str,
    chat_ids: &[String],
) -> Result<()> {
    if chat_ids.is_empty() {
        return Ok(());
    }
    store
        .delete_chats(access_token, chat_ids)
        .await
        .with_context(|| format!("Failed to delete {} chat(s)", chat_ids.len()))
}
