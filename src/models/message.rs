use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

/// Locally inserted messages carry a temporary id until a refetch from the
/// hosted store replaces them with the persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Pending(String),
    Persisted(String),
}

impl MessageId {
    pub fn pending() -> Self {
        MessageId::Pending(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageId::Pending(id) | MessageId::Persisted(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentRef {
    Local(Attachment),
    Remote(String),
}

const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "gif", "png", "webp"];

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        match self {
            AttachmentRef::Local(a) => a.is_image(),
            AttachmentRef::Remote(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit_once('.')
                    .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            }
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            AttachmentRef::Local(a) => a.file_name.clone(),
            AttachmentRef::Remote(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Attachment")
                    .to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    /// Local-only failure notice; never stored remotely.
    pub is_error: bool,
    /// Text posted to the backend when it differs from what is shown, as the
    /// server stores that form.
    pub sent_as: Option<String>,
}

impl Message {
    pub fn pending(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::pending(),
            sender,
            content: content.into(),
            attachment: None,
            created_at: Utc::now(),
            is_error: false,
            sent_as: None,
        }
    }

    /// Assistant-side bubble reporting a failed send or stream.
    pub fn error(reason: &str) -> Self {
        Self {
            is_error: true,
            ..Self::pending(Sender::Ai, format!("Error: {}. Please try again.", reason))
        }
    }
}

/// Wire shape of a row in the hosted `messages` table.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
    #[serde(deserialize_with = "super::id_from_string_or_number")]
    pub id: String,
    pub sender: Sender,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: MessageId::Persisted(row.id),
            sender: row.sender,
            content: row.content.unwrap_or_default(),
            attachment: row.file_url.filter(|u| !u.is_empty()).map(AttachmentRef::Remote),
            created_at: row.created_at,
            is_error: false,
            sent_as: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_attachment_image_detection() {
        let img = AttachmentRef::Remote("https://cdn.example.com/u/cat.PNG?token=1".into());
        assert!(img.is_image());
        assert_eq!(img.file_name(), "cat.PNG");

        let doc = AttachmentRef::Remote("https://cdn.example.com/u/report.pdf".into());
        assert!(!doc.is_image());
        assert_eq!(doc.file_name(), "report.pdf");
    }

    #[test]
    fn test_row_into_message() {
        let json = r#"{"id": 7, "chat_id": "c1", "sender": "ai", "content": "hi",
                       "file_url": null, "created_at": "2024-05-01T10:00:00Z"}"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        let msg: Message = row.into();
        assert_eq!(msg.id, MessageId::Persisted("7".into()));
        assert_eq!(msg.sender, Sender::Ai);
        assert_eq!(msg.content, "hi");
        assert!(msg.attachment.is_none());
    }

    #[test]
    fn test_error_message_format() {
        let msg = Message::error("rate limited");
        assert_eq!(msg.content, "Error: rate limited. Please try again.");
        assert_eq!(msg.sender, Sender::Ai);
        assert!(msg.is_error);
        assert!(msg.id.is_pending());
    }
}
