pub mod attachment;
pub mod conversation;
pub mod message;
pub mod persona;
pub mod session;

pub use attachment::Attachment;
pub use conversation::{Conversation, DEFAULT_TITLE};
pub use message::{AttachmentRef, Message, MessageId, MessageRow, Sender};
pub use persona::Persona;
pub use session::{Session, User};

use serde::{Deserialize, Deserializer};

/// Hosted tables may key rows by uuid or by bigint; both are kept as strings.
pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}
