use std::collections::HashMap;

use crate::models::{Conversation, Message, MessageId, Sender};

/// Everything the workspace shows, owned by the app and changed only through
/// [`WorkspaceState::apply`]. Async completions arrive as updates and are
/// applied one at a time on the main loop, always against the latest state.
#[derive(Debug, Default, Clone)]
pub struct WorkspaceState {
    /// Newest first.
    pub conversations: Vec<Conversation>,
    pub active_id: Option<String>,
    /// Transcript of the active conversation.
    pub messages: Vec<Message>,
    pub search_term: String,
    /// Conversations with a reply in flight, with the placeholder's id once inserted.
    in_flight: HashMap<String, Option<MessageId>>,
}

#[derive(Debug, Clone)]
pub enum WorkspaceUpdate {
    ChatsLoaded(Vec<Conversation>),
    ChatCreated(Conversation),
    Select(String),
    MessagesLoaded {
        chat_id: String,
        messages: Vec<Message>,
    },
    ChatDeleted(String),
    AllCleared,
    ChatRenamed {
        chat_id: String,
        title: String,
    },
    SendStarted {
        chat_id: String,
        message: Message,
    },
    ReplyStarted {
        chat_id: String,
        message_id: MessageId,
    },
    ReplyProgress {
        chat_id: String,
        message_id: MessageId,
        content: String,
    },
    ReplyFinished {
        chat_id: String,
    },
    ErrorAppended {
        chat_id: String,
        message: Message,
    },
    SearchChanged(String),
    Reset,
}

/// Which parts of the state an update touched, so views refresh only what changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub conversations: bool,
    pub active: bool,
    pub messages: bool,
}

impl Change {
    fn conversations() -> Self {
        Self {
            conversations: true,
            ..Self::default()
        }
    }

    fn messages() -> Self {
        Self {
            messages: true,
            ..Self::default()
        }
    }

    fn all() -> Self {
        Self {
            conversations: true,
            active: true,
            messages: true,
        }
    }
}

impl WorkspaceState {
    pub fn active(&self) -> Option<&Conversation> {
        let id = self.active_id.as_deref()?;
        self.conversation(id)
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn is_active(&self, chat_id: &str) -> bool {
        self.active_id.as_deref() == Some(chat_id)
    }

    pub fn is_sending(&self, chat_id: &str) -> bool {
        self.in_flight.contains_key(chat_id)
    }

    /// Placeholder of the reply streaming into `chat_id`, once the backend accepted the turn.
    pub fn streaming_message(&self, chat_id: &str) -> Option<&MessageId> {
        self.in_flight.get(chat_id).and_then(Option::as_ref)
    }

    /// A send needs an active conversation with no reply already in flight.
    pub fn can_send(&self) -> bool {
        self.active_id
            .as_deref()
            .is_some_and(|id| !self.is_sending(id))
    }

    pub fn filtered_conversations(&self) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| c.matches_filter(&self.search_term))
            .collect()
    }

    pub fn apply(&mut self, update: WorkspaceUpdate) -> Change {
        match update {
            WorkspaceUpdate::ChatsLoaded(conversations) => {
                self.conversations = conversations;
                if self.active_id.is_none() {
                    if let Some(newest) = self.conversations.first() {
                        self.active_id = Some(newest.id.clone());
                        self.messages.clear();
                        return Change::all();
                    }
                }
                Change::conversations()
            }
            WorkspaceUpdate::ChatCreated(conversation) => {
                self.active_id = Some(conversation.id.clone());
                self.conversations.retain(|c| c.id != conversation.id);
                self.conversations.insert(0, conversation);
                self.messages.clear();
                Change::all()
            }
            WorkspaceUpdate::Select(chat_id) => {
                if self.is_active(&chat_id) {
                    return Change::default();
                }
                self.active_id = Some(chat_id);
                self.messages.clear();
                Change {
                    active: true,
                    messages: true,
                    ..Change::default()
                }
            }
            WorkspaceUpdate::MessagesLoaded { chat_id, messages } => {
                if !self.is_active(&chat_id) {
                    return Change::default();
                }
                let settled = !self.in_flight.contains_key(&chat_id);
                let local = std::mem::take(&mut self.messages);
                self.messages = reconcile(local, messages, settled);
                self.restore_placeholder(&chat_id);
                Change::messages()
            }
            WorkspaceUpdate::ChatDeleted(chat_id) => {
                self.conversations.retain(|c| c.id != chat_id);
                self.in_flight.remove(&chat_id);
                if self.is_active(&chat_id) {
                    self.active_id = None;
                    self.messages.clear();
                    return Change::all();
                }
                Change::conversations()
            }
            WorkspaceUpdate::AllCleared => {
                self.conversations.clear();
                self.active_id = None;
                self.messages.clear();
                self.in_flight.clear();
                Change::all()
            }
            WorkspaceUpdate::ChatRenamed { chat_id, title } => {
                match self.conversations.iter_mut().find(|c| c.id == chat_id) {
                    Some(conversation) => {
                        conversation.title = Some(title);
                        Change::conversations()
                    }
                    None => Change::default(),
                }
            }
            WorkspaceUpdate::SendStarted { chat_id, message } => {
                self.in_flight.insert(chat_id.clone(), None);
                self.push_if_active(&chat_id, message)
            }
            WorkspaceUpdate::ReplyStarted {
                chat_id,
                message_id,
            } => {
                self.in_flight
                    .insert(chat_id.clone(), Some(message_id.clone()));
                let mut placeholder = Message::pending(Sender::Ai, "");
                placeholder.id = message_id;
                self.push_if_active(&chat_id, placeholder)
            }
            WorkspaceUpdate::ReplyProgress {
                chat_id,
                message_id,
                content,
            } => {
                if !self.is_active(&chat_id) {
                    return Change::default();
                }
                match self.messages.iter_mut().find(|m| m.id == message_id) {
                    Some(message) => message.content = content,
                    None if self.in_flight.get(&chat_id) == Some(&Some(message_id.clone())) => {
                        let mut placeholder = Message::pending(Sender::Ai, content);
                        placeholder.id = message_id;
                        self.messages.push(placeholder);
                    }
                    None => return Change::default(),
                }
                Change::messages()
            }
            WorkspaceUpdate::ReplyFinished { chat_id } => {
                self.in_flight.remove(&chat_id);
                Change {
                    active: self.is_active(&chat_id),
                    ..Change::default()
                }
            }
            WorkspaceUpdate::ErrorAppended { chat_id, message } => {
                self.push_if_active(&chat_id, message)
            }
            WorkspaceUpdate::SearchChanged(term) => {
                self.search_term = term;
                Change::conversations()
            }
            WorkspaceUpdate::Reset => {
                *self = WorkspaceState::default();
                Change::all()
            }
        }
    }

    fn push_if_active(&mut self, chat_id: &str, message: Message) -> Change {
        if !self.is_active(chat_id) {
            return Change::default();
        }
        self.messages.push(message);
        Change::messages()
    }

    /// After a refetch while a reply is still streaming, keep its placeholder visible.
    fn restore_placeholder(&mut self, chat_id: &str) {
        if let Some(Some(id)) = self.in_flight.get(chat_id) {
            if !self.messages.iter().any(|m| &m.id == id) {
                let mut placeholder = Message::pending(Sender::Ai, "");
                placeholder.id = id.clone();
                self.messages.push(placeholder);
            }
        }
    }
}

/// Merge a freshly fetched transcript with what is shown locally.
///
/// The fetched rows are authoritative. A pending local message is replaced by
/// the first unclaimed fetched row from the same sender whose content equals
/// either the shown text or the text that was actually sent. Pending messages
/// are grouped per send, each group opening with a user turn. Once `settled`
/// (no reply in flight) and a group has at least one stored row, its other
/// unmatched messages are stale and dropped; error notices always stay. What
/// remains stays at the tail in order.
pub fn reconcile(local: Vec<Message>, persisted: Vec<Message>, settled: bool) -> Vec<Message> {
    let mut claimed = vec![false; persisted.len()];

    for message in local.iter().filter(|m| !m.id.is_pending()) {
        if let Some(idx) = persisted.iter().position(|p| p.id == message.id) {
            claimed[idx] = true;
        }
    }

    let mut sends: Vec<Vec<Message>> = Vec::new();
    for message in local.into_iter().filter(|m| m.id.is_pending()) {
        match sends.last_mut() {
            Some(send) if message.sender != Sender::User => send.push(message),
            _ => sends.push(vec![message]),
        }
    }

    let mut tail = Vec::new();
    for send in sends {
        let mut stored = false;
        let mut unmatched = Vec::new();
        for message in send {
            let matched = (!message.is_error)
                .then(|| {
                    persisted.iter().enumerate().position(|(idx, p)| {
                        !claimed[idx] && p.sender == message.sender && is_stored_form(&message, p)
                    })
                })
                .flatten();

            match matched {
                Some(idx) => {
                    claimed[idx] = true;
                    stored = true;
                }
                None => unmatched.push(message),
            }
        }
        let drop_stale = settled && stored;
        tail.extend(unmatched.into_iter().filter(|m| m.is_error || !drop_stale));
    }

    let mut merged = persisted;
    merged.extend(tail);
    merged
}

fn is_stored_form(local: &Message, row: &Message) -> bool {
    let stored = row.content.trim();
    local.content.trim() == stored
        || local
            .sent_as
            .as_deref()
            .is_some_and(|sent| sent.trim() == stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conv(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            title: None,
            created_at: Utc::now(),
        }
    }

    fn persisted(id: &str, sender: Sender, content: &str) -> Message {
        Message {
            id: MessageId::Persisted(id.to_string()),
            ..Message::pending(sender, content)
        }
    }

    fn state_with(ids: &[&str], active: &str) -> WorkspaceState {
        let mut state = WorkspaceState::default();
        state.apply(WorkspaceUpdate::ChatsLoaded(ids.iter().map(|id| conv(id)).collect()));
        state.apply(WorkspaceUpdate::Select(active.to_string()));
        state
    }

    #[test]
    fn test_chats_loaded_auto_selects_newest() {
        let mut state = WorkspaceState::default();
        let change = state.apply(WorkspaceUpdate::ChatsLoaded(vec![conv("new"), conv("old")]));
        assert_eq!(state.active_id.as_deref(), Some("new"));
        assert!(change.active);

        let change = state.apply(WorkspaceUpdate::ChatsLoaded(vec![conv("newer"), conv("new")]));
        assert_eq!(state.active_id.as_deref(), Some("new"));
        assert!(!change.active);
    }

    #[test]
    fn test_deleting_active_clears_selection_and_messages() {
        let mut state = state_with(&["a", "b"], "b");
        state.apply(WorkspaceUpdate::SendStarted {
            chat_id: "b".into(),
            message: Message::pending(Sender::User, "hi"),
        });
        assert_eq!(state.messages.len(), 1);

        state.apply(WorkspaceUpdate::ChatDeleted("b".into()));
        assert!(state.conversation("b").is_none());
        assert_eq!(state.active_id, None);
        assert!(state.messages.is_empty());
        assert!(!state.is_sending("b"));
    }

    #[test]
    fn test_deleting_inactive_keeps_selection() {
        let mut state = state_with(&["a", "b"], "a");
        state.apply(WorkspaceUpdate::ChatDeleted("b".into()));
        assert_eq!(state.active_id.as_deref(), Some("a"));
        assert_eq!(state.conversations.len(), 1);
    }

    #[test]
    fn test_stream_progress_rewrites_placeholder_in_place() {
        let mut state = state_with(&["a"], "a");
        let chunks = ["Hel", "lo, ", "wor", "ld"];
        let id = MessageId::pending();
        state.apply(WorkspaceUpdate::SendStarted {
            chat_id: "a".into(),
            message: Message::pending(Sender::User, "Hi"),
        });
        state.apply(WorkspaceUpdate::ReplyStarted {
            chat_id: "a".into(),
            message_id: id.clone(),
        });
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "");

        let mut acc = String::new();
        for (k, chunk) in chunks.iter().enumerate() {
            acc.push_str(chunk);
            state.apply(WorkspaceUpdate::ReplyProgress {
                chat_id: "a".into(),
                message_id: id.clone(),
                content: acc.clone(),
            });
            assert_eq!(state.messages[1].content, chunks[..=k].concat());
            assert_eq!(state.messages[1].id, id);
            assert_eq!(state.messages.len(), 2);
        }
        assert!(!state.can_send());
        assert_eq!(state.streaming_message("a"), Some(&id));
        state.apply(WorkspaceUpdate::ReplyFinished { chat_id: "a".into() });
        assert!(state.can_send());
        assert_eq!(state.streaming_message("a"), None);
    }

    #[test]
    fn test_updates_for_inactive_chat_are_inert() {
        let mut state = state_with(&["a", "b"], "a");
        let change = state.apply(WorkspaceUpdate::ErrorAppended {
            chat_id: "b".into(),
            message: Message::error("Connection failed"),
        });
        assert_eq!(change, Change::default());
        assert!(state.messages.is_empty());

        let change = state.apply(WorkspaceUpdate::MessagesLoaded {
            chat_id: "b".into(),
            messages: vec![persisted("1", Sender::User, "x")],
        });
        assert_eq!(change, Change::default());
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_second_send_rejected_while_in_flight() {
        let mut state = state_with(&["a", "b"], "a");
        state.apply(WorkspaceUpdate::SendStarted {
            chat_id: "a".into(),
            message: Message::pending(Sender::User, "one"),
        });
        assert!(!state.can_send());
        state.apply(WorkspaceUpdate::Select("b".into()));
        assert!(state.can_send());
    }

    #[test]
    fn test_reconcile_replaces_matching_pending() {
        let local = vec![
            persisted("1", Sender::User, "hello"),
            persisted("2", Sender::Ai, "hi!"),
            Message::pending(Sender::User, "hello"),
            Message::pending(Sender::Ai, "second answer"),
            Message::error("Connection failed"),
        ];
        let fetched = vec![
            persisted("1", Sender::User, "hello"),
            persisted("2", Sender::Ai, "hi!"),
            persisted("3", Sender::User, "hello"),
            persisted("4", Sender::Ai, "second answer\n"),
        ];

        let merged = reconcile(local, fetched, true);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(&ids[..4], &["1", "2", "3", "4"]);
        assert_eq!(merged.len(), 5);
        assert!(merged[4].is_error);
    }

    #[test]
    fn test_reconcile_keeps_unmatched_pending_at_tail() {
        let pending = Message::pending(Sender::User, "not stored yet");
        let merged = reconcile(
            vec![pending.clone()],
            vec![persisted("1", Sender::User, "earlier")],
            true,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1], pending);
    }

    #[test]
    fn test_reconcile_matches_persona_prefixed_row() {
        let prefix = crate::models::persona::find("dev").prompt;
        let mut user = Message::pending(Sender::User, "Hello");
        user.sent_as = Some(format!("{}Hello", prefix));
        let local = vec![user, Message::pending(Sender::Ai, "Hi there")];
        let fetched = vec![
            persisted("1", Sender::User, &format!("{}Hello", prefix)),
            persisted("2", Sender::Ai, "Hi there"),
        ];

        let merged = reconcile(local, fetched, true);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_reconcile_drops_stale_turn_once_stored() {
        let local = vec![
            Message::pending(Sender::User, "Hello"),
            Message::pending(Sender::Ai, "Hi there, partial"),
        ];
        let fetched = vec![
            persisted("1", Sender::User, "Hello"),
            persisted("2", Sender::Ai, "Hi there, in full"),
        ];

        let settled = reconcile(local.clone(), fetched.clone(), true);
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|m| !m.id.is_pending()));

        let streaming = reconcile(local, fetched, false);
        assert_eq!(streaming.len(), 3);
        assert_eq!(streaming[2].content, "Hi there, partial");
    }

    #[test]
    fn test_reconcile_keeps_error_and_unstored_turn() {
        let local = vec![
            Message::pending(Sender::User, "Hello"),
            Message::error("Connection failed"),
        ];
        let merged = reconcile(local, vec![persisted("1", Sender::User, "earlier")], true);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].content, "Hello");
        assert!(merged[2].is_error);
    }

    #[test]
    fn test_finished_reply_refetch_shows_turn_once() {
        let mut state = state_with(&["a"], "a");
        let id = MessageId::pending();
        let mut user = Message::pending(Sender::User, "Hello");
        user.sent_as = Some("[SYSTEM: be brief] Hello".into());
        state.apply(WorkspaceUpdate::SendStarted {
            chat_id: "a".into(),
            message: user,
        });
        state.apply(WorkspaceUpdate::ReplyStarted {
            chat_id: "a".into(),
            message_id: id.clone(),
        });
        state.apply(WorkspaceUpdate::ReplyProgress {
            chat_id: "a".into(),
            message_id: id,
            content: "Hi there".into(),
        });
        state.apply(WorkspaceUpdate::ReplyFinished { chat_id: "a".into() });
        state.apply(WorkspaceUpdate::MessagesLoaded {
            chat_id: "a".into(),
            messages: vec![
                persisted("1", Sender::User, "[SYSTEM: be brief] Hello"),
                persisted("2", Sender::Ai, "Hi there"),
            ],
        });

        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_refetch_during_stream_keeps_placeholder() {
        let mut state = state_with(&["a", "b"], "a");
        let id = MessageId::pending();
        state.apply(WorkspaceUpdate::SendStarted {
            chat_id: "a".into(),
            message: Message::pending(Sender::User, "Hi"),
        });
        state.apply(WorkspaceUpdate::ReplyStarted {
            chat_id: "a".into(),
            message_id: id.clone(),
        });
        state.apply(WorkspaceUpdate::Select("b".into()));
        state.apply(WorkspaceUpdate::Select("a".into()));
        state.apply(WorkspaceUpdate::MessagesLoaded {
            chat_id: "a".into(),
            messages: vec![persisted("1", Sender::User, "Hi")],
        });
        state.apply(WorkspaceUpdate::ReplyProgress {
            chat_id: "a".into(),
            message_id: id.clone(),
            content: "partial".into(),
        });
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].id, id);
        assert_eq!(state.messages[1].content, "partial");
    }

    #[test]
    fn test_search_filters_by_title() {
        let mut state = WorkspaceState::default();
        let mut rust = conv("1");
        rust.title = Some("Rust Lifetimes".into());
        state.apply(WorkspaceUpdate::ChatsLoaded(vec![rust, conv("2")]));
        state.apply(WorkspaceUpdate::SearchChanged("LIFE".into()));
        let visible: Vec<&str> = state
            .filtered_conversations()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(visible, vec!["1"]);
    }
}
