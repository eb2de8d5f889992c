use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(deserialize_with = "super::id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Title as shown in the sidebar; rows created before a first send have none.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_TITLE,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.display_title() == DEFAULT_TITLE
    }

    pub fn matches_filter(&self, term: &str) -> bool {
        self.display_title()
            .to_lowercase()
            .contains(&term.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(title: Option<&str>) -> Conversation {
        Conversation {
            id: "1".into(),
            title: title.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_title_reads_as_default() {
        assert_eq!(conv(None).display_title(), "New Chat");
        assert_eq!(conv(Some("")).display_title(), "New Chat");
        assert!(conv(None).has_default_title());
        assert!(!conv(Some("Rust lifetimes")).has_default_title());
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        assert!(conv(Some("Rust Lifetimes")).matches_filter("lifetimes"));
        assert!(conv(None).matches_filter("new"));
        assert!(!conv(Some("Cooking")).matches_filter("rust"));
    }

    #[test]
    fn test_deserialize_numeric_id() {
        let json = r#"{"id": 42, "user_id": "u", "title": null, "created_at": "2024-05-01T10:00:00Z"}"#;
        let c: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(c.id, "42");
        assert_eq!(c.title, None);
    }
}
