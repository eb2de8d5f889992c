use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use super::check_status;
use super::models::{NewChat, TitlePatch};
use crate::models::{Conversation, MessageRow};
use crate::providers::traits::ChatStore;
use crate::providers::types::ProviderError;

/// PostgREST client for the `chats` and `messages` tables.
pub struct SupabaseRest {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseRest {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authorize(&self, req: RequestBuilder, access_token: &str) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
    }

    async fn send(req: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        check_status(response).await
    }

    /// PostgREST filter for one id or a set of ids.
    fn id_filter(ids: &[String]) -> String {
        match ids {
            [single] => format!("eq.{}", single),
            many => format!("in.({})", many.join(",")),
        }
    }
}

#[async_trait]
impl ChatStore for SupabaseRest {
    async fn list_chats(&self, access_token: &str) -> Result<Vec<Conversation>, ProviderError> {
        let req = self
            .client
            .get(self.table("chats"))
            .query(&[("select", "*"), ("order", "created_at.desc")]);

        Self::send(self.authorize(req, access_token))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse chats: {}", e)))
    }

    async fn create_chat(
        &self,
        access_token: &str,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, ProviderError> {
        let req = self
            .client
            .post(self.table("chats"))
            .header("Prefer", "return=representation")
            .json(&[NewChat { user_id, title }]);

        let mut rows: Vec<Conversation> = Self::send(self.authorize(req, access_token))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse new chat: {}", e)))?;

        if rows.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Insert returned no rows".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn rename_chat(
        &self,
        access_token: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<(), ProviderError> {
        let req = self
            .client
            .patch(self.table("chats"))
            .query(&[("id", format!("eq.{}", chat_id))])
            .json(&TitlePatch { title });

        Self::send(self.authorize(req, access_token)).await?;
        Ok(())
    }

    async fn delete_chats(&self, access_token: &str, ids: &[String]) -> Result<(), ProviderError> {
        if ids.is_empty() {
            return Ok(());
        }
        let req = self
            .client
            .delete(self.table("chats"))
            .query(&[("id", Self::id_filter(ids))]);

        Self::send(self.authorize(req, access_token)).await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        access_token: &str,
        chat_id: &str,
    ) -> Result<Vec<MessageRow>, ProviderError> {
        let chat_filter = format!("eq.{}", chat_id);
        let req = self.client.get(self.table("messages")).query(&[
            ("select", "*"),
            ("chat_id", chat_filter.as_str()),
            ("order", "created_at.asc"),
        ]);

        Self::send(self.authorize(req, access_token))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse messages: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> SupabaseRest {
        SupabaseRest::new(server.uri(), "anon-key")
    }

    #[test]
    fn test_id_filter() {
        assert_eq!(SupabaseRest::id_filter(&["a".into()]), "eq.a");
        assert_eq!(
            SupabaseRest::id_filter(&["a".into(), "b".into()]),
            "in.(a,b)"
        );
    }

    #[tokio::test]
    async fn test_list_chats_sends_keys_and_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/chats"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "c2", "user_id": "u", "title": "Second", "created_at": "2024-05-02T10:00:00Z"},
                {"id": "c1", "user_id": "u", "title": null, "created_at": "2024-05-01T10:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let chats = store(&server).list_chats("at").await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].display_title(), "Second");
        assert_eq!(chats[1].display_title(), "New Chat");
    }

    #[tokio::test]
    async fn test_create_chat_returns_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/chats"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(serde_json::json!([{"user_id": "u1", "title": "New Chat"}])))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([
                {"id": "c9", "user_id": "u1", "title": "New Chat", "created_at": "2024-05-03T10:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let chat = store(&server).create_chat("at", "u1", "New Chat").await.unwrap();
        assert_eq!(chat.id, "c9");
    }

    #[tokio::test]
    async fn test_delete_many_uses_in_filter() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/chats"))
            .and(query_param("id", "in.(c1,c2)"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .delete_chats("at", &["c1".into(), "c2".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rename_chat() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/chats"))
            .and(query_param("id", "eq.c1"))
            .and(body_json(serde_json::json!({"title": "Hello"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).rename_chat("at", "c1", "Hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_messages_and_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/messages"))
            .and(query_param("chat_id", "eq.c1"))
            .and(query_param("order", "created_at.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "chat_id": "c1", "sender": "user", "content": "Hi", "file_url": null, "created_at": "2024-05-01T10:00:00Z"},
                {"id": 2, "chat_id": "c1", "sender": "ai", "content": "Hello!", "file_url": null, "created_at": "2024-05-01T10:00:01Z"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/messages"))
            .and(query_param("chat_id", "eq.c2"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "JWT expired"})),
            )
            .mount(&server)
            .await;

        let rows = store(&server).list_messages("at", "c1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].content.as_deref(), Some("Hello!"));

        let err = store(&server).list_messages("at", "c2").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthError(m) if m == "JWT expired"));
    }
}
