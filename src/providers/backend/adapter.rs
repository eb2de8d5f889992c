use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;

use super::models::{ErrorBody, ImageResponse};
use super::stream::forward_text_stream;
use crate::models::Attachment;
use crate::providers::traits::ChatBackend;
use crate::providers::types::{ChatRequest, GeneratedImage, ProviderError, StreamEvent};

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// `base_url` is expected to be normalized already (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn build_auth_header(access_token: &str) -> Option<String> {
        if access_token.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", access_token))
        }
    }

    fn file_part(file: Attachment) -> Result<Part, ProviderError> {
        Part::bytes(file.data)
            .file_name(file.file_name)
            .mime_str(&file.mime_type)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid attachment type: {}", e)))
    }

    fn build_chat_form(request: ChatRequest) -> Result<Form, ProviderError> {
        let mut form = Form::new().text("chat_id", request.chat_id);
        if let Some(message) = request.message.filter(|m| !m.is_empty()) {
            form = form.text("message", message);
        }
        if let Some(file) = request.file {
            form = form.part("file", Self::file_part(file)?);
        }
        Ok(form)
    }

    /// The backend's `detail` when it sent one, else the status line.
    pub(crate) fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Some(detail) = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message())
        {
            return detail;
        }
        format!(
            "Server Error {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = Self::parse_error_message(status, &body);
        tracing::warn!("Backend returned {}: {}", status, message);
        Err(ProviderError::RequestFailed(message))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let url = self.endpoint("chat");
        tracing::debug!("Posting chat turn to {}: {:?}", url, request);

        let auth = Self::build_auth_header(&request.access_token);
        let form = Self::build_chat_form(request)?;

        let mut req = self.client.post(&url).multipart(form);
        if let Some(auth) = auth {
            req = req.header("Authorization", auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        let response = Self::check_status(response).await?;

        if tx.send(StreamEvent::Opened).await.is_err() {
            return Ok(()); // receiver dropped
        }
        forward_text_stream(response.bytes_stream(), tx).await;

        Ok(())
    }

    async fn generate_image(
        &self,
        query: &str,
        access_token: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        let form = Form::new().text("query", query.to_string());

        let mut req = self.client.post(self.endpoint("image")).multipart(form);
        if let Some(auth) = Self::build_auth_header(access_token) {
            req = req.header("Authorization", auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse image response: {}", e)))?;

        match body.url.filter(|u| !u.is_empty()) {
            Some(url) => Ok(GeneratedImage {
                url,
                photographer: body.photographer.filter(|p| !p.is_empty()),
            }),
            None => Err(ProviderError::InvalidResponse("No image URL in response".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(message: Option<&str>) -> ChatRequest {
        ChatRequest {
            access_token: "token-1".into(),
            chat_id: "chat-9".into(),
            message: message.map(String::from),
            file: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_parse_error_prefers_detail() {
        let msg = HttpBackend::parse_error_message(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"detail":"rate limited"}"#,
        );
        assert_eq!(msg, "rate limited");
    }

    #[test]
    fn test_parse_error_falls_back_to_status() {
        let msg = HttpBackend::parse_error_message(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(msg, "Server Error 502: Bad Gateway");
        let msg = HttpBackend::parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert_eq!(msg, "Server Error 500: Internal Server Error");
    }

    #[tokio::test]
    async fn test_stream_chat_posts_multipart_and_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header("Authorization", "Bearer token-1"))
            .and(body_string_contains("name=\"chat_id\""))
            .and(body_string_contains("chat-9"))
            .and(body_string_contains("name=\"message\""))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hi there"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri());
        let (tx, rx) = mpsc::channel(16);
        backend.stream_chat(request(Some("Hello")), tx).await.unwrap();

        let events = drain(rx).await;
        assert_eq!(events.first(), Some(&StreamEvent::Opened));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_stream_chat_omits_empty_message_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_string_contains("name=\"message\""))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri());
        let (tx, rx) = mpsc::channel(16);
        let mut req = request(None);
        req.file = Some(Attachment::new("notes.txt", "text/plain", b"abc".to_vec()));
        backend.stream_chat(req, tx).await.unwrap();
        assert_eq!(drain(rx).await.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_stream_chat_surfaces_detail_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string(r#"{"detail":"rate limited"}"#),
            )
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri());
        let (tx, _rx) = mpsc::channel(16);
        let err = backend.stream_chat(request(Some("Hello")), tx).await.unwrap_err();
        assert_eq!(err.user_message(), "rate limited");
    }

    #[tokio::test]
    async fn test_stream_chat_connection_refused() {
        let backend = HttpBackend::new("http://127.0.0.1:1");
        let (tx, _rx) = mpsc::channel(16);
        let err = backend.stream_chat(request(Some("Hello")), tx).await.unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
        assert_eq!(err.user_message(), "Connection failed");
    }

    #[tokio::test]
    async fn test_generate_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/image"))
            .and(body_string_contains("sunset over water"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://images.example.com/1.jpg",
                "photographer": "Jane Doe"
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri());
        let image = backend.generate_image("sunset over water", "t").await.unwrap();
        assert_eq!(image.url, "https://images.example.com/1.jpg");
        assert_eq!(image.photographer.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn test_generate_image_without_url_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "photographer": "Jane Doe"
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri());
        let err = backend.generate_image("cat", "t").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
