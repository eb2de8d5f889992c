use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use lru::LruCache;
use reqwest::Client;

use crate::providers::ChatBackend;

/// Downloaded bodies kept across re-renders and chat switches.
const MAX_CACHED_DOWNLOADS: usize = 48;

/// Image bytes ready to hand to a texture, plus the credit line if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub bytes: Bytes,
    pub photographer: Option<String>,
}

/// Turns `GENERATE_IMAGE` queries and remote attachment URLs into bytes.
///
/// Every query resolves on its own; message widgets keep one result per
/// directive so re-renders do not repeat the lookup. Downloads are cached by
/// URL in a bounded LRU.
pub struct ImageResolver {
    backend: Arc<dyn ChatBackend>,
    client: Client,
    access_token: RwLock<String>,
    by_url: Mutex<LruCache<String, Bytes>>,
}

impl ImageResolver {
    pub fn new(backend: Arc<dyn ChatBackend>, access_token: impl Into<String>) -> Self {
        Self::with_capacity(backend, access_token, MAX_CACHED_DOWNLOADS)
    }

    fn with_capacity(
        backend: Arc<dyn ChatBackend>,
        access_token: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            client: Client::new(),
            access_token: RwLock::new(access_token.into()),
            by_url: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn set_access_token(&self, token: &str) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token.to_string();
        }
    }

    fn token(&self) -> String {
        self.access_token
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub async fn resolve_query(&self, query: &str) -> Result<ResolvedImage> {
        let generated = self
            .backend
            .generate_image(query, &self.token())
            .await
            .with_context(|| format!("Image lookup failed for '{}'", query))?;
        let bytes = self.fetch_url(&generated.url).await?;

        Ok(ResolvedImage {
            bytes,
            photographer: generated.photographer.filter(|p| !p.trim().is_empty()),
        })
    }

    pub async fn fetch_url(&self, url: &str) -> Result<Bytes> {
        if let Some(hit) = self
            .by_url
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(url).cloned())
        {
            return Ok(hit);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Download of {} failed with status {}",
                url,
                response.status()
            ));
        }
        let bytes = response.bytes().await.context("Failed to read image body")?;

        if let Ok(mut cache) = self.by_url.lock() {
            if let Some((evicted, _)) = cache.push(url.to_string(), bytes.clone()) {
                if evicted != url {
                    tracing::debug!("Evicted cached download {}", evicted);
                }
            }
        }
        Ok(bytes)
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.by_url.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatRequest, GeneratedImage, ProviderError, StreamEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedImage {
        url: String,
        photographer: Option<String>,
        calls: AtomicUsize,
        tokens: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatBackend for FixedImage {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn generate_image(
            &self,
            query: &str,
            access_token: &str,
        ) -> Result<GeneratedImage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(access_token.to_string());
            if query == "nothing" {
                return Err(ProviderError::InvalidResponse("No image URL".into()));
            }
            Ok(GeneratedImage {
                url: self.url.clone(),
                photographer: self.photographer.clone(),
            })
        }
    }

    fn backend(url: String) -> Arc<FixedImage> {
        Arc::new(FixedImage {
            url,
            photographer: Some("Jane Doe".into()),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_each_query_resolves_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(format!("{}/cat.jpg", server.uri()));
        let resolver = ImageResolver::new(backend.clone(), "tok");

        let first = resolver.resolve_query("a cat").await.unwrap();
        let second = resolver.resolve_query("a cat").await.unwrap();

        assert_eq!(first.bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(first.photographer.as_deref(), Some("Jane Doe"));
        assert_eq!(first, second);
        // Two lookups, one download of the shared URL
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_download_cache_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8]))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8]))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = ImageResolver::with_capacity(backend(String::new()), "tok", 1);
        let a = format!("{}/a.png", server.uri());
        let b = format!("{}/b.png", server.uri());
        resolver.fetch_url(&a).await.unwrap();
        resolver.fetch_url(&b).await.unwrap();
        resolver.fetch_url(&b).await.unwrap();
        resolver.fetch_url(&a).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_forgets_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8]))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = ImageResolver::new(backend(String::new()), "tok");
        let a = format!("{}/a.png", server.uri());
        resolver.fetch_url(&a).await.unwrap();
        resolver.clear();
        resolver.fetch_url(&a).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_query_propagates_lookup_failure() {
        let resolver = ImageResolver::new(backend("http://unused".into()), "tok");
        let err = resolver.resolve_query("nothing").await.unwrap_err();
        assert!(format!("{:#}", err).contains("No image URL"));
    }

    #[tokio::test]
    async fn test_fetch_url_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = ImageResolver::new(backend(String::new()), "tok");
        let result = resolver
            .fetch_url(&format!("{}/missing.png", server.uri()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_token_update_is_used_for_lookups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8]))
            .mount(&server)
            .await;

        let backend = backend(format!("{}/x.png", server.uri()));
        let resolver = ImageResolver::new(backend.clone(), "old");
        resolver.set_access_token("new");
        resolver.resolve_query("dog").await.unwrap();

        assert_eq!(backend.tokens.lock().unwrap().as_slice(), &["new".to_string()]);
    }
}
