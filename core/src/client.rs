//! Client for the cat API, built on `RequestExecutor`.
//!
//! # Design
//! `GalleryClient` owns nothing but a base URL, the request defaults from
//! `ClientConfig`, and an executor. `build_*` methods produce descriptors and
//! are pure; the operations hand those descriptors to the executor.

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::debug;

use crate::cache::ImageCache;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::RequestError;
use crate::executor::RequestExecutor;
use crate::http::{HttpMethod, RequestBuilder, RequestDescriptor};
use crate::pending::Pending;
use crate::transport::{TaskId, Transport, UreqTransport};
use crate::types::{filter_by_tag, Cat};

/// Lists cats, searches them by tag and loads their images.
#[derive(Clone)]
pub struct GalleryClient {
    base_url: String,
    config: ClientConfig,
    executor: RequestExecutor,
}

impl GalleryClient {
    /// A client over an existing executor.
    pub fn new(config: ClientConfig, executor: RequestExecutor) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            executor,
        }
    }

    /// A client that talks HTTP through ureq, running on `runtime`.
    pub fn connect(config: ClientConfig, runtime: Handle, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(UreqTransport::new(runtime.clone()));
        Self::with_transport(config, transport, runtime, dispatcher)
    }

    /// A client over any transport, with the executor configured from `config`.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        runtime: Handle,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let cache = match config.image_cache_max_bytes {
            Some(max) => ImageCache::with_max_bytes(max),
            None => ImageCache::new(),
        };
        let executor = RequestExecutor::builder(transport, runtime)
            .dispatcher(dispatcher)
            .image_cache(cache)
            .image_timeout(config.image_timeout())
            .build();
        Self::new(config, executor)
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn build_list_cats(&self, tag: Option<&str>) -> RequestDescriptor {
        let mut builder = RequestBuilder::new(format!("{}/api/cats", self.base_url), HttpMethod::Get)
            .header("accept", "application/json")
            .cache_policy(self.config.cache_policy)
            .timeout(self.config.request_timeout());
        if let Some(tag) = tag {
            builder = builder.query("tags", Some(tag));
        }
        builder.build()
    }

    /// URL of the image for a cat id, or of a random cat carrying a tag.
    pub fn image_url(&self, id_or_tag: &str) -> String {
        format!("{}/cat/{id_or_tag}", self.base_url)
    }

    pub fn list_cats(&self, tag: Option<&str>) -> Pending<Vec<Cat>> {
        self.executor.fetch(&self.build_list_cats(tag))
    }

    /// Load an image, reporting transport-level failures as image errors.
    pub async fn cat_image(&self, id_or_tag: &str) -> Result<Bytes, RequestError> {
        self.executor
            .download_image(&self.image_url(id_or_tag))
            .await
            .map_err(RequestError::into_image_error)
    }

    /// Callback form of `list_cats`. Returns the transport task, if one was started.
    pub fn list_cats_with<F>(&self, tag: Option<&str>, callback: F) -> Option<TaskId>
    where
        F: FnOnce(Result<Vec<Cat>, RequestError>) + Send + 'static,
    {
        self.executor.fetch_with(&self.build_list_cats(tag), callback)
    }

    /// Callback form of `cat_image`. No task is started when the image is cached.
    pub fn cat_image_with<F>(&self, id_or_tag: &str, callback: F) -> Option<TaskId>
    where
        F: FnOnce(Result<Bytes, RequestError>) + Send + 'static,
    {
        self.executor
            .download_image_with(&self.image_url(id_or_tag), move |result| {
                callback(result.map_err(RequestError::into_image_error))
            })
    }

    /// Cats in `known` tagged `tag`; when none are, the server's list for `tag`.
    ///
    /// An absent or empty tag returns `known` unchanged.
    pub async fn search_cats(&self, known: &[Cat], tag: Option<&str>) -> Result<Vec<Cat>, RequestError> {
        let tag = match tag {
            Some(tag) if !tag.is_empty() => tag,
            _ => return Ok(known.to_vec()),
        };
        let local = filter_by_tag(known, tag);
        if !local.is_empty() {
            return Ok(local.into_iter().cloned().collect());
        }
        debug!(tag, "no local match; asking the server");
        self.list_cats(Some(tag)).await
    }

    pub fn cancel_current(&self) {
        self.executor.cancel_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Immediate;
    use crate::error::ErrorCause;
    use crate::http::TransportOutcome;
    use crate::transport::{FakeTransport, TransportError};
    use std::time::Duration;

    const CATS: &[u8] = br#"[
        {"_id":"a1","tags":["cute"],"createdAt":"2024-03-01T10:00:00Z","updatedAt":"2024-03-01T10:00:00Z"},
        {"_id":"b2","tags":["orange","fat"],"owner":"Ann","createdAt":"2024-03-02T10:00:00Z","updatedAt":"2024-03-02T10:00:00Z"}
    ]"#;

    fn client(transport: &FakeTransport) -> GalleryClient {
        GalleryClient::with_transport(
            ClientConfig::default().with_base_url("http://localhost:3000/"),
            Arc::new(transport.clone()),
            Handle::current(),
            Arc::new(Immediate),
        )
    }

    fn sample_cats() -> Vec<Cat> {
        serde_json::from_slice(CATS).unwrap()
    }

    #[tokio::test]
    async fn build_list_cats_without_tag() {
        let req = client(&FakeTransport::new()).build_list_cats(None);
        assert_eq!(req.method(), HttpMethod::Get);
        assert_eq!(req.url(), "http://localhost:3000/api/cats");
        assert_eq!(req.timeout(), Duration::from_secs(30));
        assert_eq!(req.header_values("accept").collect::<Vec<_>>(), vec!["application/json"]);
    }

    #[tokio::test]
    async fn build_list_cats_with_tag() {
        let req = client(&FakeTransport::new()).build_list_cats(Some("cute"));
        assert_eq!(req.url(), "http://localhost:3000/api/cats?tags=cute");
    }

    #[tokio::test]
    async fn image_url_strips_trailing_slash_of_base() {
        let c = client(&FakeTransport::new());
        assert_eq!(c.image_url("a1"), "http://localhost:3000/cat/a1");
    }

    #[tokio::test]
    async fn list_cats_decodes_the_list() {
        let transport = FakeTransport::new();
        transport.respond_with(TransportOutcome::http("u", 200, Some(CATS)));
        let cats = client(&transport).list_cats(None).await.unwrap();
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[1].owner.as_deref(), Some("Ann"));
    }

    #[tokio::test]
    async fn search_prefers_local_matches() {
        let transport = FakeTransport::new();
        let found = client(&transport)
            .search_cats(&sample_cats(), Some("ORANGE"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b2");
        assert_eq!(transport.data_task_count(), 0);
    }

    #[tokio::test]
    async fn search_falls_back_to_the_server() {
        let transport = FakeTransport::new();
        transport.respond_with(TransportOutcome::http(
            "u",
            200,
            Some(br#"[{"_id":"z9","tags":["grumpy"],"createdAt":"2024-03-01T10:00:00Z","updatedAt":"2024-03-01T10:00:00Z"}]"#),
        ));
        let found = client(&transport)
            .search_cats(&sample_cats(), Some("grumpy"))
            .await
            .unwrap();
        assert_eq!(found[0].id, "z9");
        assert_eq!(transport.requests()[0].url(), "http://localhost:3000/api/cats?tags=grumpy");
    }

    #[tokio::test]
    async fn search_without_tag_returns_known_list() {
        let transport = FakeTransport::new();
        let c = client(&transport);
        assert_eq!(c.search_cats(&sample_cats(), None).await.unwrap().len(), 2);
        assert_eq!(c.search_cats(&sample_cats(), Some("")).await.unwrap().len(), 2);
        assert_eq!(transport.data_task_count(), 0);
    }

    #[tokio::test]
    async fn cat_image_failures_render_as_image_errors() {
        let transport = FakeTransport::new();
        transport.respond_with(TransportOutcome::failed(TransportError::Io("offline".into())));
        let err = client(&transport).cat_image("a1").await.unwrap_err();
        assert_eq!(err, RequestError::DownloadImageError(ErrorCause::msg("offline")));
        assert_eq!(err.user_message(), "Unable to load image");
        assert_eq!(transport.requests()[0].url(), "http://localhost:3000/cat/a1");
    }

    #[tokio::test]
    async fn callback_forms_report_through_the_dispatcher() {
        let transport = FakeTransport::new();
        transport.respond_with(TransportOutcome::failed(TransportError::TimedOut(Duration::from_secs(60))));
        transport.respond_with(TransportOutcome::http("u", 200, Some(CATS)));
        let c = client(&transport);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = c.cat_image_with("a1", move |result| {
            let _ = tx.send(result);
        });
        assert!(id.is_some());
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, RequestError::DownloadImageError(_)));

        let (tx, rx) = tokio::sync::oneshot::channel();
        c.list_cats_with(Some("cute"), move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cat_image_keeps_server_errors() {
        let transport = FakeTransport::new();
        transport.respond_with(TransportOutcome::http("u", 500, Some(b"boom")));
        let err = client(&transport).cat_image("a1").await.unwrap_err();
        assert_eq!(err, RequestError::ServerError { status_code: 500 });
    }
}
