//! Runs request descriptors through a transport and tracks them until they finish.
//!
//! # Design
//! The executor is an ordinary value built with an injected transport and a
//! runtime handle; there is no process-wide instance. In-flight tasks live in
//! one table behind a mutex, keyed by `TaskId`, together with the id of the
//! most recently submitted task for `cancel_current`.
//!
//! When a transport reports completion, the handler hops onto the runtime
//! before doing anything else, so classification and decoding never run on
//! the thread that submitted the request. The task is removed from the table
//! before its result is delivered. The handler holds only a weak reference to
//! the executor: dropping the executor mid-flight still delivers the result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::ImageCache;
use crate::dispatch::{Dispatcher, Immediate};
use crate::error::{classify, ErrorCause, RequestError};
use crate::http::{HttpMethod, RequestBuilder, RequestDescriptor, TransportOutcome};
use crate::pending::{self, Pending, Responder};
use crate::transport::{CompletionHandler, DataTask, TaskId, Transport};

/// Timeout used for image downloads.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct TaskTable {
    in_flight: HashMap<TaskId, Arc<dyn DataTask>>,
    current: Option<TaskId>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    dispatcher: Arc<dyn Dispatcher>,
    image_cache: ImageCache,
    image_timeout: Duration,
    tasks: Mutex<TaskTable>,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, TaskTable> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, id: TaskId) {
        let mut tasks = self.tasks();
        if tasks.in_flight.remove(&id).is_some() {
            debug!(task = %id, "task completed");
        }
        if tasks.current == Some(id) {
            tasks.current = None;
        }
    }
}

/// Configures a `RequestExecutor`.
pub struct ExecutorBuilder {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    dispatcher: Arc<dyn Dispatcher>,
    image_cache: ImageCache,
    image_timeout: Duration,
}

impl ExecutorBuilder {
    /// Where callback-style operations run their callbacks. Defaults to `Immediate`.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn image_cache(mut self, cache: ImageCache) -> Self {
        self.image_cache = cache;
        self
    }

    pub fn image_timeout(mut self, timeout: Duration) -> Self {
        self.image_timeout = timeout;
        self
    }

    pub fn build(self) -> RequestExecutor {
        RequestExecutor {
            inner: Arc::new(Inner {
                transport: self.transport,
                runtime: self.runtime,
                dispatcher: self.dispatcher,
                image_cache: self.image_cache,
                image_timeout: self.image_timeout,
                tasks: Mutex::new(TaskTable::default()),
            }),
        }
    }
}

/// Submits requests, tracks them while in flight, and delivers typed results.
///
/// Cloning is cheap and clones share the same task table and image cache.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl RequestExecutor {
    /// An executor with an unbounded image cache and the `Immediate` dispatcher.
    pub fn new(transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        Self::builder(transport, runtime).build()
    }

    pub fn builder(transport: Arc<dyn Transport>, runtime: Handle) -> ExecutorBuilder {
        ExecutorBuilder {
            transport,
            runtime,
            dispatcher: Arc::new(Immediate),
            image_cache: ImageCache::new(),
            image_timeout: IMAGE_TIMEOUT,
        }
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.inner.image_cache
    }

    /// Hand `descriptor` to the transport, track it, and start it.
    ///
    /// `on_complete` is called by the transport when the task finishes. It is
    /// the caller's job to eventually call `complete` with the returned id.
    pub fn submit(&self, descriptor: &RequestDescriptor, on_complete: CompletionHandler) -> TaskId {
        let task = self.inner.transport.data_task(descriptor, on_complete);
        let id = task.id();
        {
            let mut tasks = self.inner.tasks();
            tasks.in_flight.insert(id, Arc::clone(&task));
            tasks.current = Some(id);
        }
        debug!(task = %id, method = %descriptor.method(), url = descriptor.url(), "submitting request");
        task.resume();
        id
    }

    /// Cancel and forget the most recently submitted task, if it is still tracked.
    pub fn cancel_current(&self) {
        let task = {
            let mut tasks = self.inner.tasks();
            match tasks.current.take() {
                Some(id) => tasks.in_flight.remove(&id),
                None => None,
            }
        };
        if let Some(task) = task {
            debug!(task = %task.id(), "cancelling current task");
            task.cancel();
        }
    }

    /// Cancel and forget the task `id`. No-op for unknown ids.
    pub fn cancel(&self, id: TaskId) {
        let task = {
            let mut tasks = self.inner.tasks();
            if tasks.current == Some(id) {
                tasks.current = None;
            }
            tasks.in_flight.remove(&id)
        };
        if let Some(task) = task {
            debug!(task = %id, "cancelling task");
            task.cancel();
        }
    }

    /// Stop tracking `id`. Safe to call more than once.
    pub fn complete(&self, id: TaskId) {
        self.inner.complete(id);
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.tasks().in_flight.len()
    }

    pub fn is_in_flight(&self, id: TaskId) -> bool {
        self.inner.tasks().in_flight.contains_key(&id)
    }

    /// The most recently submitted task, while it is still tracked.
    pub fn current(&self) -> Option<TaskId> {
        self.inner.tasks().current
    }

    /// Fetch `descriptor` and decode the JSON body into `T`.
    pub fn fetch<T>(&self, descriptor: &RequestDescriptor) -> Pending<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if let Err(e) = Url::parse(descriptor.url()) {
            warn!(url = descriptor.url(), error = %e, "refusing to fetch unparseable url");
            return Pending::ready(Err(RequestError::InvalidUrl(descriptor.url().to_string())));
        }
        let (responder, pending) = pending::channel();
        let handler = self.completion(responder, decode_json::<T>);
        let id = self.submit(descriptor, handler);
        pending.with_task(id)
    }

    /// Like `fetch`, delivering the result to `callback` through the dispatcher.
    pub fn fetch_with<T, F>(&self, descriptor: &RequestDescriptor, callback: F) -> Option<TaskId>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<T, RequestError>) + Send + 'static,
    {
        let pending = self.fetch(descriptor);
        self.dispatch_when_ready(pending, callback)
    }

    /// Download the bytes at `url`, answering from the image cache when possible.
    pub fn download_image(&self, url: &str) -> Pending<Bytes> {
        if let Some(bytes) = self.inner.image_cache.get(url) {
            debug!(url, "image served from cache");
            return Pending::ready(Ok(bytes));
        }
        if let Err(e) = Url::parse(url) {
            warn!(url, error = %e, "refusing to download unparseable url");
            return Pending::ready(Err(RequestError::InvalidUrl(url.to_string())));
        }

        let descriptor = RequestBuilder::new(url, HttpMethod::Get)
            .timeout(self.inner.image_timeout)
            .build();
        let cache = self.inner.image_cache.clone();
        let key = url.to_string();
        let (responder, pending) = pending::channel();
        let handler = self.completion(responder, move |outcome| {
            let bytes = check_outcome(&outcome)?;
            cache.insert(&key, bytes.clone());
            Ok(bytes)
        });
        let id = self.submit(&descriptor, handler);
        pending.with_task(id)
    }

    /// Like `download_image`, delivering the result to `callback` through the dispatcher.
    pub fn download_image_with<F>(&self, url: &str, callback: F) -> Option<TaskId>
    where
        F: FnOnce(Result<Bytes, RequestError>) + Send + 'static,
    {
        let pending = self.download_image(url);
        self.dispatch_when_ready(pending, callback)
    }

    fn dispatch_when_ready<T, F>(&self, pending: Pending<T>, callback: F) -> Option<TaskId>
    where
        T: Send + 'static,
        F: FnOnce(Result<T, RequestError>) + Send + 'static,
    {
        let id = pending.task_id();
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        self.inner.runtime.spawn(async move {
            let result = pending.await;
            dispatcher.dispatch(Box::new(move || callback(result)));
        });
        id
    }

    /// Build the transport completion handler for one operation.
    ///
    /// `finish` turns the raw outcome into the operation's result on a
    /// runtime worker; the task is then removed and the result delivered.
    fn completion<T, F>(&self, responder: Responder<T>, finish: F) -> CompletionHandler
    where
        T: Send + 'static,
        F: FnOnce(TransportOutcome) -> Result<T, RequestError> + Send + 'static,
    {
        let executor: Weak<Inner> = Arc::downgrade(&self.inner);
        let runtime = self.inner.runtime.clone();
        Box::new(move |id, outcome| {
            runtime.spawn(async move {
                let result = finish(outcome);
                if let Some(inner) = executor.upgrade() {
                    inner.complete(id);
                }
                match &result {
                    Ok(_) => info!(task = %id, "request succeeded"),
                    Err(e) if e.is_cancellation() => debug!(task = %id, "request cancelled"),
                    Err(e) => warn!(task = %id, error = %e, "request failed"),
                }
                responder.deliver(result);
            });
        })
    }
}

/// Classify the outcome and return the body of a successful call.
fn check_outcome(outcome: &TransportOutcome) -> Result<Bytes, RequestError> {
    if let Some(error) = classify(
        outcome.error.as_ref(),
        outcome.response.as_ref(),
        outcome.data.as_ref(),
    ) {
        return Err(error);
    }
    match &outcome.data {
        Some(data) if !data.is_empty() => Ok(data.clone()),
        other => Err(RequestError::InvalidData(other.clone())),
    }
}

fn decode_json<T: DeserializeOwned>(outcome: TransportOutcome) -> Result<T, RequestError> {
    let body = check_outcome(&outcome)?;
    serde_json::from_slice(&body).map_err(|e| RequestError::DecodingError(ErrorCause::new(e)))
}
