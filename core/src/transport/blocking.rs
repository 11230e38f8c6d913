use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::debug;
use ureq::http::Response;
use ureq::typestate::WithBody;
use ureq::{Agent, Body, RequestBuilder};

use super::{CompletionHandler, DataTask, TaskId, Transport, TransportError};
use crate::http::{CachePolicy, HttpMethod, RawResponse, RequestDescriptor, TransportOutcome};

type HandlerSlot = Mutex<Option<CompletionHandler>>;

/// HTTP transport backed by ureq.
///
/// Calls are blocking, so each resumed task runs on the runtime's blocking
/// pool. Status codes are returned as data, never as errors, so the error
/// taxonomy sees every response. One agent is shared by every task so
/// connections are pooled; timeouts are set per request.
pub struct UreqTransport {
    agent: Agent,
    runtime: Handle,
    next_id: AtomicU64,
}

impl UreqTransport {
    pub fn new(runtime: Handle) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            runtime,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Transport for UreqTransport {
    fn data_task(
        &self,
        request: &RequestDescriptor,
        on_complete: CompletionHandler,
    ) -> Arc<dyn DataTask> {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(UreqTask {
            id,
            agent: self.agent.clone(),
            request: request.clone(),
            runtime: self.runtime.clone(),
            started: AtomicBool::new(false),
            handler: Arc::new(Mutex::new(Some(on_complete))),
        })
    }
}

struct UreqTask {
    id: TaskId,
    agent: Agent,
    request: RequestDescriptor,
    runtime: Handle,
    started: AtomicBool,
    // Whoever takes the handler first (the finished call or `cancel`) reports.
    handler: Arc<HandlerSlot>,
}

fn take_handler(slot: &HandlerSlot) -> Option<CompletionHandler> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl DataTask for UreqTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.id;
        let agent = self.agent.clone();
        let request = self.request.clone();
        let slot = Arc::clone(&self.handler);
        self.runtime.spawn_blocking(move || {
            let outcome = perform(&agent, &request);
            match take_handler(&slot) {
                Some(handler) => handler(id, outcome),
                None => debug!(task = %id, "dropping late result of cancelled task"),
            }
        });
    }

    fn cancel(&self) {
        if let Some(handler) = take_handler(&self.handler) {
            debug!(task = %self.id, "task cancelled before completion");
            handler(self.id, TransportOutcome::failed(TransportError::Cancelled));
        }
    }
}

fn perform(agent: &Agent, request: &RequestDescriptor) -> TransportOutcome {
    let url = request.url();
    let result = match request.method() {
        HttpMethod::Get => prepare(agent.get(url), request).call(),
        HttpMethod::Delete => prepare(agent.delete(url), request).call(),
        HttpMethod::Post => send(prepare(agent.post(url), request), request.body()),
        HttpMethod::Put => send(prepare(agent.put(url), request), request.body()),
    };

    let mut response = match result {
        Ok(response) => response,
        Err(e) => return TransportOutcome::failed(map_error(e, request.timeout())),
    };

    let meta = RawResponse {
        url: url.to_string(),
        status: Some(response.status().as_u16()),
        headers: response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect(),
    };
    match response.body_mut().read_to_vec() {
        Ok(body) => TransportOutcome {
            data: Some(Bytes::from(body)),
            response: Some(meta),
            error: None,
        },
        Err(e) => TransportOutcome {
            data: None,
            response: Some(meta),
            error: Some(map_error(e, request.timeout())),
        },
    }
}

/// Apply the descriptor's timeout and headers to a request on the shared agent.
fn prepare<B>(builder: RequestBuilder<B>, request: &RequestDescriptor) -> RequestBuilder<B> {
    let mut builder = builder
        .config()
        .timeout_global(Some(request.timeout()))
        .build();
    for (key, value) in request.headers() {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if request.cache_policy() == CachePolicy::ReloadIgnoringCache
        && request.header_values("cache-control").next().is_none()
    {
        builder = builder.header("cache-control", "no-cache");
    }
    builder
}

fn send(builder: RequestBuilder<WithBody>, body: Option<&str>) -> Result<Response<Body>, ureq::Error> {
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

fn map_error(error: ureq::Error, timeout: Duration) -> TransportError {
    match error {
        ureq::Error::Timeout(_) => TransportError::TimedOut(timeout),
        other => TransportError::Io(other.to_string()),
    }
}
