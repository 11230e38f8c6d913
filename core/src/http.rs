//! HTTP request and response types shared by the executor and transports.
//!
//! # Design
//! A `RequestDescriptor` describes a network call as plain data and is never
//! mutated once built. Transports turn it into I/O and report back the three
//! raw signals of a finished call as a `TransportOutcome`, which the error
//! taxonomy then classifies.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::transport::TransportError;

/// Default timeout applied by `RequestBuilder`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a transport may answer from an HTTP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Follow whatever caching the protocol headers allow.
    UseProtocolCache,
    /// Always go to the origin.
    #[default]
    ReloadIgnoringCache,
}

/// An immutable description of a pending network call.
///
/// Built through `RequestBuilder` or `build_request`. Fields are read-only so
/// a descriptor handed to the executor is exactly what the transport sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    url: String,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    cache_policy: CachePolicy,
    timeout: Duration,
    body: Option<String>,
}

impl RequestDescriptor {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Header entries in insertion order. Repeated keys are all kept.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// All values recorded for `key`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Step-by-step construction of a `RequestDescriptor`.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    method: HttpMethod,
    query: Option<Vec<(String, Option<String>)>>,
    headers: Vec<(String, String)>,
    cache_policy: CachePolicy,
    timeout: Duration,
    body: Option<String>,
}

impl RequestBuilder {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            query: None,
            headers: Vec::new(),
            cache_policy: CachePolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            body: None,
        }
    }

    /// Append one query parameter. `None` produces a bare key.
    pub fn query(mut self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.query
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.map(Into::into)));
        self
    }

    /// Append query parameters in iteration order.
    pub fn queries<K, V, I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let query = self.query.get_or_insert_with(Vec::new);
        query.extend(items.into_iter().map(|(k, v)| (k.into(), v.map(Into::into))));
        self
    }

    /// Add a header value. An existing entry for the same key is kept, not replaced.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn headers<K, V, I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(items.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> RequestDescriptor {
        let url = match self.query {
            Some(items) => append_query(&self.url, &items),
            None => self.url,
        };
        RequestDescriptor {
            url,
            method: self.method,
            headers: self.headers,
            cache_policy: self.cache_policy,
            timeout: self.timeout,
            body: self.body,
        }
    }
}

/// Build a descriptor in one call.
///
/// Equivalent to chaining the corresponding `RequestBuilder` methods. Pass
/// `None` for `cache_policy` / `timeout` to get `ReloadIgnoringCache` and 30s.
pub fn build_request(
    url: &str,
    method: HttpMethod,
    query_items: Option<&[(&str, Option<&str>)]>,
    headers: Option<&[(&str, &str)]>,
    cache_policy: Option<CachePolicy>,
    timeout: Option<Duration>,
) -> RequestDescriptor {
    let mut builder = RequestBuilder::new(url, method);
    if let Some(items) = query_items {
        builder = builder.queries(items.iter().copied());
    }
    if let Some(headers) = headers {
        builder = builder.headers(headers.iter().copied());
    }
    if let Some(policy) = cache_policy {
        builder = builder.cache_policy(policy);
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Append query items to `raw`, falling back to `raw` untouched when it does
/// not parse as a URL.
///
/// With items present the URL comes back in normalized form: an empty path
/// becomes `/` (`https://example.com` turns into `https://example.com/?k=v`)
/// and values are form-encoded, so a space is sent as `+`.
fn append_query(raw: &str, items: &[(String, Option<String>)]) -> String {
    if items.is_empty() {
        return raw.to_string();
    }
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            warn!(url = raw, error = %e, "query items dropped: url did not parse");
            return raw.to_string();
        }
    };
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in items {
            match value {
                Some(value) => pairs.append_pair(key, value),
                None => pairs.append_key_only(key),
            };
        }
    }
    url.into()
}

/// Response metadata as reported by the transport.
///
/// `status` is `None` when the transport produced something that is not a
/// well-formed HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub url: String,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
}

impl RawResponse {
    pub fn http(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status: Some(status),
            headers: Vec::new(),
        }
    }

    pub fn is_http(&self) -> bool {
        self.status.is_some()
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status})", self.url),
            None => write!(f, "{} (non-HTTP)", self.url),
        }
    }
}

/// The raw signals of a finished transport call: `(data?, response?, error?)`.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    pub data: Option<Bytes>,
    pub response: Option<RawResponse>,
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    /// An HTTP response with the given status and optional body.
    pub fn http(url: impl Into<String>, status: u16, body: Option<&[u8]>) -> Self {
        Self {
            data: body.map(Bytes::copy_from_slice),
            response: Some(RawResponse::http(url, status)),
            error: None,
        }
    }

    /// A call that failed before producing a response.
    pub fn failed(error: TransportError) -> Self {
        Self {
            data: None,
            response: None,
            error: Some(error),
        }
    }
}
