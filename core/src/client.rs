//! Live REST client and the factory trait shared with the mock client.
//!
//! # Design
//! `Client` is the surface call sites program against: `get`, `post`, `put`,
//! `patch`, `delete` and the general `request`. `RestClient` runs requests
//! over the network; `MockClient` replays registered responses. Code that
//! takes `&impl Client` can be exercised with either.
//!
//! `RestClient` owns its configuration, a ureq-backed transport, an optional
//! response cache and the interceptor lists. It has no interior mutability,
//! so a single client can be shared across threads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use ureq::http::{self, request, HeaderMap, HeaderName, HeaderValue, Method};

use crate::cache::{Cache, CacheConfig, MemoryCache};
use crate::error::RestError;
use crate::request::{Request, Target};
use crate::response::Response;
use crate::transport::Transport;

/// Response cache as stored by `RestClient`.
pub type ResponseCache = Arc<dyn Cache<Arc<Response>>>;

/// Runs on the outbound request head just before dispatch.
pub type RequestInterceptor = Arc<dyn Fn(&mut request::Parts) + Send + Sync>;

/// Observes each response fetched from the network, before it is cached.
pub type ResponseInterceptor = Arc<dyn Fn(&Response) + Send + Sync>;

/// Factory methods for requests.
pub trait Client {
    fn request<B>(&self, method: Method, url: &str, body: Option<&B>) -> Request<'_>
    where
        B: Serialize + ?Sized;

    fn get(&self, url: &str) -> Request<'_> {
        self.request::<()>(Method::GET, url, None)
    }

    fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Request<'_> {
        self.request(Method::POST, url, Some(body))
    }

    fn put<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Request<'_> {
        self.request(Method::PUT, url, Some(body))
    }

    fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Request<'_> {
        self.request(Method::PATCH, url, Some(body))
    }

    fn delete(&self, url: &str) -> Request<'_> {
        self.request::<()>(Method::DELETE, url, None)
    }
}

/// Client settings. Deserializable so services can load it from their own
/// configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined to every request path.
    pub base_url: String,
    /// Upper bound for every call in milliseconds; 0 means none.
    pub timeout_ms: u64,
    /// Headers sent with every request; per-request headers win.
    pub default_headers: BTreeMap<String, String>,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// Response cache settings; no cache when absent.
    pub cache: Option<CacheConfig>,
}

const ENV_BASE_URL: &str = "RESTKIT_BASE_URL";
const ENV_TIMEOUT_MS: &str = "RESTKIT_TIMEOUT_MS";
const ENV_ACCEPT_INVALID_CERTS: &str = "RESTKIT_ACCEPT_INVALID_CERTS";

impl ClientConfig {
    /// Read `RESTKIT_BASE_URL`, `RESTKIT_TIMEOUT_MS` and
    /// `RESTKIT_ACCEPT_INVALID_CERTS`. Unset or unparsable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.parse() {
                Ok(timeout_ms) => config.timeout_ms = timeout_ms,
                Err(_) => warn!(var = ENV_TIMEOUT_MS, value = %raw, "ignoring invalid timeout"),
            }
        }
        if let Some(raw) = lookup(ENV_ACCEPT_INVALID_CERTS) {
            match raw.parse() {
                Ok(accept) => config.accept_invalid_certs = accept,
                Err(_) => warn!(var = ENV_ACCEPT_INVALID_CERTS, value = %raw, "ignoring invalid flag"),
            }
        }
        config
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

pub struct RestClient {
    config: ClientConfig,
    default_headers: HeaderMap,
    transport: Transport,
    cache: Option<ResponseCache>,
    request_interceptors: Vec<RequestInterceptor>,
    response_interceptors: Vec<ResponseInterceptor>,
}

impl RestClient {
    /// A client with no base URL, no timeout and the default response cache.
    pub fn new() -> Self {
        let config = ClientConfig {
            cache: Some(CacheConfig::default()),
            ..ClientConfig::default()
        };
        Self::build(config, HeaderMap::new())
    }

    /// A client built from `config`. Fails if a default header is not a
    /// valid header name or value.
    pub fn with_config(config: ClientConfig) -> Result<Self, RestError> {
        let default_headers = parse_headers(&config.default_headers).map_err(RestError::InvalidRequest)?;
        Ok(Self::build(config, default_headers))
    }

    fn build(config: ClientConfig, default_headers: HeaderMap) -> Self {
        let cache = config
            .cache
            .as_ref()
            .map(|cache| Arc::new(MemoryCache::from_config(cache)) as ResponseCache);
        Self {
            transport: Transport::new(&config),
            config,
            default_headers,
            cache,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }

    /// Replace the response cache.
    pub fn with_response_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&mut request::Parts) + Send + Sync + 'static,
    {
        self.request_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_response_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.response_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn request_interceptors(&self) -> &[RequestInterceptor] {
        &self.request_interceptors
    }

    pub(crate) fn response_interceptors(&self) -> &[ResponseInterceptor] {
        &self.response_interceptors
    }
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .finish()
    }
}

impl Client for RestClient {
    fn request<B>(&self, method: Method, url: &str, body: Option<&B>) -> Request<'_>
    where
        B: Serialize + ?Sized,
    {
        Request::new(Target::Live(self), method, url, body)
    }
}

fn parse_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, http::Error> {
    let mut parsed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        parsed.insert(
            HeaderName::try_from(name.as_str())?,
            HeaderValue::try_from(value.as_str())?,
        );
    }
    Ok(parsed)
}
