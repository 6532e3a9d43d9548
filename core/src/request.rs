//! Chainable description of one HTTP call.
//!
//! # Design
//! A `Request` is created by a client factory method (`get`, `post`, ...)
//! and borrows that client, which supplies the base URL, transport and
//! cache. Method and URL are fixed at creation; every `with_*` call consumes
//! the request and returns it with one more attribute set. `send` consumes
//! it, so a request runs at most once.
//!
//! Builder calls never fail. A header that cannot be converted is remembered
//! and reported by `send` as `RestError::InvalidRequest`.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use ureq::http::{self, HeaderMap, HeaderName, HeaderValue, Method};

use crate::client::RestClient;
use crate::context::Context;
use crate::mock::MockClient;

/// Where a request is executed.
#[derive(Clone, Copy)]
pub(crate) enum Target<'c> {
    Live(&'c RestClient),
    Mock(&'c MockClient),
}

pub struct Request<'c> {
    pub(crate) target: Target<'c>,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) body: Option<Result<Value, serde_json::Error>>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) bearer: Option<String>,
    pub(crate) cache_ttl: Option<Duration>,
    pub(crate) base_url: Option<String>,
    pub(crate) traces: Vec<String>,
    pub(crate) ctx: Option<Context>,
    pub(crate) invalid: Option<http::Error>,
}

impl<'c> Request<'c> {
    /// The body is encoded right away; an encoding failure is kept and
    /// surfaces from `send` with status 800.
    pub(crate) fn new<B>(target: Target<'c>, method: Method, url: &str, body: Option<&B>) -> Self
    where
        B: Serialize + ?Sized,
    {
        Self {
            target,
            method,
            url: url.to_owned(),
            body: body.map(serde_json::to_value),
            headers: HeaderMap::new(),
            timeout: None,
            bearer: None,
            cache_ttl: None,
            base_url: None,
            traces: Vec::new(),
            ctx: None,
            invalid: None,
        }
    }

    /// Set a header, replacing any values already set for `key`.
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = match HeaderName::try_from(key) {
            Ok(name) => name,
            Err(err) => return self.reject(err.into()),
        };
        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.headers.insert(name, value);
                self
            }
            Err(err) => self.reject(err.into()),
        }
    }

    /// Copy every header in `headers`. Keys present in `headers` replace the
    /// values already set for them; repeated keys keep all their values.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for key in headers.keys() {
            self.headers.remove(key);
        }
        for (key, value) in &headers {
            self.headers.append(key.clone(), value.clone());
        }
        self
    }

    /// Set each `(key, value)` pair as if by `with_header`.
    pub fn with_map_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .fold(self, |request, (key, value)| request.with_header(key.as_ref(), value.as_ref()))
    }

    /// Run the request under `ctx` (deadline and cancellation).
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Tag the request for tracing and run it under `ctx`. Tags are recorded
    /// on the request span and otherwise not interpreted.
    pub fn with_trace(mut self, tag: impl Into<String>, ctx: Context) -> Self {
        self.traces.push(tag.into());
        self.ctx = Some(ctx);
        self
    }

    /// Bound the call by `timeout` on top of any context deadline. A zero
    /// timeout means no extra bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serve from and store into the client cache, keeping fresh responses
    /// for `ttl`. The key is method plus full URL; headers and body are not
    /// part of it.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Send `Authorization: Bearer <token>`.
    pub fn with_authorization_token(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Use `base_url` instead of the client's base URL for this request only.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path as given at creation, without base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The encoded body, if one was given and it encoded cleanly.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref().and_then(|body| body.as_ref().ok())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    pub fn is_mocked(&self) -> bool {
        matches!(self.target, Target::Mock(_))
    }

    fn reject(mut self, err: http::Error) -> Self {
        self.invalid.get_or_insert(err);
        self
    }
}
