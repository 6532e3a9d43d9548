//! The send pipeline: turn a `Request` into exactly one `Response`.
//!
//! Order of work for a live request:
//! 1. cache read (when `with_cache` was used and the client has a cache)
//! 2. deadline composition from the request context and timeout
//! 3. body encoding (failure: status 800, nothing sent)
//! 4. request head assembly: default headers, request headers with repeated
//!    values comma-joined, bearer token, request interceptors
//! 5. dispatch (failure: server status if any, else 500)
//! 6. body capture (failure: status 800)
//! 7. response interceptors and cache write-back, for any status
//!
//! Mocked requests skip all of this and go to the mock registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span};
use ureq::http::header::{AUTHORIZATION, CONTENT_TYPE};
use ureq::http::{self, request, HeaderMap, HeaderValue, Uri};

use crate::client::RestClient;
use crate::error::RestError;
use crate::request::{Request, Target};
use crate::response::{Response, STATUS_CLIENT_FAILURE, STATUS_TRANSPORT_FAILURE};

impl Request<'_> {
    /// Execute the request. Failures are reported through
    /// `Response::error` and `Response::status_code`, never by panicking.
    pub fn send(self) -> Arc<Response> {
        match self.target {
            Target::Live(client) => send_live(client, self),
            Target::Mock(mock) => {
                let body = match self.body.transpose() {
                    Ok(body) => body,
                    Err(err) => return client_failure(RestError::Encode(err)),
                };
                mock.replay(&self.method, &self.url, body)
            }
        }
    }
}

fn send_live(client: &RestClient, request: Request<'_>) -> Arc<Response> {
    let base_url = request
        .base_url
        .as_deref()
        .unwrap_or(&client.config().base_url);
    let url = format!("{base_url}{}", request.url);
    let span = debug_span!("rest.request", method = %request.method, %url, traces = ?request.traces);
    let _entered = span.enter();

    let cache = match (request.cache_ttl, client.cache()) {
        (Some(ttl), Some(cache)) => Some((cache, ttl)),
        (Some(_), None) => {
            debug!("cache requested but client has no cache");
            None
        }
        (None, _) => None,
    };
    let cache_key = format!("{}{url}", request.method);
    if let Some((cache, _)) = cache {
        debug!("checking cache");
        if let Some(hit) = cache.get(request.ctx.as_ref(), &cache_key).into_value() {
            return hit;
        }
    }

    let parent = request.ctx.clone().unwrap_or_default();
    let ctx = match request.timeout {
        Some(timeout) if !timeout.is_zero() => parent.with_timeout(timeout),
        _ => parent,
    };

    if let Some(err) = request.invalid {
        return client_failure(RestError::InvalidRequest(err));
    }
    let body = match request.body.transpose() {
        Ok(body) => body,
        Err(err) => return client_failure(RestError::Encode(err)),
    };
    let body = match body.map(|value| serde_json::to_vec(&value)).transpose() {
        Ok(body) => body,
        Err(err) => return client_failure(RestError::Encode(err)),
    };

    let head = match build_head(
        client,
        &request.method,
        &url,
        &request.headers,
        request.bearer.as_deref(),
        body.is_some(),
    ) {
        Ok(head) => head,
        Err(err) => return client_failure(RestError::InvalidRequest(err)),
    };

    let started = Instant::now();
    let fetched = match client.transport().execute(head, body, &ctx) {
        Ok(fetched) => fetched,
        Err(source) => {
            let status = source.status().unwrap_or(STATUS_TRANSPORT_FAILURE);
            let elapsed = millis(started.elapsed());
            debug!(status, elapsed, error = %source, "transport failed");
            return Arc::new(Response::timed_failure(
                status,
                RestError::Transport { url, source },
                elapsed,
            ));
        }
    };

    let body = match fetched.body {
        Ok(body) => body,
        Err(err) => return client_failure(RestError::ReadBody(err)),
    };
    let response = Arc::new(Response::success(
        fetched.status.as_u16(),
        fetched.headers,
        body,
        millis(fetched.elapsed),
    ));

    for interceptor in client.response_interceptors() {
        interceptor(&response);
    }

    if let Some((cache, ttl)) = cache {
        debug!(?ttl, "caching response");
        cache.save_with_ttl(request.ctx.as_ref(), &cache_key, Arc::clone(&response), ttl);
    }

    response
}

fn build_head(
    client: &RestClient,
    method: &http::Method,
    url: &str,
    headers: &HeaderMap,
    bearer: Option<&str>,
    has_body: bool,
) -> Result<request::Parts, http::Error> {
    let (mut head, ()) = http::Request::new(()).into_parts();
    head.method = method.clone();
    head.uri = url.parse::<Uri>()?;
    head.headers = client.default_headers().clone();

    for key in headers.keys() {
        head.headers.insert(key.clone(), join_values(headers, key)?);
    }
    if has_body && !head.headers.contains_key(CONTENT_TYPE) {
        head.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if let Some(token) = bearer {
        head.headers
            .insert(AUTHORIZATION, HeaderValue::try_from(format!("Bearer {token}"))?);
    }

    for interceptor in client.request_interceptors() {
        interceptor(&mut head);
    }
    Ok(head)
}

/// All values for `key`, comma-joined into one header value.
fn join_values(headers: &HeaderMap, key: &http::HeaderName) -> Result<HeaderValue, http::Error> {
    let mut values = headers.get_all(key).iter();
    let Some(first) = values.next() else {
        return Ok(HeaderValue::from_static(""));
    };
    let mut joined = first.as_bytes().to_vec();
    for value in values {
        joined.push(b',');
        joined.extend_from_slice(value.as_bytes());
    }
    Ok(HeaderValue::from_bytes(&joined)?)
}

fn client_failure(error: RestError) -> Arc<Response> {
    Arc::new(Response::failure(STATUS_CLIENT_FAILURE, error))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
