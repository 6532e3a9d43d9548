//! Deterministic mock substitution for tests.
//!
//! # Design
//! A `MockClient` hands out requests that never touch the network: `send`
//! looks up the method + path in a `MockRegistry` and replays the registered
//! response. The registry also counts invocations and keeps an ordered log of
//! the calls that were served.
//!
//! Each `MockClient` owns its registry, so tests running in parallel never
//! see each other's mocks. Several clients can share one registry through
//! `MockClient::with_registry`.
//!
//! A request without a registered mock is a broken test, not a recoverable
//! error. The client logs it and calls its `FailureHook`; the default hook
//! panics, which fails the running test.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use ureq::http::{HeaderMap, Method};

use crate::client::Client;
use crate::error::RestError;
use crate::request::{Request, Target};
use crate::response::{Response, STATUS_MOCK_MISSING, STATUS_TRANSPORT_FAILURE};

/// A canned response.
#[derive(Clone)]
pub struct MockResponse {
    pub status_code: u16,
    pub json_body: String,
    /// When set, `send` returns status 500 with exactly this error and the
    /// call is not counted or logged.
    pub internal_error: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl MockResponse {
    pub fn new(status_code: u16, json_body: impl Into<String>) -> Self {
        Self {
            status_code,
            json_body: json_body.into(),
            internal_error: None,
        }
    }

    /// A response whose body is `body` serialized to JSON.
    pub fn json<T: Serialize + ?Sized>(status_code: u16, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(status_code, serde_json::to_string(body)?))
    }

    pub fn error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            status_code: STATUS_TRANSPORT_FAILURE,
            json_body: String::new(),
            internal_error: Some(Arc::new(error)),
        }
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse")
            .field("status_code", &self.status_code)
            .field("json_body", &self.json_body)
            .field("internal_error", &self.internal_error.as_ref().map(ToString::to_string))
            .finish()
    }
}

/// One served mock call, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub url: String,
    pub response_body: String,
    pub request_body: Option<Value>,
}

/// Called when a request has no registered mock.
pub trait FailureHook: Send + Sync {
    fn fail(&self, message: &str);
}

/// Default hook: panics so the running test fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicHook;

impl FailureHook for PanicHook {
    fn fail(&self, message: &str) {
        panic!("{message}");
    }
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, MockResponse>,
    counters: HashMap<String, usize>,
    calls: Vec<MockCall>,
}

/// Registered responses, invocation counters and the call log, behind one
/// lock. The lock is held only for the table lookup and update.
#[derive(Debug, Default)]
pub struct MockRegistry {
    state: Mutex<MockState>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite the mock for `method` + `url`. The URL is the
    /// request path exactly as passed to the factory method.
    pub fn register(&self, method: &Method, url: &str, response: MockResponse) {
        self.state.lock().responses.insert(key(method, url), response);
    }

    pub fn count(&self, method: &Method, url: &str) -> usize {
        self.state
            .lock()
            .counters
            .get(&key(method, url))
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Drop every registered response. Counters and the call log stay.
    pub fn clear_responses(&self) {
        self.state.lock().responses.clear();
    }

    /// Drop registered responses, counters and the call log.
    pub fn reset(&self) {
        *self.state.lock() = MockState::default();
    }

    /// Serve one call. `None` when nothing is registered for the key.
    fn serve(&self, method: &Method, url: &str, request_body: Option<Value>) -> Option<Response> {
        let key = key(method, url);
        let mut state = self.state.lock();
        let mock = state.responses.get(&key)?.clone();

        if let Some(err) = mock.internal_error {
            return Some(Response::failure(STATUS_TRANSPORT_FAILURE, RestError::Injected(err)));
        }

        *state.counters.entry(key).or_default() += 1;
        state.calls.push(MockCall {
            url: url.to_owned(),
            response_body: mock.json_body.clone(),
            request_body,
        });
        Some(Response::success(
            mock.status_code,
            HeaderMap::new(),
            Bytes::from(mock.json_body),
            0,
        ))
    }
}

fn key(method: &Method, url: &str) -> String {
    format!("{method}{url}")
}

pub struct MockClient {
    registry: Arc<MockRegistry>,
    hook: Arc<dyn FailureHook>,
}

impl MockClient {
    /// A client with a fresh registry and the panicking failure hook.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MockRegistry::new()),
            hook: Arc::new(PanicHook),
        }
    }

    /// Use `registry` instead of this client's own.
    pub fn with_registry(mut self, registry: Arc<MockRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_failure_hook(mut self, hook: impl FailureHook + 'static) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    pub fn set_mock_call(&self, method: Method, url: &str, response: MockResponse) {
        self.registry.register(&method, url, response);
    }

    pub fn count_requests_done(&self, method: Method, url: &str) -> usize {
        self.registry.count(&method, url)
    }

    pub fn request_stack(&self) -> Vec<MockCall> {
        self.registry.calls()
    }

    /// Drop registered responses, keeping counters and the call log.
    pub fn clear_mock_calls(&self) {
        self.registry.clear_responses();
    }

    pub fn reset(&self) {
        self.registry.reset();
    }

    pub(crate) fn replay(&self, method: &Method, url: &str, request_body: Option<Value>) -> Arc<Response> {
        if let Some(response) = self.registry.serve(method, url, request_body) {
            return Arc::new(response);
        }
        error!(%method, url, "no mock registered");
        let err = RestError::MockNotRegistered {
            method: method.to_string(),
            url: url.to_owned(),
        };
        self.hook.fail(&err.to_string());
        // Only reached when the hook does not panic.
        Arc::new(Response::failure(STATUS_MOCK_MISSING, err))
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Client for MockClient {
    fn request<B>(&self, method: Method, url: &str, body: Option<&B>) -> Request<'_>
    where
        B: Serialize + ?Sized,
    {
        Request::new(Target::Mock(self), method, url, body)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde::ser::{Error as _, Serializer};
    use serde_json::json;

    use super::*;
    use crate::response::STATUS_CLIENT_FAILURE;

    #[derive(Default)]
    struct RecordingHook {
        messages: Mutex<Vec<String>>,
    }

    impl FailureHook for Arc<RecordingHook> {
        fn fail(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cyclic structure"))
        }
    }

    #[test]
    fn replays_registered_response() {
        let mock = MockClient::new();
        mock.set_mock_call(Method::GET, "/users/1", MockResponse::new(200, r#"{"id":1}"#));

        let response = mock.get("/users/1").send();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body(), br#"{"id":1}"#);
        assert!(response.error().is_none());
        assert_eq!(mock.count_requests_done(Method::GET, "/users/1"), 1);
    }

    #[test]
    fn counts_and_logs_calls_in_order() {
        let mock = MockClient::new();
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "[]"));
        mock.set_mock_call(Method::POST, "/x", MockResponse::new(201, r#"{"ok":true}"#));

        mock.get("/x").send();
        mock.post("/x", &json!({"n": 1})).send();
        mock.get("/x").send();

        assert_eq!(mock.count_requests_done(Method::GET, "/x"), 2);
        assert_eq!(mock.count_requests_done(Method::POST, "/x"), 1);
        assert_eq!(mock.count_requests_done(Method::PUT, "/x"), 0);

        let stack = mock.request_stack();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[0].request_body, None);
        assert_eq!(stack[1].request_body, Some(json!({"n": 1})));
        assert_eq!(stack[1].response_body, r#"{"ok":true}"#);
        assert!(stack.iter().all(|call| call.url == "/x"));
    }

    #[test]
    fn injected_error_is_returned_verbatim_and_not_counted() {
        let mock = MockClient::new();
        mock.set_mock_call(
            Method::GET,
            "/down",
            MockResponse::error(std::io::Error::other("upstream down")),
        );

        let response = mock.get("/down").send();

        assert_eq!(response.status_code(), 500);
        let err = response.error().unwrap();
        assert!(matches!(err, RestError::Injected(_)));
        assert_eq!(err.to_string(), "upstream down");
        assert_eq!(mock.count_requests_done(Method::GET, "/down"), 0);
        assert!(mock.request_stack().is_empty());
    }

    #[test]
    #[should_panic(expected = "no mock registered for GET /missing")]
    fn unregistered_call_fails_the_test() {
        let mock = MockClient::new();
        mock.get("/missing").send();
    }

    #[test]
    fn unregistered_call_reaches_custom_hook() {
        let hook = Arc::new(RecordingHook::default());
        let mock = MockClient::new().with_failure_hook(Arc::clone(&hook));

        let response = mock.delete("/missing").send();

        assert_eq!(*hook.messages.lock(), vec!["no mock registered for DELETE /missing".to_string()]);
        assert_eq!(response.status_code(), STATUS_MOCK_MISSING);
        match response.error() {
            Some(RestError::MockNotRegistered { method, url }) => {
                assert_eq!(method, "DELETE");
                assert_eq!(url, "/missing");
            }
            other => panic!("expected MockNotRegistered, got {other:?}"),
        }
        assert!(!response.is_success());
        assert!(mock.request_stack().is_empty());
    }

    #[test]
    fn unencodable_body_is_800_and_not_counted() {
        let mock = MockClient::new();
        mock.set_mock_call(Method::POST, "/users", MockResponse::new(201, "{}"));

        let response = mock.post("/users", &Unencodable).send();

        assert_eq!(response.status_code(), STATUS_CLIENT_FAILURE);
        assert!(matches!(response.error(), Some(RestError::Encode(_))));
        assert_eq!(mock.count_requests_done(Method::POST, "/users"), 0);
    }

    #[test]
    fn set_mock_call_overwrites() {
        let mock = MockClient::new();
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "1"));
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(404, "2"));
        let response = mock.get("/x").send();
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body(), b"2");
    }

    #[test]
    fn base_url_and_cache_are_ignored_for_mocks() {
        let mock = MockClient::new();
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "fresh"));

        let response = mock
            .get("/x")
            .with_base_url("http://elsewhere")
            .with_cache(std::time::Duration::from_secs(60))
            .send();
        assert_eq!(response.body(), b"fresh");

        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "newer"));
        let response = mock.get("/x").with_cache(std::time::Duration::from_secs(60)).send();
        assert_eq!(response.body(), b"newer");
    }

    #[test]
    fn clear_mock_calls_keeps_history() {
        let hook = Arc::new(RecordingHook::default());
        let mock = MockClient::new().with_failure_hook(Arc::clone(&hook));
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "{}"));
        mock.get("/x").send();

        mock.clear_mock_calls();
        mock.get("/x").send();

        assert_eq!(hook.messages.lock().len(), 1);
        assert_eq!(mock.count_requests_done(Method::GET, "/x"), 1);
        assert_eq!(mock.request_stack().len(), 1);

        mock.reset();
        assert_eq!(mock.count_requests_done(Method::GET, "/x"), 0);
        assert!(mock.request_stack().is_empty());
    }

    #[test]
    fn clients_are_isolated_unless_sharing_a_registry() {
        let shared = Arc::new(MockRegistry::new());
        let first = MockClient::new().with_registry(Arc::clone(&shared));
        let second = MockClient::new().with_registry(Arc::clone(&shared));
        let isolated = MockClient::new();

        first.set_mock_call(Method::GET, "/x", MockResponse::new(200, "{}"));
        second.get("/x").send();

        assert_eq!(first.count_requests_done(Method::GET, "/x"), 1);
        assert_eq!(isolated.count_requests_done(Method::GET, "/x"), 0);
    }

    #[test]
    fn concurrent_calls_are_all_counted() {
        let mock = Arc::new(MockClient::new());
        mock.set_mock_call(Method::GET, "/x", MockResponse::new(200, "{}"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mock = Arc::clone(&mock);
                thread::spawn(move || mock.get("/x").send().status_code())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }
        assert_eq!(mock.count_requests_done(Method::GET, "/x"), 8);
        assert_eq!(mock.request_stack().len(), 8);
    }

    #[test]
    fn mock_response_json_serializes_body() {
        let response = MockResponse::json(200, &json!({"id": 7})).unwrap();
        assert_eq!(response.json_body, r#"{"id":7}"#);
    }
}
