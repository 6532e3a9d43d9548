//! Outcome of executing a `Request`.
//!
//! # Design
//! A `Response` is built once and never changed afterwards. The client hands
//! it out as `Arc<Response>`, and a cached response is the same allocation
//! for every caller that hits its key, so there are no mutating methods.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use ureq::http::HeaderMap;

use crate::error::RestError;

/// Status used when the request body could not be encoded or the response
/// body could not be read.
pub const STATUS_CLIENT_FAILURE: u16 = 800;

/// Status used when the transport failed without a server status.
pub const STATUS_TRANSPORT_FAILURE: u16 = 500;

/// Status of a mocked call with nothing registered for it. Only seen when
/// the mock's failure hook does not panic; the error is `MockNotRegistered`.
pub const STATUS_MOCK_MISSING: u16 = 0;

#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    duration_ms: u64,
    error: Option<RestError>,
}

impl Response {
    pub(crate) fn success(status: u16, headers: HeaderMap, body: Bytes, duration_ms: u64) -> Self {
        Self {
            status,
            headers,
            body,
            duration_ms,
            error: None,
        }
    }

    pub(crate) fn failure(status: u16, error: RestError) -> Self {
        Self::timed_failure(status, error, 0)
    }

    pub(crate) fn timed_failure(status: u16, error: RestError, duration_ms: u64) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            duration_ms,
            error: Some(error),
        }
    }

    /// HTTP status on success, otherwise one of the failure sentinels or the
    /// status the server reported before failing.
    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as a cheaply cloneable buffer.
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Wall-clock time of the network call in milliseconds. Zero when no
    /// call was timed (mocks, encode and read failures).
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn error(&self) -> Option<&RestError> {
        self.error.as_ref()
    }

    /// True when there is no error and the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Decode the JSON body into `T`.
    pub fn map_to<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        if self.body.is_empty() {
            return Err(RestError::EmptyBody);
        }
        serde_json::from_slice(&self.body).map_err(RestError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn ok(body: &str) -> Response {
        Response::success(200, HeaderMap::new(), Bytes::from(body.to_owned()), 12)
    }

    #[test]
    fn map_to_decodes_json() {
        let user: User = ok(r#"{"id":1,"name":"ada"}"#).map_to().unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "ada".to_string()
            }
        );
    }

    #[test]
    fn map_to_rejects_empty_body() {
        let err = ok("").map_to::<User>().unwrap_err();
        assert!(matches!(err, RestError::EmptyBody));
        assert_eq!(err.to_string(), "response body is nil");
    }

    #[test]
    fn map_to_propagates_decode_error() {
        let err = ok("not json").map_to::<User>().unwrap_err();
        assert!(matches!(err, RestError::Decode(_)));
    }

    #[test]
    fn failure_has_empty_body_and_error() {
        let response = Response::failure(STATUS_CLIENT_FAILURE, RestError::EmptyBody);
        assert_eq!(response.status_code(), 800);
        assert!(response.body().is_empty());
        assert!(response.error().is_some());
        assert!(!response.is_success());
        assert_eq!(response.duration_ms(), 0);
    }

    #[test]
    fn non_2xx_without_error_is_not_success() {
        let response = Response::success(404, HeaderMap::new(), Bytes::new(), 3);
        assert!(response.error().is_none());
        assert!(!response.is_success());
    }
}
