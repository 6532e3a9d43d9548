//! Small REST client with response caching and deterministic mocks.
//!
//! # Overview
//! Call sites build a `Request` from a `Client` (`get`, `post`, ...), chain
//! `with_*` options and call `send`, which always yields one
//! `Arc<Response>`. Network, encoding and read failures are captured in the
//! response (`error()` plus a sentinel `status_code()`), so callers inspect
//! a single value instead of branching on `Result`.
//!
//! # Design
//! - `RestClient` runs requests over ureq. Responses can be cached per
//!   request in a `Cache` keyed by method + full URL.
//! - `MockClient` implements the same `Client` trait and replays registered
//!   responses from its own `MockRegistry`, counting every call.
//! - `Context` carries an optional deadline and cancellation token into the
//!   transport.
//! - `template` fills `{path}` tags in strings from a JSON payload.

mod abort;
pub mod cache;
pub mod client;
pub mod context;
mod engine;
pub mod error;
pub mod mock;
pub mod request;
pub mod response;
pub mod template;
mod transport;

pub use ureq::http;

pub use cache::{Cache, CacheConfig, Lookup, MemoryCache};
pub use client::{Client, ClientConfig, RestClient};
pub use context::{CancelToken, Context};
pub use error::{RestError, TemplateError, TransportError};
pub use mock::{FailureHook, MockCall, MockClient, MockRegistry, MockResponse, PanicHook};
pub use request::Request;
pub use response::{Response, STATUS_CLIENT_FAILURE, STATUS_MOCK_MISSING, STATUS_TRANSPORT_FAILURE};
