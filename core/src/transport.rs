//! ureq-backed transport.
//!
//! Dispatches a fully built request and reads the whole body. The remaining
//! context deadline, capped by the client-wide timeout, becomes ureq's global
//! timeout for the call. When the context carries a cancel token, the call
//! runs on a helper thread over an abortable agent. Once the token fires the
//! caller shuts the socket down and returns without waiting for the thread.

use std::io::Read as _;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ureq::http::{self, request, HeaderMap, StatusCode};
use ureq::tls::TlsConfig;
use ureq::{Agent, AsSendBody};

use crate::abort::{abortable_agent, AbortHandle};
use crate::client::ClientConfig;
use crate::context::{CancelToken, Context};
use crate::error::TransportError;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A response whose head arrived. The body read may still have failed.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: std::io::Result<Bytes>,
    /// Time from dispatch until the response head arrived.
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    agent: Agent,
    timeout: Option<Duration>,
}

impl Transport {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        let tls = TlsConfig::builder()
            .disable_verification(config.accept_invalid_certs)
            .build();
        let agent = Agent::config_builder()
            // Non-2xx statuses are data, not errors.
            .http_status_as_error(false)
            .timeout_global(config.timeout())
            .tls_config(tls)
            .build()
            .new_agent();
        Self {
            agent,
            timeout: config.timeout(),
        }
    }

    pub(crate) fn execute(
        &self,
        head: request::Parts,
        body: Option<Vec<u8>>,
        ctx: &Context,
    ) -> Result<Fetched, TransportError> {
        match body {
            Some(body) => self.dispatch(http::Request::from_parts(head, body), ctx),
            None => self.dispatch(http::Request::from_parts(head, ()), ctx),
        }
    }

    fn dispatch<S>(&self, request: http::Request<S>, ctx: &Context) -> Result<Fetched, TransportError>
    where
        S: AsSendBody + Send + 'static,
    {
        ctx.check()?;

        match ctx.cancel_token() {
            Some(token) => {
                let abort = AbortHandle::default();
                let agent = abortable_agent(self.agent.config().clone(), abort.clone());
                let request = self.bound(&agent, request, ctx);
                run_cancellable(agent, request, token.clone(), abort)
            }
            None => run(&self.agent, self.bound(&self.agent, request, ctx)),
        }
    }

    /// Cap the call by whatever is left of the context deadline.
    fn bound<S: AsSendBody>(
        &self,
        agent: &Agent,
        request: http::Request<S>,
        ctx: &Context,
    ) -> http::Request<S> {
        match ctx.remaining() {
            Some(remaining) => {
                let limit = self.timeout.map_or(remaining, |timeout| timeout.min(remaining));
                agent
                    .configure_request(request)
                    .timeout_global(Some(limit))
                    .build()
            }
            None => request,
        }
    }
}

fn run<S: AsSendBody>(agent: &Agent, request: http::Request<S>) -> Result<Fetched, TransportError> {
    let started = Instant::now();
    let response = agent.run(request)?;
    let elapsed = started.elapsed();

    let (parts, body) = response.into_parts();
    let mut buf = Vec::new();
    let read = body.into_reader().read_to_end(&mut buf);

    Ok(Fetched {
        status: parts.status,
        headers: parts.headers,
        body: read.map(|_| Bytes::from(buf)),
        elapsed,
    })
}

fn run_cancellable<S>(
    agent: Agent,
    request: http::Request<S>,
    token: CancelToken,
    abort: AbortHandle,
) -> Result<Fetched, TransportError>
where
    S: AsSendBody + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("restkit-transport".to_string())
        .spawn(move || {
            // The receiver is gone if the caller was cancelled.
            let _ = tx.send(run(&agent, request));
        })
        .map_err(TransportError::Spawn)?;

    loop {
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) if token.is_cancelled() => {
                abort.abort();
                return Err(TransportError::Cancelled);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(TransportError::WorkerLost),
        }
    }
}
