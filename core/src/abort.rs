//! Plain TCP connections that can be torn down from another thread.
//!
//! ureq gives no handle to the socket behind a call. Cancellable calls run on
//! a dedicated agent whose TCP step is `AbortableTcpConnector`: it opens the
//! socket itself and keeps a clone in an `AbortHandle`. `AbortHandle::abort`
//! shuts that socket down, so a call blocked in a read or write fails at once
//! and the peer sees the connection close.
//!
//! The rest of the chain is ureq's own: CONNECT proxies before the TCP step,
//! rustls after it.

use std::fmt;
use std::io::{self, Read as _, Write as _};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use ureq::config::Config;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectProxyConnector, ConnectionDetails, Connector, Either, LazyBuffers, NextTimeout,
    RustlsConnector, Transport,
};
use ureq::{Agent, Error, Timeout};

#[derive(Debug, Default)]
struct Slot {
    stream: Option<TcpStream>,
    aborted: bool,
}

/// Shared between the caller and the connector of one cancellable call.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortHandle {
    slot: Arc<Mutex<Slot>>,
}

impl AbortHandle {
    /// Shut down the current socket, and any socket opened later.
    pub(crate) fn abort(&self) {
        let mut slot = self.slot.lock();
        slot.aborted = true;
        if let Some(stream) = slot.stream.take() {
            debug!(peer = ?stream.peer_addr().ok(), "aborting connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn register(&self, stream: &TcpStream) -> io::Result<()> {
        let mut slot = self.slot.lock();
        if slot.aborted {
            stream.shutdown(Shutdown::Both)?;
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "call was cancelled"));
        }
        slot.stream = Some(stream.try_clone()?);
        Ok(())
    }
}

/// An agent with `config` whose connections `handle` can abort.
pub(crate) fn abortable_agent(config: Config, handle: AbortHandle) -> Agent {
    let connector = ()
        .chain(ConnectProxyConnector::default())
        .chain(AbortableTcpConnector { handle })
        .chain(RustlsConnector::default());
    Agent::with_parts(config, connector, DefaultResolver::default())
}

#[derive(Debug)]
struct AbortableTcpConnector {
    handle: AbortHandle,
}

impl<In: Transport> Connector<In> for AbortableTcpConnector {
    type Out = Either<In, AbortableTcp>;

    fn connect(
        &self,
        details: &ConnectionDetails,
        chained: Option<In>,
    ) -> Result<Option<Self::Out>, Error> {
        // A proxy tunnel is already open; it cannot be aborted from here.
        if chained.is_some() {
            return Ok(chained.map(Either::A));
        }

        let timeout = details.timeout.not_zero().map(|after| *after);
        let mut last_err = None;
        for addr in &details.addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    if details.config.no_delay() {
                        stream.set_nodelay(true)?;
                    }
                    self.handle.register(&stream)?;
                    let buffers = LazyBuffers::new(
                        details.config.input_buffer_size(),
                        details.config.output_buffer_size(),
                    );
                    return Ok(Some(Either::B(AbortableTcp { stream, buffers })));
                }
                Err(err) if is_timeout(&err) => return Err(Error::Timeout(Timeout::Connect)),
                Err(err) => last_err = Some(err),
            }
        }
        let err = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no address to connect to")
        });
        Err(err.into())
    }
}

struct AbortableTcp {
    stream: TcpStream,
    buffers: LazyBuffers,
}

impl Transport for AbortableTcp {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), Error> {
        self.stream
            .set_write_timeout(timeout.not_zero().map(|after| *after))?;
        let output = &self.buffers.output()[..amount];
        self.stream
            .write_all(output)
            .map_err(|err| io_to_ureq(err, timeout))
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, Error> {
        self.stream
            .set_read_timeout(timeout.not_zero().map(|after| *after))?;
        let input = self.buffers.input_append_buf();
        let amount = self
            .stream
            .read(input)
            .map_err(|err| io_to_ureq(err, timeout))?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    // Each abortable agent serves a single call; its connections are never
    // handed back to a pool.
    fn is_open(&mut self) -> bool {
        false
    }
}

impl fmt::Debug for AbortableTcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortableTcp")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn io_to_ureq(err: io::Error, timeout: NextTimeout) -> Error {
    if is_timeout(&err) {
        Error::Timeout(timeout.reason)
    } else {
        err.into()
    }
}
