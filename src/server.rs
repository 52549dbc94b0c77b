//! Connection lifecycle for the listening endpoint.
//!
//! The server owns exactly one listening socket and walks it through
//! create -> configure -> bind -> listen -> accept loop -> shutdown.
//! Each accepted client gets a bounded header read and one fixed response
//! before its handle is closed. All socket work goes through the
//! [`Transport`] trait, so the whole lifecycle runs unmodified against a
//! scripted transport in the tests below.
//!
//! Shutdown may be called from a different thread than the accept loop
//! (the signal thread does exactly that). It clears the running flag
//! before touching the endpoint, and the loop re-checks the flag right
//! after every blocking call before using the handle again. The handle is
//! only ever closed in `Drop`, which requires exclusive ownership, so a
//! waking accept can never race a close.

use crate::http;
use crate::transport::{Transport, TransportError};
use bytes::BytesMut;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Bytes requested from the transport per receive call.
const RECV_CHUNK: usize = 4096;

/// Consecutive accept failures tolerated before the loop backs off.
const ACCEPT_BACKOFF_AFTER: u32 = 8;

/// Pause applied while the failure streak persists.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle states of the listening endpoint.
///
/// Transitions are one-directional; `Accepting` loops on itself per
/// connection and `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Configured,
    Bound,
    Listening,
    Accepting,
    Stopped,
}

/// Single-threaded server around one listening endpoint.
pub struct Server<T: Transport> {
    transport: T,
    /// Listening endpoint handle; -1 once torn down.
    fd: AtomicI32,
    /// Cleared by `shutdown` to stop the accept loop.
    running: AtomicBool,
    /// Observable lifecycle state.
    state: AtomicU8,
    /// Largest header block accepted before a connection is dropped.
    max_request_bytes: usize,
}

impl<T: Transport> Server<T> {
    /// Create the listening endpoint.
    ///
    /// On failure nothing is held: no endpoint exists and no further
    /// transport operation is made.
    pub fn new(transport: T, max_request_bytes: usize) -> Result<Self, TransportError> {
        let fd = transport.create(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(TransportError::last_os("create"));
        }
        debug!(fd, "endpoint created");

        Ok(Self {
            transport,
            fd: AtomicI32::new(fd),
            running: AtomicBool::new(false),
            state: AtomicU8::new(State::Created as u8),
            max_request_bytes,
        })
    }

    /// Enable address reuse on the endpoint.
    pub fn configure(&self) -> Result<(), TransportError> {
        if self
            .transport
            .set_option(self.fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
            < 0
        {
            return Err(TransportError::last_os("set_option"));
        }
        self.set_state(State::Configured);
        Ok(())
    }

    /// Attach the endpoint to `addr`. The address is fixed from here on.
    pub fn bind(&self, addr: SocketAddrV4) -> Result<(), TransportError> {
        if self.transport.bind(self.fd(), addr) < 0 {
            return Err(TransportError::last_os("bind"));
        }
        self.set_state(State::Bound);
        Ok(())
    }

    /// Mark the endpoint ready to accept, with the platform's maximum
    /// backlog.
    pub fn listen(&self) -> Result<(), TransportError> {
        if self.transport.listen(self.fd(), libc::SOMAXCONN) < 0 {
            return Err(TransportError::last_os("listen"));
        }
        self.set_state(State::Listening);
        Ok(())
    }

    /// Serve clients until [`shutdown`](Self::shutdown) clears the running
    /// flag, or until `max_clients` connections have been handled when a
    /// bound is given.
    ///
    /// Accept failures are not fatal: the iteration is skipped and the
    /// loop retries. A streak of consecutive failures adds a short pause
    /// so a wedged endpoint cannot spin the process.
    pub fn run(&self, max_clients: Option<usize>) {
        self.running.store(true, Ordering::Release);
        self.set_state(State::Accepting);
        info!(?max_clients, "accepting connections");

        let mut served: usize = 0;
        let mut failures: u32 = 0;

        while self.running.load(Ordering::Acquire) {
            if max_clients.is_some_and(|max| served >= max) {
                debug!(served, "client limit reached");
                break;
            }

            let conn = self.transport.accept(self.fd());

            // Shutdown may have fired while accept was blocking. Stop
            // before touching the endpoint handle again; a connection
            // handed over by the race is closed unserved.
            if !self.running.load(Ordering::Acquire) {
                if conn >= 0 {
                    self.transport.close(conn);
                }
                break;
            }

            if conn < 0 {
                failures += 1;
                debug!(failures, "accept failed, retrying");
                if failures >= ACCEPT_BACKOFF_AFTER {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                continue;
            }
            failures = 0;

            debug!(conn, "connection accepted");
            self.handle_client(conn);
            served += 1;
        }

        self.set_state(State::Stopped);
        info!(served, "accept loop finished");
    }

    /// Stop the accept loop and shut the endpoint down bidirectionally.
    ///
    /// The running flag is always cleared, even when the underlying call
    /// fails; the failure is still reported to the caller because it can
    /// leave the endpoint wedged. Safe to call from another thread while
    /// the accept loop is blocking. With no open endpoint this is a no-op.
    pub fn shutdown(&self) -> Result<(), TransportError> {
        // Flag first: a waking accept must observe the stop before it can
        // touch the handle again.
        self.running.store(false, Ordering::Release);
        self.set_state(State::Stopped);

        let fd = self.fd();
        if fd < 0 {
            return Ok(());
        }
        if self.transport.shutdown(fd, libc::SHUT_RDWR) < 0 {
            return Err(TransportError::last_os("shutdown"));
        }
        Ok(())
    }

    /// Whether the accept loop has been started and not yet told to stop.
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current lifecycle state, for assertions on the transitions.
    #[cfg(test)]
    pub fn state(&self) -> State {
        match self.state.load(Ordering::Acquire) {
            0 => State::Created,
            1 => State::Configured,
            2 => State::Bound,
            3 => State::Listening,
            4 => State::Accepting,
            _ => State::Stopped,
        }
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// One request/response cycle. The connection handle never outlives
    /// this call: it is closed exactly once, whatever happens in between.
    fn handle_client(&self, conn: RawFd) {
        if self.read_request(conn) {
            let response = http::response_bytes();
            if let Err(e) = self.send_all(conn, &response) {
                debug!(conn, error = %e, "send failed");
            }
        }
        self.transport.close(conn);
        debug!(conn, "connection closed");
    }

    /// Accumulate bytes until the header terminator, peer close, or a
    /// receive error; any of those ends the read and the client still
    /// gets a response. Returns `false` only when the request grew past
    /// the configured limit, in which case no response is owed.
    fn read_request(&self, conn: RawFd) -> bool {
        let mut request = BytesMut::with_capacity(RECV_CHUNK);
        let mut chunk = [0u8; RECV_CHUNK];

        loop {
            let n = self.transport.recv(conn, &mut chunk);
            if n < 0 {
                debug!(conn, "receive failed mid-request");
                break;
            }
            if n == 0 {
                trace!(conn, "peer closed before terminator");
                break;
            }

            request.extend_from_slice(&chunk[..n as usize]);
            if http::headers_complete(&request) {
                break;
            }
            if request.len() > self.max_request_bytes {
                warn!(
                    conn,
                    bytes = request.len(),
                    limit = self.max_request_bytes,
                    "request exceeded header limit, dropping connection"
                );
                return false;
            }
        }

        trace!(conn, bytes = request.len(), "request read");
        true
    }

    /// Send the whole buffer, resuming past short writes.
    fn send_all(&self, conn: RawFd, buf: &[u8]) -> Result<(), TransportError> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.transport.send(conn, &buf[offset..]);
            if n <= 0 {
                return Err(TransportError::last_os("send"));
            }
            offset += n as usize;
        }
        Ok(())
    }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        // Teardown never raises. The swap guarantees at most one close
        // even though shutdown may already have run.
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 && self.transport.close(fd) < 0 {
            warn!(fd, "close failed during teardown");
        }
    }
}
