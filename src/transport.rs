//! Transport boundary between the server and the OS socket layer.
//!
//! The server drives its listening endpoint exclusively through the
//! [`Transport`] trait, so the whole connection lifecycle can be exercised
//! against a scripted transport in tests. [`SysTransport`] is the production
//! implementation: a direct pass-through to the `libc` socket calls, with
//! failures reported the way the syscalls report them (negative return
//! values). Turning those into errors is the server's job.

use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Raw socket capability surface consumed by the server.
///
/// Every method mirrors the underlying syscall contract: handles are raw
/// file descriptors, failures are negative return values, and no method
/// allocates, retries, or interprets anything. Policy lives in the server.
pub trait Transport: Send + Sync {
    /// Create a new endpoint. Returns a negative handle on failure.
    fn create(&self, family: i32, ty: i32, protocol: i32) -> RawFd;

    /// Set an integer socket option. Returns a negative status on failure.
    fn set_option(&self, fd: RawFd, level: i32, name: i32, value: i32) -> i32;

    /// Attach the endpoint to an IPv4 address. Negative status on failure.
    fn bind(&self, fd: RawFd, addr: SocketAddrV4) -> i32;

    /// Mark the endpoint ready to accept. Negative status on failure.
    fn listen(&self, fd: RawFd, backlog: i32) -> i32;

    /// Block until one client connects. Returns the connection handle, or
    /// a negative handle on failure.
    fn accept(&self, fd: RawFd) -> RawFd;

    /// Send bytes on a connection. Returns bytes written, or a negative
    /// count on failure. May write fewer bytes than requested.
    fn send(&self, fd: RawFd, buf: &[u8]) -> isize;

    /// Receive bytes from a connection. Returns bytes read, `0` when the
    /// peer has closed, or a negative count on failure.
    fn recv(&self, fd: RawFd, buf: &mut [u8]) -> isize;

    /// Shut down a handle in the given direction. Negative status on
    /// failure.
    fn shutdown(&self, fd: RawFd, how: i32) -> i32;

    /// Close a handle. The status is surfaced but callers may ignore it.
    fn close(&self, fd: RawFd) -> i32;
}

/// A shared transport is still a transport. This lets the server and the
/// shutdown path (or a test) hold the same instance across threads.
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn create(&self, family: i32, ty: i32, protocol: i32) -> RawFd {
        (**self).create(family, ty, protocol)
    }

    fn set_option(&self, fd: RawFd, level: i32, name: i32, value: i32) -> i32 {
        (**self).set_option(fd, level, name, value)
    }

    fn bind(&self, fd: RawFd, addr: SocketAddrV4) -> i32 {
        (**self).bind(fd, addr)
    }

    fn listen(&self, fd: RawFd, backlog: i32) -> i32 {
        (**self).listen(fd, backlog)
    }

    fn accept(&self, fd: RawFd) -> RawFd {
        (**self).accept(fd)
    }

    fn send(&self, fd: RawFd, buf: &[u8]) -> isize {
        (**self).send(fd, buf)
    }

    fn recv(&self, fd: RawFd, buf: &mut [u8]) -> isize {
        (**self).recv(fd, buf)
    }

    fn shutdown(&self, fd: RawFd, how: i32) -> i32 {
        (**self).shutdown(fd, how)
    }

    fn close(&self, fd: RawFd) -> i32 {
        (**self).close(fd)
    }
}

/// Error raised when a transport operation reports failure.
///
/// Carries the name of the failing operation and the OS error captured at
/// the failure site.
#[derive(Debug)]
pub struct TransportError {
    /// Operation that failed (`"create"`, `"bind"`, ...).
    pub op: &'static str,
    /// OS-level cause.
    pub source: io::Error,
}

impl TransportError {
    /// Capture `errno` for a syscall that just reported failure.
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.op, self.source)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Pass-through to the OS socket layer.
pub struct SysTransport;

impl Transport for SysTransport {
    fn create(&self, family: i32, ty: i32, protocol: i32) -> RawFd {
        unsafe { libc::socket(family, ty, protocol) }
    }

    fn set_option(&self, fd: RawFd, level: i32, name: i32, value: i32) -> i32 {
        unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                &value as *const i32 as *const libc::c_void,
                std::mem::size_of::<i32>() as libc::socklen_t,
            )
        }
    }

    fn bind(&self, fd: RawFd, addr: SocketAddrV4) -> i32 {
        let sa = sockaddr_v4(addr);
        unsafe {
            libc::bind(
                fd,
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
    }

    fn listen(&self, fd: RawFd, backlog: i32) -> i32 {
        unsafe { libc::listen(fd, backlog) }
    }

    fn accept(&self, fd: RawFd) -> RawFd {
        // The peer address is not used anywhere, so it is not requested.
        unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) }
    }

    fn send(&self, fd: RawFd, buf: &[u8]) -> isize {
        unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0) }
    }

    fn recv(&self, fd: RawFd, buf: &mut [u8]) -> isize {
        unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) }
    }

    fn shutdown(&self, fd: RawFd, how: i32) -> i32 {
        unsafe { libc::shutdown(fd, how) }
    }

    fn close(&self, fd: RawFd) -> i32 {
        unsafe { libc::close(fd) }
    }
}

/// Build a `sockaddr_in` in network byte order.
///
/// Zero-initialized first so padding fields (`sin_zero`, and `sin_len` on
/// the BSDs) stay zero.
fn sockaddr_v4(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    sa
}
