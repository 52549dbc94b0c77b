//! Request framing and the fixed response.
//!
//! Requests are never parsed; the server only scans for the blank line
//! ending the header block, then answers every client with the same page.

use bytes::BytesMut;

/// Byte sequence ending an HTTP header block.
const TERMINATOR: &[u8] = b"\r\n\r\n";

/// The page returned to every client.
pub const BODY: &str = "<html><body><h1>Hello World</h1><p>Served by serve-a-page</p></body></html>";

/// True once `buf` contains the end-of-headers terminator.
pub fn headers_complete(buf: &[u8]) -> bool {
    buf.windows(TERMINATOR.len()).any(|w| w == TERMINATOR)
}

/// Assemble the full fixed response: status line, headers, blank line, body.
///
/// `Content-Length` always matches the exact byte length of [`BODY`].
pub fn response_bytes() -> BytesMut {
    let mut out = BytesMut::with_capacity(128 + BODY.len());
    out.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    out.extend_from_slice(b"Content-Type: text/html; charset=utf-8\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", BODY.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(BODY.as_bytes());
    out
}
