//! Request lifecycle and buffer layout (components C3/C6). `InitializeRequest`
//! lays out the request line and fixed headers inside a caller-sized
//! buffer, `AddHeader` appends caller headers while respecting the
//! reserved tail, and `WriteRequestBody`/the sync body path set the bytes
//! that eventually get sent after the headers.
//!
//! Rust realization of spec.md S3's pointer-triple
//! `(pHeaders, pHeadersCur, pHeadersEnd)`: a `Vec<u8>` built with
//! `Vec::with_capacity(capacity)` and never allowed to reallocate --
//! `headers.len()` is `pHeadersCur`, `reserved_end` is
//! `pHeadersEnd - RESERVED_TAIL`. Exceeding `reserved_end` is reported as
//! `Error::InsufficientMemory` rather than letting the `Vec` grow, which
//! would silently violate the caller's "sized a priori" buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use buffer::{is_auto_managed_header, RESERVED_TAIL};
use config::Config;
use error::Error;
use method::{Method, Version, LONGEST_METHOD_LEN};
use response::ResponseBuffer;

/// What the caller passes to `initialize_request`. Mirrors the "Request
/// context" field list in spec.md S3: method, path, host, mode flag,
/// persistence flag, body (sync only -- async bodies arrive later via
/// `RequestBuffer::write_body`).
pub struct RequestInfo<'a> {
    pub method: Method,
    pub path: &'a str,
    pub host: &'a str,
    pub is_async: bool,
    pub is_non_persistent: bool,
    /// Present only for synchronous requests that already have their
    /// whole body in hand; `None` for a bodyless request. Must be `None`
    /// when `is_async` is `true` -- async bodies go through
    /// `write_body`.
    pub sync_body: Option<&'a [u8]>,
}

/// Conservative lower bound on a request buffer's capacity, computed
/// before any concrete method/host/user-agent is known -- the same role
/// `LONGEST_METHOD_LEN` plays in the original's compile-time sizing
/// macros. Embedded callers size their buffer with this before they ever
/// call `initialize_request`; `initialize_request` itself performs a
/// precise check against the actual bytes it is about to write.
pub fn minimum_request_buffer_len(host_len: usize, user_agent_len: usize) -> usize {
    // "<CONNECT> / HTTP/1.1\r\n"
    let request_line = LONGEST_METHOD_LEN + 1 + 1 + 1 + "HTTP/1.1".len() + 2;
    let user_agent_line = "User-Agent: ".len() + user_agent_len + 2;
    let host_line = "Host: ".len() + host_len + 2;
    request_line + user_agent_line + host_line + RESERVED_TAIL
}

/// `CancelRequestAsync(req, _)`'s handle, spec.md S4.4. Obtained from a
/// `RequestBuffer` before handing it to `Connection::send_async` (which
/// takes ownership of the buffer itself), so the caller retains a way to
/// request cancellation for the lifetime of the exchange. Cloning shares
/// the same underlying flag; cancellation is cooperative, observed at
/// the next scheduler entry or `read_ready` loop boundary (never
/// interrupts an in-flight `send`/`recv`).
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct RequestBuffer {
    headers: Vec<u8>,
    reserved_end: usize,
    method: Method,
    is_async: bool,
    is_non_persistent: bool,
    body: Option<Vec<u8>>,
    body_set: bool,
    finished_sending: bool,
    cancelled: Arc<AtomicBool>,
}

impl RequestBuffer {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn is_non_persistent(&self) -> bool {
        self.is_non_persistent
    }

    /// `AddHeader(req, name, value)`, spec.md S4.1. Rejects the four
    /// auto-managed names and anything that would not leave room for the
    /// reserved tail.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::InvalidParameter("header name must not be empty"));
        }
        if is_auto_managed_header(name) {
            return Err(Error::InvalidParameter(
                "Content-Length, Connection, Host and User-Agent are managed automatically",
            ));
        }
        let needed = name.len() + 2 + value.len() + 2;
        let available = self.reserved_end.saturating_sub(self.headers.len());
        if needed > available {
            return Err(Error::InsufficientMemory);
        }
        self.headers.extend_from_slice(name.as_bytes());
        self.headers.extend_from_slice(b": ");
        self.headers.extend_from_slice(value.as_bytes());
        self.headers.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// `WriteRequestBody(req, buf, len, isComplete=true)`, spec.md S4.4 --
    /// async only, callable exactly once. Partial bodies
    /// (`is_complete == false`) are not implemented, matching the
    /// `NOT_SUPPORTED` row of the error taxonomy.
    pub fn write_body(&mut self, buf: &[u8], is_complete: bool) -> Result<(), Error> {
        if !self.is_async {
            return Err(Error::NotSupported("write_body is async-request only"));
        }
        if self.body_set {
            return Err(Error::MessageFinished);
        }
        if !is_complete {
            return Err(Error::NotSupported("partial request bodies are not implemented"));
        }
        self.body = Some(buf.to_vec());
        self.body_set = true;
        Ok(())
    }

    pub fn content_length(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn headers_bytes(&self) -> &[u8] {
        &self.headers
    }

    pub fn finished_sending(&self) -> bool {
        self.finished_sending
    }

    pub fn mark_finished_sending(&mut self) {
        self.finished_sending = true;
    }

    pub fn mark_sending(&mut self) {
        self.finished_sending = false;
    }

    /// `CancelRequestAsync(req, _)`, spec.md S4.4. Cooperative: observed
    /// at the next scheduler entry or `readReady` loop boundary, never
    /// interrupts an in-flight `send`/`recv`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Hands out a `CancelHandle` that outlives this buffer, for
    /// `CancelRequestAsync` after the buffer itself has been moved into
    /// `Connection::send_async`/`send_sync`.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

/// `InitializeRequest(&req, info)`, spec.md S4.1/S4.4: validates the
/// buffer is large enough, zeroes it (Rust realization: starts a fresh
/// `Vec`), writes the request line and the two fixed headers
/// (`User-Agent`, `Host`), and stamps the paired response context
/// symmetrically.
pub fn initialize_request(
    request_capacity: usize,
    response_header_capacity: usize,
    response_body_capacity: Option<usize>,
    info: &RequestInfo,
    config: &Config,
) -> Result<(RequestBuffer, ResponseBuffer), Error> {
    if info.host.is_empty() {
        return Err(Error::InvalidParameter("host must not be empty"));
    }
    if info.is_async && info.sync_body.is_some() {
        return Err(Error::InvalidParameter(
            "sync_body must be None for an asynchronous request",
        ));
    }
    let path = if info.path.is_empty() { "/" } else { info.path };
    let request_line_len = info.method.as_str().len() + 1 + path.len() + 1
        + Version::Http11.as_str().len() + 2;
    let user_agent_line_len = "User-Agent: ".len() + config.get_user_agent().len() + 2;
    let host_line_len = "Host: ".len() + info.host.len() + 2;
    let fixed_len = request_line_len + user_agent_line_len + host_line_len;
    if request_capacity < fixed_len + RESERVED_TAIL {
        return Err(Error::InsufficientMemory);
    }

    let mut headers = Vec::with_capacity(request_capacity);
    headers.extend_from_slice(info.method.as_str().as_bytes());
    headers.push(b' ');
    headers.extend_from_slice(path.as_bytes());
    headers.push(b' ');
    headers.extend_from_slice(Version::Http11.as_str().as_bytes());
    headers.extend_from_slice(b"\r\n");
    headers.extend_from_slice(b"User-Agent: ");
    headers.extend_from_slice(config.get_user_agent().as_bytes());
    headers.extend_from_slice(b"\r\n");
    headers.extend_from_slice(b"Host: ");
    headers.extend_from_slice(info.host.as_bytes());
    headers.extend_from_slice(b"\r\n");

    let cancelled = Arc::new(AtomicBool::new(false));
    let mut request = RequestBuffer {
        reserved_end: request_capacity - RESERVED_TAIL,
        headers,
        method: info.method,
        is_async: info.is_async,
        is_non_persistent: info.is_non_persistent,
        body: None,
        body_set: false,
        finished_sending: true,
        cancelled: cancelled.clone(),
    };
    if let Some(body) = info.sync_body {
        request.body = Some(body.to_vec());
        request.body_set = true;
    }

    let response = ResponseBuffer::new(
        response_header_capacity,
        response_body_capacity,
        info.method,
        cancelled,
    )?;

    Ok((request, response))
}

#[cfg(test)]
mod test {
    use super::*;
    use config::Config;

    fn info<'a>(path: &'a str, host: &'a str) -> RequestInfo<'a> {
        RequestInfo {
            method: Method::Get,
            path,
            host,
            is_async: false,
            is_non_persistent: false,
            sync_body: None,
        }
    }

    #[test]
    fn rejects_buffer_too_small() {
        let config = Config::new();
        let result = initialize_request(8, 256, Some(256), &info("/", "example.com"), &config);
        assert!(matches!(result, Err(Error::InsufficientMemory)));
    }

    #[test]
    fn writes_request_line_and_fixed_headers() {
        let config = Config::new();
        let (req, _resp) =
            initialize_request(512, 512, Some(512), &info("/widgets", "example.com"), &config)
                .unwrap();
        let text = String::from_utf8(req.headers_bytes().to_vec()).unwrap();
        assert!(text.starts_with("GET /widgets HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("User-Agent: "));
    }

    #[test]
    fn add_header_rejects_auto_managed_names() {
        let config = Config::new();
        let (mut req, _resp) =
            initialize_request(512, 512, Some(512), &info("/", "example.com"), &config).unwrap();
        assert!(matches!(
            req.add_header("Host", "other.example.com"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn add_header_respects_reserved_tail() {
        let config = Config::new();
        let min = minimum_request_buffer_len("example.com".len(), config.get_user_agent().len());
        let (mut req, _resp) =
            initialize_request(min + 8, 512, Some(512), &info("/", "example.com"), &config)
                .unwrap();
        // Only a handful of bytes of genuine slack; a large header must
        // be rejected rather than silently truncating the reserved tail.
        let big_value = "x".repeat(256);
        assert!(matches!(
            req.add_header("X-Custom", &big_value),
            Err(Error::InsufficientMemory)
        ));
    }

    #[test]
    fn write_body_is_async_only_and_single_shot() {
        let config = Config::new();
        let mut async_info = info("/", "example.com");
        async_info.is_async = true;
        let (mut req, _resp) =
            initialize_request(512, 512, Some(512), &async_info, &config).unwrap();
        req.write_body(b"hello", true).unwrap();
        assert_eq!(req.content_length(), 5);
        assert!(matches!(req.write_body(b"again", true), Err(Error::MessageFinished)));
    }

    #[test]
    fn sync_body_rejected_on_async_request() {
        let config = Config::new();
        let mut bad = info("/", "example.com");
        bad.is_async = true;
        bad.sync_body = Some(b"oops");
        let result = initialize_request(512, 512, Some(512), &bad, &config);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
