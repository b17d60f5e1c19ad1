//! Response parser driver (component C4). `httparse` parses a whole
//! buffer prefix per call rather than firing a callback per token the
//! way the consumed parser in spec.md S4.2's table does, so this module
//! re-invokes `httparse::Response::parse` every time more bytes land in
//! the header buffer and turns its single `Complete`/`Partial` result
//! into the per-field callback contract the spec describes: status,
//! header name/value ranges, and the body-length algorithm
//! (`scan_body_kind`, a direct port of the teacher's `scan_headers` in
//! `client/parser.rs`).
//!
//! Two orthogonal state dimensions, per spec.md S4.2 / S9:
//! `ParserState` (where in the response we are) and
//! `BufferProcessingState` (what the driver is doing with which buffer),
//! the latter a sum type as the Design Notes ask for, not a flag soup.

use std::str::from_utf8;

use httparse;

use error::Error;
use headers;
use method::Version;

/// Number of `httparse::Header` slots to allocate on the stack before
/// falling back to a heap `Vec`. Mirrors the teacher's two-tier
/// `MIN_HEADERS`/`MAX_HEADERS` retry (`client/parser.rs`), keeping the
/// common case allocation-free per this crate's hot-path non-goal.
pub const MIN_HEADERS: usize = 16;
pub const MAX_HEADERS: usize = 1024;

/// Progress through one response. Transitions happen only in the order
/// the driver below produces them, mirroring the callback table in
/// spec.md S4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParserState {
    None,
    InHeaders,
    HeadersComplete,
    InBody,
    BodyComplete,
}

/// What the driver is doing with which buffer right now. Recommended by
/// the Design Notes as a sum type over a flag soup because identical
/// parser results mean different things depending on this discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferProcessingState {
    None,
    FillingHeaders,
    FillingBody,
    SearchingHeaders { field: String },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    Eof,
}

/// A header field/value pair as a `(name_offset, name_len, value_offset,
/// value_len)` tuple into the buffer that was parsed. Offsets rather than
/// borrowed slices so the result outlives the transient `&[u8]` borrow of
/// the (still mutable, still growing) response header buffer.
pub type HeaderRange = (usize, usize, usize, usize);

#[derive(Debug, Clone)]
pub struct ParsedHeaders {
    pub version: Version,
    pub code: u16,
    pub reason: (usize, usize),
    pub headers: Vec<HeaderRange>,
    /// Total bytes consumed, i.e. the offset of the first body byte.
    pub consumed: usize,
}

fn offset_of(buf: &[u8], sub: &[u8]) -> usize {
    (sub.as_ptr() as usize).saturating_sub(buf.as_ptr() as usize)
}

/// Attempts to parse a complete status line + header block out of
/// `buf[..len]`. Returns `Ok(None)` if the buffer does not yet contain a
/// complete header block (`httparse::Status::Partial`) -- the caller
/// should `recv` more bytes and try again. `max_headers`/`max_headers_hard_limit`
/// come from `Config`; exceeding `max_headers` falls back to a single
/// heap allocation sized `max_headers_hard_limit`, exactly like the
/// teacher's `parse_headers`.
pub fn parse_header_block(
    buf: &[u8],
    max_headers: usize,
    max_headers_hard_limit: usize,
) -> Result<Option<ParsedHeaders>, Error> {
    let mut stack_headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut heap_headers;
    let mut response = httparse::Response::new(&mut stack_headers);
    let mut result = response.parse(buf);
    if let Err(httparse::Error::TooManyHeaders) = result {
        heap_headers = vec![httparse::EMPTY_HEADER; max_headers_hard_limit];
        response = httparse::Response::new(&mut heap_headers);
        result = response.parse(buf);
    }
    let consumed = match result? {
        httparse::Status::Complete(bytes) => bytes,
        httparse::Status::Partial => return Ok(None),
    };
    let version = match response.version {
        Some(1) => Version::Http11,
        _ => Version::Http10,
    };
    let code = response.code.unwrap_or(0);
    let reason_bytes = response.reason.unwrap_or("").as_bytes();
    let reason = (offset_of(buf, reason_bytes), reason_bytes.len());
    let headers = response
        .headers
        .iter()
        .map(|h| {
            (
                offset_of(buf, h.name.as_bytes()),
                h.name.len(),
                offset_of(buf, h.value),
                h.value.len(),
            )
        })
        .collect();
    Ok(Some(ParsedHeaders {
        version,
        code,
        reason,
        headers,
        consumed,
    }))
}

/// Implements the body-length algorithm for responses
/// (http://httpwg.github.io/specs/rfc7230.html#message.body.length),
/// ported from the teacher's `scan_headers`:
///
/// 1. For HEAD, 1xx, 204, 304 -- no body.
/// 2. If the last `Transfer-Encoding` is `chunked` -> `Chunked`.
/// 3. Else if `Content-Length` is present -> `Fixed`.
/// 4. Else -> `Eof`.
///
/// Returns `(body_kind, connection_close)`.
pub fn scan_body_kind(
    buf: &[u8],
    headers: &[HeaderRange],
    is_head: bool,
    code: u16,
) -> Result<(BodyKind, bool), Error> {
    let mut close = false;
    if is_head || (code > 100 && code < 200) || code == 204 || code == 304 {
        for &(name_off, name_len, value_off, value_len) in headers {
            let name = &buf[name_off..name_off + name_len];
            if name.eq_ignore_ascii_case(b"Connection") {
                let value = &buf[value_off..value_off + value_len];
                if value.split(|&b| b == b',').any(headers::is_close) {
                    close = true;
                }
            }
        }
        return Ok((BodyKind::Fixed(0), close));
    }
    let mut has_content_length = false;
    let mut result = BodyKind::Eof;
    for &(name_off, name_len, value_off, value_len) in headers {
        let name = &buf[name_off..name_off + name_len];
        let value = &buf[value_off..value_off + value_len];
        if name.eq_ignore_ascii_case(b"Transfer-Encoding") {
            if let Some(enc) = value.split(|&b| b == b',').last() {
                if headers::is_chunked(enc) {
                    if has_content_length {
                        close = true;
                    }
                    result = BodyKind::Chunked;
                }
            }
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            if has_content_length {
                return Err(Error::DuplicateContentLength);
            }
            has_content_length = true;
            if result != BodyKind::Chunked {
                let s = from_utf8(value).map_err(|_| Error::BadContentLength)?;
                let len: u64 = s
                    .trim()
                    .parse()
                    .map_err(|_| Error::BadContentLength)?;
                result = BodyKind::Fixed(len);
            } else {
                close = true;
            }
        } else if name.eq_ignore_ascii_case(b"Connection") {
            if value.split(|&b| b == b',').any(headers::is_close) {
                close = true;
            }
        }
    }
    Ok((result, close))
}

/// Looks up a single header by name (case-insensitive) within an already
/// parsed header list. This realizes `ReadHeader`'s header-search mode
/// (spec.md S4.2 "Header search") without literally re-invoking the
/// parser the way the original did: once a response's headers are fully
/// parsed, this crate retains the structured `(name, value)` offset list
/// instead of discarding it, so a search is a linear scan rather than a
/// second parse pass. See DESIGN.md for why this differs from the
/// original's re-parse-on-demand approach while preserving its observable
/// behavior (`NOT_FOUND` when absent, first match wins on duplicates).
pub fn find_header<'a>(buf: &'a [u8], headers: &[HeaderRange], name: &str) -> Option<&'a [u8]> {
    for &(name_off, name_len, value_off, value_len) in headers {
        if buf[name_off..name_off + name_len].eq_ignore_ascii_case(name.as_bytes()) {
            return Some(&buf[value_off..value_off + value_len]);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world";
        let parsed = parse_header_block(raw, MIN_HEADERS, MAX_HEADERS)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.code, 200);
        assert_eq!(parsed.version, Version::Http11);
        assert_eq!(parsed.headers.len(), 1);
        let value = find_header(raw, &parsed.headers, "content-length").unwrap();
        assert_eq!(value, b"11");
        assert_eq!(&raw[parsed.consumed..], b"hello world");
    }

    #[test]
    fn partial_header_block_returns_none() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1";
        assert!(parse_header_block(raw, MIN_HEADERS, MAX_HEADERS).unwrap().is_none());
    }

    #[test]
    fn head_response_has_zero_length_fixed_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n";
        let parsed = parse_header_block(raw, MIN_HEADERS, MAX_HEADERS).unwrap().unwrap();
        let (kind, _close) = scan_body_kind(raw, &parsed.headers, true, parsed.code).unwrap();
        assert_eq!(kind, BodyKind::Fixed(0));
    }

    #[test]
    fn chunked_transfer_encoding_wins_over_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n";
        let parsed = parse_header_block(raw, MIN_HEADERS, MAX_HEADERS).unwrap().unwrap();
        let (kind, close) = scan_body_kind(raw, &parsed.headers, false, parsed.code).unwrap();
        assert_eq!(kind, BodyKind::Chunked);
        assert!(close, "ambiguous Content-Length + chunked must not be kept alive");
    }

    #[test]
    fn find_header_is_case_insensitive() {
        let raw = b"HTTP/1.1 200 OK\r\nX-Foo: bar\r\n\r\n";
        let parsed = parse_header_block(raw, MIN_HEADERS, MAX_HEADERS).unwrap().unwrap();
        assert_eq!(find_header(raw, &parsed.headers, "x-foo"), Some(&b"bar"[..]));
        assert_eq!(find_header(raw, &parsed.headers, "x-missing"), None);
    }
}
