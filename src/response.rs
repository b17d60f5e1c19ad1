//! Response buffer and parser driver (component C4) plus the read
//! operations of the request lifecycle that act on a response (C6):
//! `ReadResponseStatus`, `ReadContentLength`, `ReadHeader`,
//! `ReadResponseBody`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use chunked;
use error::Error;
use method::Method;
use parser::{self, BodyKind, BufferProcessingState, HeaderRange, ParserState};

/// Decodes body-framing (fixed-length / chunked / close-delimited) out of
/// `input`, handing decoded payload bytes to `push`. A free function
/// rather than a method so callers can pass disjoint field borrows of
/// `ResponseBuffer` (its own `body`/`body_cur` fields) to the closure
/// without conflicting with a `&mut self` receiver.
///
/// `chunk_carry` holds a chunk-size line left incomplete by a previous
/// call (`Decoder::parse`'s contract: unconsumed input must be retained
/// and prepended to the next call). Only the `Chunked` arm ever touches
/// it; a split mid chunk-size-line is rare enough that buffering it in a
/// small `Vec` here doesn't compromise the no-allocation-in-the-common-
/// case property of the fixed/eof paths.
fn decode_body_bytes<F: FnMut(&[u8])>(
    body_kind: Option<BodyKind>,
    fixed_remaining: &mut u64,
    chunked: &mut Option<chunked::Decoder>,
    chunk_carry: &mut Vec<u8>,
    input: &[u8],
    mut push: F,
) -> Result<(usize, bool), Error> {
    match body_kind {
        Some(BodyKind::Fixed(_)) => {
            let take = (*fixed_remaining).min(input.len() as u64) as usize;
            if take > 0 {
                push(&input[..take]);
            }
            *fixed_remaining -= take as u64;
            Ok((take, *fixed_remaining == 0))
        }
        Some(BodyKind::Chunked) => {
            let decoder = chunked.as_mut().expect("chunked decoder missing for chunked body");
            let (consumed, done) = if chunk_carry.is_empty() {
                let consumed = decoder.parse(input, push)?;
                let done = decoder.is_done();
                if consumed < input.len() {
                    *chunk_carry = input[consumed..].to_vec();
                }
                (consumed, done)
            } else {
                let mut combined = ::std::mem::replace(chunk_carry, Vec::new());
                combined.extend_from_slice(input);
                let consumed = decoder.parse(&combined, push)?;
                let done = decoder.is_done();
                if consumed < combined.len() {
                    *chunk_carry = combined[consumed..].to_vec();
                }
                // `consumed` above counts bytes of `combined`, not `input`;
                // the caller only uses this to know how many *new* bytes
                // were absorbed, which is all of `input` unless the tail is
                // still an incomplete chunk-size line.
                (input.len().min(consumed), done)
            };
            if !chunk_carry.is_empty() {
                return Ok((input.len(), done));
            }
            Ok((consumed, done))
        }
        Some(BodyKind::Eof) => {
            push(input);
            Ok((input.len(), false))
        }
        None => Ok((0, true)),
    }
}

/// Completion signal used only by the synchronous send path: `SendSync`
/// blocks on it, the receive-ready callback posts it.
pub type CompletionSignal = Arc<(Mutex<bool>, Condvar)>;

pub struct ResponseBuffer {
    headers: Vec<u8>,
    headers_cur: usize,
    body: Option<Vec<u8>>,
    body_cur: usize,
    parsed: Option<parser::ParsedHeaders>,
    status_code: Option<u16>,
    content_length: Option<u64>,
    body_kind: Option<BodyKind>,
    fixed_remaining: u64,
    chunked: Option<chunked::Decoder>,
    /// Tail of a chunk-size line left over when a `recv` boundary split it;
    /// see `decode_body_bytes`.
    chunk_carry: Vec<u8>,
    /// Body bytes that arrived packed into the header buffer in the same
    /// `recv` call that completed the headers, captured offset/length
    /// into `headers`. Replayed by `read_response_body` before pulling
    /// more bytes from the network (spec.md S4.4).
    body_start_in_header_buf: Option<(usize, usize)>,
    has_body_buffer: bool,
    method: Method,
    parser_state: ParserState,
    processing_state: BufferProcessingState,
    cancelled: Arc<AtomicBool>,
    sync_status: Option<Error>,
    ready: CompletionSignal,
}

impl ResponseBuffer {
    /// Stamped symmetrically with the request by `initialize_request`.
    /// `body_capacity == None` means "no body buffer" (sync with a null
    /// `respData`, or an async response the caller never reads the body
    /// of); per the preserved ambiguity in spec.md S9, this takes the
    /// same suppression path as a `HEAD` response.
    pub fn new(
        header_capacity: usize,
        body_capacity: Option<usize>,
        method: Method,
        cancelled: Arc<AtomicBool>,
    ) -> Result<ResponseBuffer, Error> {
        if header_capacity == 0 {
            return Err(Error::InvalidParameter("response header buffer must not be empty"));
        }
        Ok(ResponseBuffer {
            headers: vec![0u8; header_capacity],
            headers_cur: 0,
            body: body_capacity.map(|n| vec![0u8; n]),
            body_cur: 0,
            parsed: None,
            status_code: None,
            content_length: None,
            body_kind: None,
            fixed_remaining: 0,
            chunked: None,
            chunk_carry: Vec::new(),
            body_start_in_header_buf: None,
            has_body_buffer: body_capacity.is_some(),
            method,
            parser_state: ParserState::None,
            processing_state: BufferProcessingState::None,
            cancelled,
            sync_status: None,
            ready: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn parser_state(&self) -> ParserState {
        self.parser_state
    }

    pub fn processing_state(&self) -> &BufferProcessingState {
        &self.processing_state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn completion_signal(&self) -> CompletionSignal {
        self.ready.clone()
    }

    pub fn set_sync_status(&mut self, status: Option<Error>) {
        self.sync_status = status;
    }

    /// Takes ownership of the terminal status the receive-ready callback
    /// recorded for this exchange, leaving `None` behind. `Error` wraps
    /// `io::Error`/`httparse::Error`, neither `Clone`, so this consumes
    /// rather than borrows -- the connection manager calls it exactly
    /// once per `SendSync`, after the completion signal has fired.
    pub fn take_sync_status(&mut self) -> Option<Error> {
        self.sync_status.take()
    }

    /// Region the network receive loop should `recv` into for the header
    /// phase (`[pHeadersCur, pHeadersEnd)`).
    pub fn header_spare_mut(&mut self) -> &mut [u8] {
        &mut self.headers[self.headers_cur..]
    }

    pub fn header_spare_len(&self) -> usize {
        self.headers.len() - self.headers_cur
    }

    pub fn advance_headers(&mut self, n: usize) {
        self.headers_cur += n;
        self.processing_state = BufferProcessingState::FillingHeaders;
    }

    /// Attempts to parse a complete status line + header block out of
    /// what has been received so far. `Ok(true)` means `parser_state` is
    /// now at least `HeadersComplete`; `Ok(false)` means more bytes are
    /// needed.
    pub fn try_parse_headers(
        &mut self,
        max_headers: usize,
        max_headers_hard_limit: usize,
    ) -> Result<bool, Error> {
        if self.parser_state == ParserState::None {
            self.parser_state = ParserState::InHeaders;
        }
        let parsed = match parser::parse_header_block(
            &self.headers[..self.headers_cur],
            max_headers,
            max_headers_hard_limit,
        )? {
            Some(p) => p,
            None => return Ok(false),
        };
        let (kind, _close) =
            parser::scan_body_kind(&self.headers, &parsed.headers, self.method.suppresses_response_body(), parsed.code)?;
        self.status_code = Some(parsed.code);
        if let BodyKind::Fixed(n) = kind {
            self.content_length = Some(n);
        }
        self.parser_state = ParserState::HeadersComplete;

        // Preserved ambiguity (spec.md S9): HEAD and "no body buffer"
        // share the same suppression path.
        let suppress = self.method.suppresses_response_body() || !self.has_body_buffer;
        if suppress || kind == BodyKind::Fixed(0) {
            self.parser_state = ParserState::BodyComplete;
            self.processing_state = BufferProcessingState::Finished;
            return Ok(true);
        }

        self.body_kind = Some(kind);
        if let BodyKind::Fixed(n) = kind {
            self.fixed_remaining = n;
        }
        if kind == BodyKind::Chunked {
            self.chunked = Some(chunked::Decoder::new());
        }
        self.parser_state = ParserState::InBody;
        self.processing_state = BufferProcessingState::FillingBody;

        if self.headers_cur > parsed.consumed {
            self.body_start_in_header_buf =
                Some((parsed.consumed, self.headers_cur - parsed.consumed));
        }
        self.parsed = Some(parsed);
        Ok(true)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// `ReadResponseStatus`, spec.md S4.4.
    pub fn read_status(&self) -> Result<u16, Error> {
        self.status_code.ok_or(Error::NotFound)
    }

    /// `ReadContentLength`, spec.md S4.4.
    pub fn read_content_length(&self) -> Result<u64, Error> {
        self.content_length.ok_or(Error::NotFound)
    }

    /// `ReadHeader(resp, name, buf, len)`, spec.md S4.2/S4.4. Realized as
    /// a scan over the already-parsed header list rather than a literal
    /// second parser pass -- see DESIGN.md for why this is equivalent.
    /// `out` must be large enough for the value or this returns
    /// `Error::InsufficientMemory`.
    pub fn read_header(&mut self, name: &str, out: &mut [u8]) -> Result<usize, Error> {
        let parsed = self.parsed.as_ref().ok_or(Error::NotFound)?;
        self.processing_state = BufferProcessingState::SearchingHeaders {
            field: name.to_string(),
        };
        let found = parser::find_header(&self.headers, &parsed.headers, name);
        let result = match found {
            Some(value) => {
                if value.len() > out.len() {
                    Err(Error::InsufficientMemory)
                } else {
                    out[..value.len()].copy_from_slice(value);
                    Ok(value.len())
                }
            }
            None => Err(Error::NotFound),
        };
        self.processing_state = BufferProcessingState::Finished;
        result
    }

    fn header_ranges(&self) -> &[HeaderRange] {
        self.parsed.as_ref().map_or(&[], |p| &p.headers)
    }

    pub fn headers_raw(&self) -> &[u8] {
        &self.headers[..self.headers_cur]
    }

    pub fn headers_parsed(&self) -> &[HeaderRange] {
        self.header_ranges()
    }

    /// Region the network receive loop should `recv` into for the sync
    /// body phase.
    pub fn body_spare_mut(&mut self) -> Option<&mut [u8]> {
        let cur = self.body_cur;
        self.body.as_mut().map(move |b| &mut b[cur..])
    }

    /// Decodes `input` (bytes just received) into the caller-owned sync
    /// body buffer, honoring fixed/chunked/eof framing. Returns the
    /// number of input bytes consumed.
    ///
    /// Precondition, mirroring the `pBufEnd - pBufCur > 0` loop guard of
    /// `ReceiveMessage` (spec.md S4.2): the caller (the connection's
    /// receive loop, `body_spare_mut`-sized) must never hand this more
    /// bytes than `body_spare_mut().len()`. Decoded payload past the
    /// buffer's remaining capacity would otherwise be silently dropped
    /// instead of correctly leaving `parser_state` short of
    /// `BodyComplete` so the caller can report `MessageTooLarge`.
    pub fn feed_sync_body(&mut self, input: &[u8]) -> Result<usize, Error> {
        let body_len = self.body.as_ref().map_or(0, |b| b.len());
        let mut cur = self.body_cur;
        let ResponseBuffer {
            ref mut fixed_remaining,
            ref mut chunked,
            ref mut chunk_carry,
            body_kind,
            ref mut body,
            ..
        } = *self;
        let (consumed, complete) = decode_body_bytes(body_kind, fixed_remaining, chunked, chunk_carry, input, |chunk| {
            if let Some(buf) = body.as_mut() {
                let space = body_len.saturating_sub(cur);
                let n = chunk.len().min(space);
                buf[cur..cur + n].copy_from_slice(&chunk[..n]);
                cur += n;
            }
        })?;
        self.body_cur = cur;
        if complete {
            self.parser_state = ParserState::BodyComplete;
            self.processing_state = BufferProcessingState::Finished;
        }
        Ok(consumed)
    }

    /// Feeds body bytes already captured in the header buffer (because they
    /// arrived in the same `recv` call that completed the header block --
    /// see `body_start_in_header_buf`) into the synchronous body path, one
    /// capacity-bounded slice at a time. Returns whether any residue was
    /// fed this call, so `receive_body_sync` knows to re-check
    /// `sync_body_buffer_full`/`parser_state` rather than going to the
    /// network: those bytes already left the wire, so a loop that only
    /// ever `recv`s would wait forever for data the peer already sent.
    ///
    /// Caps each feed to `feed_sync_body`'s own precondition -- the
    /// remaining sync body capacity -- leaving the rest in
    /// `body_start_in_header_buf` for the next call, the same way
    /// `replay_from_header_buf` bounds the async path. Feeding the whole
    /// residue in one shot regardless of capacity would let
    /// `decode_body_bytes` consume it all against `fixed_remaining` and
    /// report the body complete even though most of it never fit in the
    /// buffer, masking `MessageTooLarge`.
    pub fn feed_sync_body_from_header_buf(&mut self) -> Result<bool, Error> {
        let (offset, len) = match self.body_start_in_header_buf {
            Some(v) => v,
            None => return Ok(false),
        };
        let remaining = self.body_spare_mut().map_or(0, |b| b.len());
        if remaining == 0 {
            return Ok(false);
        }
        let take = len.min(remaining);
        let captured = self.headers[offset..offset + take].to_vec();
        self.body_start_in_header_buf = if take < len {
            Some((offset + take, len - take))
        } else {
            None
        };
        self.feed_sync_body(&captured)?;
        Ok(true)
    }

    /// Drains any body bytes already captured in the header buffer through
    /// the body-framing decoder without copying them into the (possibly
    /// already-full) sync body buffer, for `FlushNetworkData` finishing a
    /// response whose residue the normal body path never got to consume
    /// (e.g. it bailed out with `MessageTooLarge` first). Those bytes
    /// already left the wire, so the flush must account for them before
    /// it ever calls `recv` again.
    pub fn discard_header_buf_residue(&mut self) -> Result<(), Error> {
        if let Some((offset, len)) = self.body_start_in_header_buf.take() {
            let captured = self.headers[offset..offset + len].to_vec();
            self.discard_body(&captured)?;
        }
        Ok(())
    }

    pub fn sync_body_buffer_full(&self) -> bool {
        match &self.body {
            Some(b) => self.body_cur >= b.len(),
            None => true,
        }
    }

    pub fn sync_body_written(&self) -> usize {
        self.body_cur
    }

    pub fn sync_body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(|b| &b[..self.body_cur])
    }

    /// Routes bytes captured in `body_start_in_header_buf` through the
    /// same decode path as freshly received wire bytes (`decode_into`),
    /// into `out`. These are raw wire bytes -- chunk-size lines and all,
    /// for a chunked body -- not decoded payload, so a plain byte copy
    /// would both desynchronize chunked framing and leave `fixed_remaining`/
    /// `parser_state` exactly as they were, looping `read_response_body`
    /// forever on a body that in fact already fully arrived.
    ///
    /// Feeds at most `out.len()` wire bytes at a time and leaves the rest
    /// of the residue in `body_start_in_header_buf` for the next call.
    /// Decoding never produces more payload bytes than wire bytes
    /// consumed (chunk framing only removes bytes), so capping the wire
    /// bytes fed here to `out`'s remaining room guarantees `decode_into`
    /// never has more to write than `out` can hold -- feeding the whole
    /// residue in one shot would silently drop whatever didn't fit.
    fn replay_from_header_buf(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let (offset, len) = match self.body_start_in_header_buf {
            Some(v) => v,
            None => return Ok(0),
        };
        let take = len.min(out.len());
        let captured = self.headers[offset..offset + take].to_vec();
        let written = self.decode_into(&captured, out)?;
        self.body_start_in_header_buf = if take < len {
            Some((offset + take, len - take))
        } else {
            None
        };
        Ok(written)
    }

    /// Decodes one freshly received chunk of wire bytes into `out`,
    /// advancing body framing state. Returns bytes written into `out`.
    fn decode_into(&mut self, input: &[u8], out: &mut [u8]) -> Result<usize, Error> {
        let mut written = 0usize;
        let out_len = out.len();
        let complete = {
            let ResponseBuffer {
                ref mut fixed_remaining,
                ref mut chunked,
                ref mut chunk_carry,
                body_kind,
                ..
            } = *self;
            let (_consumed, complete) =
                decode_body_bytes(body_kind, fixed_remaining, chunked, chunk_carry, input, |chunk| {
                    let space = out_len - written;
                    let n = chunk.len().min(space);
                    out[written..written + n].copy_from_slice(&chunk[..n]);
                    written += n;
                })?;
            complete
        };
        if complete {
            self.parser_state = ParserState::BodyComplete;
            self.processing_state = BufferProcessingState::Finished;
        }
        Ok(written)
    }

    /// Advances body-framing state (fixed/chunked/eof) over `input`
    /// without copying the decoded payload anywhere, for
    /// `FlushNetworkData` (spec.md S4.5): draining the rest of a response
    /// the caller already gave up on (e.g. after `MessageTooLarge`) still
    /// has to track `Content-Length`/chunk boundaries to know when
    /// `BODY_COMPLETE` is reached, or the flush has no way to tell "more
    /// of this response" from "the next response" and would leave stale
    /// bytes for the following request to misparse.
    pub fn discard_body(&mut self, input: &[u8]) -> Result<(), Error> {
        let complete = {
            let ResponseBuffer {
                ref mut fixed_remaining,
                ref mut chunked,
                ref mut chunk_carry,
                body_kind,
                ..
            } = *self;
            let (_consumed, complete) =
                decode_body_bytes(body_kind, fixed_remaining, chunked, chunk_carry, input, |_chunk| {})?;
            complete
        };
        if complete {
            self.parser_state = ParserState::BodyComplete;
            self.processing_state = BufferProcessingState::Finished;
        }
        Ok(())
    }

    /// `ReadResponseBody(resp, buf, len)`, spec.md S4.4 -- async only.
    /// Drains any body bytes already captured in the header buffer first,
    /// then, while room remains and the body is not complete, pulls more
    /// bytes from the network through `recv` (supplied by the connection,
    /// which owns the `Transport`). `recv` returning `Ok(0)` means
    /// timeout; this method treats that as "nothing more right now" and
    /// returns what it has so far rather than blocking indefinitely.
    pub fn read_response_body<R>(&mut self, out: &mut [u8], mut recv: R) -> Result<usize, Error>
    where
        R: FnMut(&mut [u8]) -> Result<usize, Error>,
    {
        let mut total = self.replay_from_header_buf(out)?;
        let mut scratch = [0u8; 512];
        while total < out.len() && self.parser_state != ParserState::BodyComplete {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(Error::AsyncCancelled);
            }
            // Bounded to the room left in `out`: decoding never turns
            // fewer wire bytes into more payload bytes, so a `recv` this
            // size can never decode to more than `decode_into` below has
            // room to write.
            let cap = (out.len() - total).min(scratch.len());
            let n = recv(&mut scratch[..cap])?;
            if n == 0 {
                break;
            }
            total += self.decode_into(&scratch[..n], &mut out[total..])?;
        }
        Ok(total)
    }
}
