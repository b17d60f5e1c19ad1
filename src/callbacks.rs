//! The asynchronous callback table (spec.md S6): `connectionEstablished`,
//! `appendHeader`, `write`, `readReady`, `responseComplete`,
//! `connectionClosed`, `error`. Realized as a Rust trait rather than a
//! function-pointer table plus an opaque user-data pointer -- the
//! idiomatic equivalent of a consumed vtable, matching how the teacher
//! crate exposes its own `Codec` trait (`client/client.rs`) for the same
//! kind of per-exchange callback sequence.

use error::Error;
use request::RequestBuffer;
use response::ResponseBuffer;

/// Handed to `AsyncCallbacks::read_ready` so the callback can inspect the
/// response so far and pull decoded body bytes on demand -- the Rust
/// realization of `ReadResponseStatus`/`ReadContentLength`/
/// `ReadResponseBody` being callable from inside the user's own
/// `readReadyCallback`, per spec.md S4.4. Bundling read-only inspection
/// and the mutable pull into one `&mut dyn BodyReader` (rather than a
/// separate `response: &ResponseBuffer` parameter alongside it) avoids
/// needing two live references into the same response state at once --
/// `read_response_body` has to advance the very cursors the inspection
/// methods report on. A trait rather than a concrete type because the
/// connection that implements it is generic over its `Transport`, while
/// `AsyncCallbacks` itself should not have to be.
pub trait BodyReader {
    fn status(&self) -> Option<u16>;
    fn content_length(&self) -> Option<u64>;
    fn read_response_body(&mut self, out: &mut [u8]) -> Result<usize, Error>;
}

/// Ordering guarantee (spec.md S5): `append_header` precedes `write`
/// precedes any byte on the wire precedes `read_ready` precedes
/// `response_complete`. `error` may fire at any point after
/// `connection_established` and supersedes later per-phase callbacks for
/// the same exchange.
pub trait AsyncCallbacks: Send {
    fn connection_established(&mut self) {}

    fn append_header(&mut self, _request: &mut RequestBuffer) {}

    /// Establishes the request body (`RequestBuffer::write_body`) for
    /// `Content-Length` sizing. Required: every async request needs a
    /// decision here, even if that decision is "no body".
    fn write(&mut self, request: &mut RequestBuffer);

    /// Fired once per availability of decoded body bytes. The
    /// implementation is expected to call `body.read_response_body(buf)`
    /// to drain what is ready; returning without reading is legal but
    /// will be called again as more data arrives.
    fn read_ready(&mut self, body: &mut dyn BodyReader);

    fn response_complete(&mut self, _response: &ResponseBuffer) {}

    fn connection_closed(&mut self) {}

    fn error(&mut self, _err: &Error) {}
}
