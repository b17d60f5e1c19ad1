use std::io;

use httparse::Error as HttpError;
use httparse::InvalidChunkSize;


quick_error! {
    /// The single error type returned by every fallible operation in this
    /// crate. Local recovery is never attempted here: every kind is
    /// surfaced to the caller, either as a `Result::Err` on the
    /// synchronous path or through `AsyncCallbacks::error` on the
    /// asynchronous one.
    #[derive(Debug)]
    pub enum Error {
        /// A null/empty/out-of-range argument was passed to a public
        /// operation.
        InvalidParameter(what: &'static str) {
            description("invalid parameter")
            display("invalid parameter: {}", what)
        }
        /// A caller-supplied buffer was too small for what had to be
        /// written into it.
        InsufficientMemory {
            description("caller-supplied buffer is too small")
        }
        /// `Transport::create` failed.
        ConnectionError(reason: String) {
            description("could not establish connection")
            display("could not establish connection: {}", reason)
        }
        /// `Transport::send`/`Transport::recv` reported a transport-level
        /// failure; the connection is no longer usable.
        NetworkError(err: io::Error) {
            description("network error")
            display("network error: {}", err)
            from()
        }
        /// `recv` returned 0 and no bytes had arrived for the current
        /// receive loop.
        TimeoutError {
            description("operation timed out")
        }
        /// The parser reported a genuine grammar violation. `httparse`
        /// is only ever fed the valid written prefix of a buffer (see
        /// DESIGN.md), so unlike the original C client there is no
        /// separate whitelist of "errors that aren't errors" to filter
        /// here -- every `HttpError` reaching this variant is real.
        ParsingError(err: HttpError) {
            description("malformed HTTP message")
            display("malformed HTTP message: {}", err)
            from()
        }
        /// Bad chunk size in a chunked response body.
        ChunkSizeError(err: InvalidChunkSize) {
            description("invalid chunk size")
            display("invalid chunk size: {}", err)
            from()
        }
        /// `Content-Length` value is not a valid non-negative integer.
        BadContentLength {
            description("bad content length")
        }
        /// More than one `Content-Length` header in the same response.
        DuplicateContentLength {
            description("duplicate content length")
        }
        /// The synchronous body buffer filled before `BODY_COMPLETE`.
        MessageTooLarge {
            description("response body does not fit in the supplied buffer")
        }
        /// `WriteRequestBody` called a second time on the same request.
        MessageFinished {
            description("request body has already been written")
        }
        /// A requested header, status line, or content length was absent.
        NotFound {
            description("not found")
        }
        /// Cooperative cancellation was observed.
        AsyncCancelled {
            description("operation was cancelled")
        }
        /// `Scheduler::schedule` failed to accept the job.
        AsyncSchedulingError {
            description("failed to schedule asynchronous work")
        }
        /// The connection is in use: disconnect was requested while a
        /// request was still sending, or a sync send timed out waiting
        /// for the connection to become free.
        Busy {
            description("connection is busy")
        }
        /// A mutex/condvar primitive could not be constructed, or was
        /// observed poisoned by a panicked thread.
        InternalError(what: &'static str) {
            description("internal error")
            display("internal error: {}", what)
        }
        /// An operation was invoked in a way this library does not
        /// implement, e.g. `WriteRequestBody` with `is_complete == false`.
        NotSupported(what: &'static str) {
            description("not supported")
            display("not supported: {}", what)
        }
    }
}
