//! Chunked response body decoding. `httparse` only parses headers; it has
//! no opinion about `Transfer-Encoding: chunked` framing in the body, so
//! this module strips `<size>\r\n...\r\n` chunk framing before bytes reach
//! the caller's body buffer (testable property 8). Rewritten from the
//! teacher's `chunked::State`, which tracked the same three-field state
//! machine against a `tk_bufstream::Buf` the teacher owned directly; here
//! the driver (`response::ResponseBuffer`) owns the bytes and calls
//! `Decoder::parse` with each newly-received slice plus a sink closure,
//! since there is no shared mutable buffer type to hold a live borrow
//! across calls the way `tk_bufstream::Buf` did.

use httparse::{self, InvalidChunkSize};

#[derive(Debug, Clone)]
pub struct Decoder {
    /// Bytes of the current chunk's payload not yet consumed. Zero means
    /// "expecting a chunk-size line next".
    pending: u64,
    done: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            pending: 0,
            done: false,
        }
    }

    /// The terminating `0\r\n...\r\n` chunk has been seen; no more body
    /// bytes will follow.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decodes as much chunk framing out of `input` as is currently
    /// available, passing decoded payload bytes to `push` as they are
    /// found. Returns the number of bytes of `input` consumed; the
    /// caller is responsible for retaining `input[consumed..]` (an
    /// incomplete chunk-size line, at most a handful of bytes) and
    /// prepending it to the next `recv`'d chunk.
    pub fn parse<F>(&mut self, input: &[u8], mut push: F) -> Result<usize, InvalidChunkSize>
    where
        F: FnMut(&[u8]),
    {
        let mut pos = 0;
        while !self.done && pos < input.len() {
            if self.pending == 0 {
                match httparse::parse_chunk_size(&input[pos..])? {
                    httparse::Status::Complete((used, 0)) => {
                        pos += used;
                        self.done = true;
                    }
                    httparse::Status::Complete((used, size)) => {
                        pos += used;
                        self.pending = size;
                    }
                    httparse::Status::Partial => break,
                }
            } else {
                let avail = (input.len() - pos) as u64;
                let take = self.pending.min(avail) as usize;
                if take > 0 {
                    push(&input[pos..pos + take]);
                }
                pos += take;
                self.pending -= take as u64;
            }
        }
        Ok(pos)
    }
}
