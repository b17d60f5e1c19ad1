//! Reserved-space accounting for the request header region (component C3).
//! `AddHeader` never lets the cursor advance past
//! `pHeadersEnd - RESERVED_TAIL`, so `SendHeaders` can always append the
//! auto-generated trailing headers without reallocating or truncating.

/// `len("Content-Length: 4294967295\r\nConnection: keep-alive\r\n\r\n")`.
/// `4294967295` is `u32::MAX`; the original bounds content length to a
/// 32-bit count, so this crate keeps the same bound on `content_length`
/// (see `request::RequestBuffer::set_content_length`) even though the
/// field itself is a `u64`.
pub const RESERVED_TAIL: usize =
    "Content-Length: 4294967295\r\nConnection: keep-alive\r\n\r\n".len();

/// Header names `AddHeader` refuses because this crate manages them
/// itself (case-sensitive exact *prefix* match, per spec.md S4.1 --
/// `"Content-Length-Custom"` is rejected exactly as `"Content-Length"`
/// is, matching `IotHttpsClient_AddHeader`'s `strncmp` check).
pub const AUTO_MANAGED_HEADERS: [&str; 4] =
    ["Content-Length", "Connection", "Host", "User-Agent"];

pub fn is_auto_managed_header(name: &str) -> bool {
    AUTO_MANAGED_HEADERS.iter().any(|&h| name.starts_with(h))
}

/// Appends the trailing `Content-Length`/`Connection`/blank-line block
/// `SendHeaders` sends after the caller's own headers. Mirrors spec.md
/// S4.1 exactly: a `Content-Length` line only if `content_length > 0`,
/// then `Connection: close` or `Connection: keep-alive`, then the final
/// CRLF that ends the header block.
pub fn write_reserved_tail(out: &mut Vec<u8>, content_length: u64, non_persistent: bool) {
    if content_length > 0 {
        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(content_length.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if non_persistent {
        out.extend_from_slice(b"Connection: close\r\n");
    } else {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    }
    out.extend_from_slice(b"\r\n");
}
