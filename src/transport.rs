//! The transport operation vector (component C1 of the spec): byte-oriented
//! send/recv plus a receive-ready signal. This crate never opens a socket
//! or performs a TLS handshake itself -- it consumes an implementation of
//! these two traits the way it consumes `httparse` or `Scheduler`.

use std::fmt;

use error::Error;

/// `serverInfo` from spec.md S6: `{ hostName, port }`. `host_name` is
/// bounded by `Config::max_hostname_len`; the original NUL-terminates it
/// for the C transport API, which Rust's `&str`/`String` make unnecessary.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub host_name: String,
    pub port: u16,
}

/// `credentials` from spec.md S6, supplied only for TLS connections.
/// `alpn_protocols` replaces the NUL-terminated, comma-joined scratch
/// buffer of the original with an owned `Vec<String>`.
#[derive(Clone)]
pub struct Credentials {
    pub disable_sni: bool,
    pub alpn_protocols: Vec<String>,
    pub root_ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Never print key material.
        f.debug_struct("Credentials")
            .field("disable_sni", &self.disable_sni)
            .field("alpn_protocols", &self.alpn_protocols)
            .field("root_ca_len", &self.root_ca.len())
            .field("client_cert_len", &self.client_cert.len())
            .field("private_key_len", &self.private_key.len())
            .finish()
    }
}

/// Called by a `Transport` implementation, on whatever thread it owns,
/// to signal that bytes are available to `recv`. The original's
/// `setReceiveCallback(handle, cb, ctx)` folded the user context pointer
/// into `cb`'s closure capture; this does the same with `FnMut`.
pub type ReceiveCallback = Box<dyn FnMut() + Send>;

/// Opens (and, for TLS, handshakes) a `Transport` instance. Split out from
/// `Transport` itself because `create` needs the connection parameters up
/// front while every other operation acts on an already-open handle.
pub trait TransportFactory: Send + Sync {
    type Handle: Transport;

    fn create(
        &self,
        server: &ServerInfo,
        credentials: Option<&Credentials>,
    ) -> Result<Self::Handle, Error>;
}

/// The per-connection half of the operation vector: `close`, `destroy`,
/// `send`, `recv`, `setReceiveCallback`. `create` lives on
/// `TransportFactory` instead (see above).
pub trait Transport: Send {
    /// Installs the receive-ready notifier. Called exactly once, right
    /// after `create` succeeds.
    fn set_receive_callback(&mut self, callback: ReceiveCallback);

    /// Sends up to `buf.len()` bytes, returning the number actually
    /// written. `0` means error (spec.md S6).
    fn send(&mut self, buf: &[u8]) -> usize;

    /// Reads up to `buf.len()` bytes into `buf`, returning the number
    /// read. `0` means timeout, a negative return means error (spec.md
    /// S6); Rust has no unsigned negative, so this returns `isize`.
    fn recv(&mut self, buf: &mut [u8]) -> isize;

    /// Closes the connection but does not release transport resources.
    fn close(&mut self);

    /// Releases transport resources. Called after `close`.
    fn destroy(&mut self);
}
