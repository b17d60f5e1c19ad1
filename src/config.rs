use std::sync::Arc;
use std::time::Duration;

/// Tunable knobs for a connection, built with the same `new().setter(..)
/// .done()` style the teacher crate uses for its own `client::Config`.
/// Everything here is either named directly in spec.md S5/S6 (the I/O
/// timeout, the header-scratch size) or supplements a constant the
/// original C client hardcoded at compile time (see DESIGN.md) --
/// `connection_acquire_timeout`, `max_flush_buffer_size`,
/// `max_headers` -- promoted to runtime configuration since nothing in
/// the spec forbids it and the integrator already tunes these in the
/// original via build-time macros.
#[derive(Debug, Clone)]
pub struct Config {
    user_agent: String,
    io_timeout: Duration,
    connection_acquire_timeout: Duration,
    max_flush_buffer_size: usize,
    max_headers: usize,
    max_headers_hard_limit: usize,
    max_hostname_len: usize,
    max_alpn_len: usize,
}

impl Config {
    /// Create a config with defaults.
    pub fn new() -> Config {
        Config {
            user_agent: "https-client/0.1".into(),
            io_timeout: Duration::from_secs(5),
            connection_acquire_timeout: Duration::from_secs(3),
            max_flush_buffer_size: 256,
            max_headers: 16,
            max_headers_hard_limit: 1024,
            max_hostname_len: 253,
            max_alpn_len: 64,
        }
    }

    /// `User-Agent` header value stamped by `InitializeRequest`.
    pub fn user_agent<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.user_agent = value.into();
        self
    }

    /// Bound on a single blocking `Transport::recv` call, and on how long
    /// a sync receive loop waits for bytes before surfacing
    /// `Error::TimeoutError`.
    pub fn io_timeout(&mut self, value: Duration) -> &mut Self {
        self.io_timeout = value;
        self
    }

    /// How long `SendSync` waits to acquire an already-busy connection
    /// before giving up with `Error::Busy`. Distinct from `io_timeout`:
    /// this bounds queueing for the connection itself, not a single
    /// network operation. Carried over from the original's
    /// `IOT_HTTPS_MAX_CONN_USAGE_WAIT_MS` (see DESIGN.md).
    pub fn connection_acquire_timeout(&mut self, value: Duration) -> &mut Self {
        self.connection_acquire_timeout = value;
        self
    }

    /// Size of the scratch buffer `Connection::flush_network_data` reads
    /// discarded bytes into. Carried over from
    /// `IOT_HTTPS_MAX_FLUSH_BUFFER_SIZE`.
    pub fn max_flush_buffer_size(&mut self, value: usize) -> &mut Self {
        self.max_flush_buffer_size = value;
        self
    }

    /// Number of `httparse::Header` slots allocated on the stack for the
    /// common case. Mirrors the teacher's `MIN_HEADERS`; exceeding it
    /// triggers one reparse against a heap `Vec` sized
    /// `max_headers_hard_limit`, mirroring the teacher's `MAX_HEADERS`.
    pub fn max_headers(&mut self, value: usize) -> &mut Self {
        self.max_headers = value;
        self
    }

    pub fn max_headers_hard_limit(&mut self, value: usize) -> &mut Self {
        self.max_headers_hard_limit = value;
        self
    }

    /// Bound on `ServerInfo::host_name`'s byte length, checked by
    /// `Connection::connect` before the transport is ever created
    /// (spec.md S6; `IOT_HTTPS_MAX_HOST_NAME_LENGTH` in the original).
    pub fn max_hostname_len(&mut self, value: usize) -> &mut Self {
        self.max_hostname_len = value;
        self
    }

    /// Bound on `Credentials::alpn_protocols` once comma-joined into one
    /// buffer the way the original serializes it, checked by
    /// `Connection::connect` (spec.md S6;
    /// `IOT_HTTPS_MAX_ALPN_PROTOCOLS_LENGTH` in the original).
    pub fn max_alpn_len(&mut self, value: usize) -> &mut Self {
        self.max_alpn_len = value;
        self
    }

    pub fn get_user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn get_io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn get_connection_acquire_timeout(&self) -> Duration {
        self.connection_acquire_timeout
    }

    pub fn get_max_flush_buffer_size(&self) -> usize {
        self.max_flush_buffer_size
    }

    pub fn get_max_headers(&self) -> usize {
        self.max_headers
    }

    pub fn get_max_headers_hard_limit(&self) -> usize {
        self.max_headers_hard_limit
    }

    pub fn get_max_hostname_len(&self) -> usize {
        self.max_hostname_len
    }

    pub fn get_max_alpn_len(&self) -> usize {
        self.max_alpn_len
    }

    /// Wrap the config in an `Arc` ready to pass to `Connection::connect`.
    /// Convenience method, mirrors the teacher's `Config::done`.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
