//! An embedded-grade HTTP/1.1 client: caller-owned buffers, no allocation
//! in the hot path, a synchronous and a callback-driven asynchronous mode
//! sharing one persistent connection.
//!
//! This crate implements the operation vector against consumed traits
//! rather than sockets or a TLS stack: bring your own [`Transport`],
//! [`Scheduler`], and (for TLS) your own `Credentials`-aware factory. See
//! each module for the corresponding slice of the API.

extern crate httparse;
#[macro_use(quick_error)]
extern crate quick_error;
#[macro_use]
extern crate log;

pub mod buffer;
pub mod callbacks;
mod chunked;
pub mod config;
pub mod connection;
pub mod error;
mod headers;
pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod transport;

pub use callbacks::{AsyncCallbacks, BodyReader};
pub use config::Config;
pub use connection::{ConnectSpec, Connection};
pub use error::Error;
pub use method::{Method, Version};
pub use parser::{BodyKind, BufferProcessingState, ParserState};
pub use request::{
    initialize_request, minimum_request_buffer_len, CancelHandle, RequestBuffer, RequestInfo,
};
pub use response::ResponseBuffer;
pub use scheduler::{Job, Scheduler, ThreadScheduler};
pub use transport::{Credentials, ReceiveCallback, ServerInfo, Transport, TransportFactory};

/// One-time global setup, carried over from the original C library's
/// `Init` entry point (see DESIGN.md). Rust's module system and `Arc`
/// ownership give every piece of state here its own lifetime already, so
/// there is nothing left to initialize -- kept only so a caller porting
/// from the original API has a direct equivalent to call.
pub fn init() {}

/// One-time global teardown, the counterpart to [`init`]. Also a no-op:
/// every resource this crate allocates (connections, buffers, scheduled
/// jobs) is released through ordinary `Drop` when its owner goes out of
/// scope, not through a global registry that needs a shutdown pass.
pub fn deinit() {}
