//! Connection manager (component C7): connect/disconnect, the per-connection
//! request queue, dispatch onto a worker (async) or the calling thread
//! (sync), cancellation, and teardown. This module is the 35%-share core
//! the spec's component table calls out and is grounded on the teacher's
//! `client/proto.rs` (the single place a connection's in-flight state and
//! its queue of waiting exchanges live together) generalized from one
//! `Codec` future per slot to one `ExchangeState` per slot, and on
//! `client/client.rs` for the connect/lookup/config wiring shape.
//!
//! **Resolved ambiguity** (spec.md S9, bullet 1): this crate uses the
//! direct-dispatch variant of the receive-ready callback -- the transport's
//! notifier runs `Connection::on_receive_ready` inline rather than merely
//! posting a semaphore for a separate application thread to drain. See
//! DESIGN.md.
//!
//! **Response ownership while in flight.** `spec.md` S5's ordering
//! guarantee (no pipelining: one exchange's receive processing completes
//! before the next begins) means a response is only ever touched by one
//! thread at a time, even though it is reachable from both queues. Rather
//! than holding the per-connection mutex for the whole header+body
//! receive phase (which would make `ReadHeader`/`ReadResponseBody`
//! reentrant-lock the same mutex from inside a user callback), the
//! response is taken out of `ExchangeState` for the duration of
//! `receive_one_response` and put back only long enough for
//! `finish_exchange` to fold in the terminal status and, for the sync
//! path, hand it back to `send_sync`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use buffer;
use callbacks::{AsyncCallbacks, BodyReader};
use config::Config;
use error::Error;
use parser::ParserState;
use request::RequestBuffer;
use response::ResponseBuffer;
use scheduler::Scheduler;
use transport::{Credentials, ServerInfo, Transport, TransportFactory};

/// What `Connection::connect` (and `Connection::reconnect`) needs to open
/// the transport: the server to reach and the credentials to present.
/// spec.md S4.5's "implicit connect" (auto-opening a connection given a
/// null-or-disconnected handle) is realized here as `Connection::reconnect`,
/// an explicit call rather than one `send_sync`/`send_async` trigger
/// automatically -- see DESIGN.md for why.
#[derive(Debug, Clone)]
pub struct ConnectSpec {
    pub server: ServerInfo,
    pub credentials: Option<Credentials>,
}

/// The state one queued request/response exchange shares between the
/// thread that enqueued it, the worker that sends it, and whichever
/// thread the transport's receive-ready notifier runs on. A Rust
/// `Arc<Mutex<_>>` standing in for the original's pair of intrusive queue
/// links plus a `cancelled` flag read from three different call sites.
struct ExchangeState {
    /// `Some` until the send job takes it to build the wire bytes.
    request: Option<RequestBuffer>,
    /// `Some` except while a receive is actively driving it (see the
    /// module doc comment) or after `send_sync` has taken final
    /// ownership of it.
    response: Option<ResponseBuffer>,
    callbacks: Option<Box<dyn AsyncCallbacks>>,
    is_non_persistent: bool,
    finished_sending: bool,
    cancelled: Arc<AtomicBool>,
}

type SharedExchange = Arc<Mutex<ExchangeState>>;

fn lock<X>(m: &Mutex<X>) -> Result<MutexGuard<'_, X>, Error> {
    m.lock().map_err(|_| Error::InternalError("mutex poisoned by a panicked thread"))
}

/// Enforces `Config::max_hostname_len`/`max_alpn_len`, spec.md S6 ("Max
/// hostname length and max ALPN protocol-list length are compile-time
/// constants"), matching the original's `IOT_HTTPS_MAX_HOST_NAME_LENGTH`/
/// `IOT_HTTPS_MAX_ALPN_PROTOCOLS_LENGTH` checks in `IotHttpsClient_Connect`.
/// The ALPN list is measured the way the original serializes it: protocol
/// names joined by commas into one buffer.
fn validate_connect_spec(spec: &ConnectSpec, config: &Config) -> Result<(), Error> {
    if spec.server.host_name.len() > config.get_max_hostname_len() {
        return Err(Error::InvalidParameter("host name exceeds max_hostname_len"));
    }
    if let Some(creds) = spec.credentials.as_ref() {
        let protos = &creds.alpn_protocols;
        if !protos.is_empty() {
            let joined_len: usize =
                protos.iter().map(|p| p.len()).sum::<usize>() + protos.len() - 1;
            if joined_len > config.get_max_alpn_len() {
                return Err(Error::InvalidParameter("ALPN protocol list exceeds max_alpn_len"));
            }
        }
    }
    Ok(())
}

struct Shared<T: Transport> {
    transport: Mutex<Option<T>>,
    is_connected: AtomicBool,
    request_queue: Mutex<VecDeque<SharedExchange>>,
    response_queue: Mutex<VecDeque<SharedExchange>>,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<Config>,
}

/// A single persistent connection, reused across strictly serialized
/// (non-pipelined) request/response exchanges (spec.md S1/S5). Cheap to
/// clone: every clone shares the same queues and transport handle.
pub struct Connection<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Connection { shared: self.shared.clone() }
    }
}

impl<T: Transport + 'static> Connection<T> {
    /// `Connect(&handle, info)`, spec.md S4.5, minus the null-handle
    /// "implicit connect" half (see `ConnectSpec`'s doc comment). Opens
    /// the transport,
    /// installs the receive-ready notifier, and initializes both queues
    /// empty. On transport failure every partially acquired resource is
    /// released automatically when the returned `Err` drops its locals.
    pub fn connect<F>(
        factory: &F,
        spec: &ConnectSpec,
        scheduler: Arc<dyn Scheduler>,
        config: Arc<Config>,
    ) -> Result<Connection<T>, Error>
    where
        F: TransportFactory<Handle = T>,
    {
        validate_connect_spec(spec, &config)?;
        let mut handle = factory.create(&spec.server, spec.credentials.as_ref())?;
        let shared = Arc::new(Shared {
            transport: Mutex::new(None),
            is_connected: AtomicBool::new(true),
            request_queue: Mutex::new(VecDeque::new()),
            response_queue: Mutex::new(VecDeque::new()),
            scheduler,
            config,
        });
        let notify_shared = shared.clone();
        handle.set_receive_callback(Box::new(move || {
            if let Err(err) = on_receive_ready(&notify_shared) {
                error!("https-client: receive-ready handling failed: {}", err);
            }
        }));
        *lock(&shared.transport)? = Some(handle);
        Ok(Connection { shared })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected.load(Ordering::Acquire)
    }

    /// Explicit counterpart to spec.md S4.5's "implicit connect": reopens
    /// this connection's transport when the handle is disconnected (a
    /// fatal network/parse error, a non-persistent request completing, or
    /// an explicit `disconnect()`), given the same `ConnectSpec` and
    /// factory `connect` would have been called with. A no-op if already
    /// connected.
    ///
    /// Unlike `connect`, which builds a brand new `Connection<T>` with
    /// empty queues, this reuses the existing `Connection<T>`: any
    /// exchange still sitting at the head of the request queue (enqueued
    /// after the disconnect but before a caller noticed and called this)
    /// is dispatched once the fresh transport is in place, rather than
    /// left to fail against a `None` transport.
    pub fn reconnect<F>(&self, factory: &F, spec: &ConnectSpec) -> Result<(), Error>
    where
        F: TransportFactory<Handle = T>,
    {
        if self.is_connected() {
            return Ok(());
        }
        validate_connect_spec(spec, &self.shared.config)?;
        let mut handle = factory.create(&spec.server, spec.credentials.as_ref())?;
        let notify_shared = self.shared.clone();
        handle.set_receive_callback(Box::new(move || {
            if let Err(err) = on_receive_ready(&notify_shared) {
                error!("https-client: receive-ready handling failed: {}", err);
            }
        }));
        *lock(&self.shared.transport)? = Some(handle);
        self.shared.is_connected.store(true, Ordering::Release);
        debug!("https-client: connection reopened");

        let head = lock(&self.shared.request_queue)?.front().cloned();
        if let Some(exchange) = head {
            schedule_send(self.shared.clone(), exchange)?;
        }
        Ok(())
    }

    /// `Disconnect(handle)`, spec.md S4.5. Returns `Error::Busy` if the
    /// head of the request queue is still emitting bytes; the caller is
    /// expected to retry after that request completes.
    pub fn disconnect(&self) -> Result<(), Error> {
        {
            let queue = lock(&self.shared.request_queue)?;
            if let Some(head) = queue.front() {
                if !lock(head)?.finished_sending {
                    return Err(Error::Busy);
                }
            }
        }
        disconnect_internal(&self.shared)
    }

    /// `AddRequestToConnectionReqQ` + `ScheduleHttpsRequestSend`, spec.md
    /// S4.5: enqueue, and if the queue was empty, dispatch immediately.
    fn enqueue(&self, exchange: SharedExchange) -> Result<(), Error> {
        let was_empty = {
            let mut queue = lock(&self.shared.request_queue)?;
            let was_empty = queue.is_empty();
            queue.push_back(exchange.clone());
            was_empty
        };
        if was_empty {
            schedule_send(self.shared.clone(), exchange)?;
        }
        Ok(())
    }

    /// `SendAsync`, spec.md S4.5/S6. Enqueues `request` and returns
    /// immediately; `callbacks` receives the full per-phase sequence
    /// described in spec.md S5's ordering guarantees.
    pub fn send_async(
        &self,
        request: RequestBuffer,
        response: ResponseBuffer,
        callbacks: Box<dyn AsyncCallbacks>,
    ) -> Result<(), Error> {
        if !request.is_async() {
            return Err(Error::InvalidParameter("send_async requires an asynchronous request"));
        }
        let exchange = new_exchange(request, response, Some(callbacks));
        self.enqueue(exchange)
    }

    /// `SendSync(conn, req, &resp, timeoutMs)`, spec.md S4.5. Blocks the
    /// calling thread until the response completes or `timeout` elapses
    /// (`None` waits forever). On timeout the request is cancelled and
    /// `Error::Busy` is returned, matching the original's "cancel, then
    /// report busy" contract.
    pub fn send_sync(
        &self,
        request: RequestBuffer,
        response: ResponseBuffer,
        timeout: Option<Duration>,
    ) -> Result<ResponseBuffer, Error> {
        if request.is_async() {
            return Err(Error::InvalidParameter("send_sync requires a synchronous request"));
        }
        let ready = response.completion_signal();
        let cancel_flag = request.cancel_flag();
        let exchange = new_exchange(request, response, None);
        self.enqueue(exchange.clone())?;

        let (lock_, cvar) = &*ready;
        let mut done = lock(lock_)?;
        if let Some(d) = timeout {
            loop {
                if *done {
                    break;
                }
                let (guard, result) = cvar
                    .wait_timeout(done, d)
                    .map_err(|_| Error::InternalError("completion signal poisoned"))?;
                done = guard;
                if result.timed_out() && !*done {
                    cancel_flag.store(true, Ordering::Release);
                    return Err(Error::Busy);
                }
            }
        } else {
            while !*done {
                done = cvar
                    .wait(done)
                    .map_err(|_| Error::InternalError("completion signal poisoned"))?;
            }
        }
        drop(done);

        let mut state = lock(&exchange)?;
        let mut response = state
            .response
            .take()
            .expect("finish_exchange always returns the response to a sync exchange");
        match response.take_sync_status() {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }
}

fn new_exchange(
    request: RequestBuffer,
    response: ResponseBuffer,
    callbacks: Option<Box<dyn AsyncCallbacks>>,
) -> SharedExchange {
    let is_non_persistent = request.is_non_persistent();
    let cancelled = request.cancel_flag();
    Arc::new(Mutex::new(ExchangeState {
        request: Some(request),
        response: Some(response),
        callbacks,
        is_non_persistent,
        finished_sending: false,
        cancelled,
    }))
}

fn schedule_send<T: Transport + 'static>(
    shared: Arc<Shared<T>>,
    exchange: SharedExchange,
) -> Result<(), Error> {
    let job_shared = shared.clone();
    let job_exchange = exchange.clone();
    shared.scheduler.schedule(Box::new(move || {
        if let Err(err) = run_send_job(&job_shared, job_exchange) {
            error!("https-client: send job failed: {}", err);
        }
    }))
}

/// The worker job, spec.md S4.5 "Send job" (8 numbered steps).
fn run_send_job<T: Transport + 'static>(
    shared: &Arc<Shared<T>>,
    exchange: SharedExchange,
) -> Result<(), Error> {
    if lock(&exchange)?.cancelled.load(Ordering::Acquire) {
        return finish_exchange(shared, exchange, Some(Error::AsyncCancelled));
    }

    lock(&shared.response_queue)?.push_back(exchange.clone());

    let mut request = {
        let mut state = lock(&exchange)?;
        state.finished_sending = false;
        state.request.take().expect("send job runs exactly once per exchange")
    };

    {
        let mut state = lock(&exchange)?;
        if let Some(cb) = state.callbacks.as_mut() {
            cb.connection_established();
            cb.append_header(&mut request);
            cb.write(&mut request);
        }
    }

    if lock(&exchange)?.cancelled.load(Ordering::Acquire) {
        return finish_exchange(shared, exchange, Some(Error::AsyncCancelled));
    }

    let outcome = send_request(shared, &request);
    lock(&exchange)?.finished_sending = true;

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => finish_exchange(shared, exchange, Some(err)),
    }
}

fn send_request<T: Transport>(shared: &Arc<Shared<T>>, request: &RequestBuffer) -> Result<(), Error> {
    let mut guard = lock(&shared.transport)?;
    let transport = guard.as_mut().ok_or(Error::Busy)?;
    send_headers(transport, request)?;
    if let Some(body) = request.body() {
        if !body.is_empty() {
            network_send(transport, body)?;
        }
    }
    Ok(())
}

/// `SendHeaders(conn, headersBuf, len, nonPersistent, contentLength)`,
/// spec.md S4.1: the caller's own header bytes verbatim, then the
/// in-stack reserved tail (`Content-Length`, `Connection`, final CRLF).
fn send_headers<T: Transport>(transport: &mut T, request: &RequestBuffer) -> Result<(), Error> {
    network_send(transport, request.headers_bytes())?;
    let mut tail = Vec::with_capacity(buffer::RESERVED_TAIL);
    buffer::write_reserved_tail(&mut tail, request.content_length(), request.is_non_persistent());
    network_send(transport, &tail)
}

/// `NetworkSend`, spec.md S4.3: loops until `buf` is fully transmitted or
/// the transport reports a hard error (`send` returning 0).
fn network_send<T: Transport>(transport: &mut T, buf: &[u8]) -> Result<(), Error> {
    let mut sent = 0;
    while sent < buf.len() {
        let n = transport.send(&buf[sent..]);
        if n == 0 {
            return Err(Error::NetworkError(::std::io::Error::new(
                ::std::io::ErrorKind::Other,
                "transport send returned 0",
            )));
        }
        sent += n;
    }
    Ok(())
}

/// `NetworkRecv`, spec.md S4.3: one bounded `recv`. `Ok(0)` is a timeout
/// (tolerated by the receive loops below), a negative return is a hard
/// network error.
fn network_recv<T: Transport>(transport: &mut T, buf: &mut [u8]) -> Result<usize, Error> {
    let n = transport.recv(buf);
    if n < 0 {
        return Err(Error::NetworkError(::std::io::Error::new(
            ::std::io::ErrorKind::Other,
            "transport recv returned a negative count",
        )));
    }
    Ok(n as usize)
}

/// The receive-ready callback, spec.md S4.5 (8 numbered steps). Runs
/// inline on whatever thread the transport's notifier calls from -- see
/// the direct-dispatch resolution documented in the module doc comment.
fn on_receive_ready<T: Transport + 'static>(shared: &Arc<Shared<T>>) -> Result<(), Error> {
    let exchange = match lock(&shared.response_queue)?.pop_front() {
        Some(e) => e,
        None => {
            warn!("https-client: receive-ready with no pending response, dropping connection");
            disconnect_internal(shared)?;
            return Err(Error::NetworkError(::std::io::Error::new(
                ::std::io::ErrorKind::Other,
                "unsolicited data from server",
            )));
        }
    };

    if !lock(&exchange)?.finished_sending {
        return finish_exchange(
            shared,
            exchange,
            Some(Error::NetworkError(::std::io::Error::new(
                ::std::io::ErrorKind::Other,
                "server replied before request finished sending",
            ))),
        );
    }

    if lock(&exchange)?.cancelled.load(Ordering::Acquire) {
        return finish_exchange(shared, exchange, Some(Error::AsyncCancelled));
    }

    let mut response = lock(&exchange)?
        .response
        .take()
        .expect("response is only taken once per exchange, by this call");
    let is_async = lock(&exchange)?.callbacks.is_some();

    let outcome = receive_one_response(shared, &exchange, &mut response, is_async);
    lock(&exchange)?.response = Some(response);
    finish_exchange(shared, exchange, outcome.err())
}

/// Drives one response to completion: `ReceiveHeaders` into the header
/// buffer (spec.md S4.2's `ReceiveMessage`), then the body phase, sync or
/// async per the paired request's mode flag.
fn receive_one_response<T: Transport>(
    shared: &Arc<Shared<T>>,
    exchange: &SharedExchange,
    response: &mut ResponseBuffer,
    is_async: bool,
) -> Result<(), Error> {
    let max_headers = shared.config.get_max_headers();
    let max_headers_hard_limit = shared.config.get_max_headers_hard_limit();
    let no_bytes_deadline = Instant::now() + shared.config.get_io_timeout();

    loop {
        if response.parser_state() >= ParserState::HeadersComplete {
            break;
        }
        if response.header_spare_len() == 0 {
            // The header buffer filled before the driver ever saw the
            // blank line terminating the header block. Unlike the
            // original's byte-streaming parser, `httparse` needs the
            // whole header block contiguous to report anything at all,
            // so (unlike spec.md S8 scenario S6) this crate cannot keep
            // parsing the body once the header buffer overflows; see
            // DESIGN.md.
            return Err(Error::InsufficientMemory);
        }
        let n = {
            let mut guard = lock(&shared.transport)?;
            let transport = guard.as_mut().ok_or(Error::Busy)?;
            network_recv(transport, response.header_spare_mut())?
        };
        if n == 0 {
            // TIMEOUT_ERROR is tolerated inside the header receive loop,
            // per spec.md S7 -- but only up to `io_timeout`'s worth of
            // consecutive timeouts while not a single byte has arrived
            // yet; "surfaced only if no bytes ever arrived" (S7) bounds
            // how long a server can stay silent before we give up rather
            // than looping on a connection nothing will ever answer.
            if response.headers_raw().is_empty() && Instant::now() >= no_bytes_deadline {
                return Err(Error::TimeoutError);
            }
            continue;
        }
        response.advance_headers(n);
        response.try_parse_headers(max_headers, max_headers_hard_limit)?;
    }

    if is_async {
        receive_body_async(shared, exchange, response)
    } else {
        // A response small enough to fit in one `recv` lands headers and
        // body together in the header buffer; `receive_body_sync` drains
        // that residue first, capacity-bounded, before it ever looks for
        // fresh network bytes (see `feed_sync_body_from_header_buf`'s doc
        // comment).
        receive_body_sync(shared, response)
    }
}

fn receive_body_sync<T: Transport>(
    shared: &Arc<Shared<T>>,
    response: &mut ResponseBuffer,
) -> Result<(), Error> {
    let mut scratch = vec![0u8; shared.config.get_max_flush_buffer_size().max(1)];
    let no_bytes_deadline = Instant::now() + shared.config.get_io_timeout();
    loop {
        if response.parser_state() == ParserState::BodyComplete {
            return Ok(());
        }
        if response.is_cancelled() {
            return Err(Error::AsyncCancelled);
        }
        if response.sync_body_buffer_full() {
            return Err(Error::MessageTooLarge);
        }
        // Drain any residue the header-buffer recv already captured
        // before asking the network for more; it's capacity-bounded, so
        // a residue larger than what's left just takes several passes.
        if response.feed_sync_body_from_header_buf()? {
            continue;
        }
        // Cap the read request itself to what the body buffer still has
        // room for. `feed_sync_body` bounds the *decoded* payload to
        // remaining capacity, but `decode_body_bytes` consumes the whole
        // `Fixed`-framed input against `fixed_remaining` regardless of
        // how much of it the push closure could actually store -- a read
        // larger than the remaining capacity would make the body look
        // complete even though most of it never made it into the buffer,
        // masking `MessageTooLarge`.
        let remaining = response.body_spare_mut().map_or(0, |b| b.len());
        let cap = remaining.min(scratch.len());
        let n = {
            let mut guard = lock(&shared.transport)?;
            let transport = guard.as_mut().ok_or(Error::Busy)?;
            network_recv(transport, &mut scratch[..cap])?
        };
        if n == 0 {
            // Same "no bytes ever arrived" bound as the header loop
            // above; once any body byte has landed, timeouts are
            // tolerated indefinitely.
            if response.sync_body_written() == 0 && Instant::now() >= no_bytes_deadline {
                return Err(Error::TimeoutError);
            }
            continue;
        }
        response.feed_sync_body(&scratch[..n])?;
    }
}

fn receive_body_async<T: Transport>(
    shared: &Arc<Shared<T>>,
    exchange: &SharedExchange,
    response: &mut ResponseBuffer,
) -> Result<(), Error> {
    loop {
        if response.parser_state() == ParserState::BodyComplete {
            return Ok(());
        }
        if response.is_cancelled() {
            return Err(Error::AsyncCancelled);
        }
        let mut reader = ConnectionBodyReader {
            shared,
            response: &mut *response,
        };
        let mut state = lock(exchange)?;
        match state.callbacks.as_mut() {
            Some(cb) => cb.read_ready(&mut reader),
            None => return Ok(()),
        }
    }
}

/// The `BodyReader` handed to `AsyncCallbacks::read_ready`: a `&mut
/// ResponseBuffer` (so inspection and the mutable pull share one borrow,
/// see `callbacks.rs`) plus the connection's transport for
/// `ResponseBuffer::read_response_body`'s `recv` callback.
struct ConnectionBodyReader<'a, T: Transport> {
    shared: &'a Arc<Shared<T>>,
    response: &'a mut ResponseBuffer,
}

impl<'a, T: Transport> BodyReader for ConnectionBodyReader<'a, T> {
    fn status(&self) -> Option<u16> {
        self.response.status_code()
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    fn read_response_body(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let shared = self.shared;
        self.response.read_response_body(out, |buf| {
            let mut guard = lock(&shared.transport)?;
            let transport = guard.as_mut().ok_or(Error::Busy)?;
            network_recv(transport, buf)
        })
    }
}

/// Finishes one exchange: folds the outcome into the response (sync
/// status or async callbacks), flushes or disconnects per spec.md S4.5
/// step 7, pops the request queue, and schedules the next queued
/// request, if any. Called both from the normal receive path and from
/// every early-exit (cancellation before send, a send-time network
/// error).
fn finish_exchange<T: Transport + 'static>(
    shared: &Arc<Shared<T>>,
    exchange: SharedExchange,
    outcome: Option<Error>,
) -> Result<(), Error> {
    {
        let mut queue = lock(&shared.response_queue)?;
        if queue.front().map_or(false, |front| Arc::ptr_eq(front, &exchange)) {
            queue.pop_front();
        }
    }

    // `InsufficientMemory` only ever reaches this `outcome` via the header
    // buffer overflowing mid-receive (see DESIGN.md) -- a rogue or
    // misconfigured peer, torn down like a parsing error rather than kept
    // alive for a next request that would just overflow the same buffer
    // again.
    let fatal = matches!(
        outcome,
        Some(Error::NetworkError(_)) | Some(Error::ParsingError(_)) | Some(Error::InsufficientMemory)
    );
    let (is_async, non_persistent) = {
        let mut state = lock(&exchange)?;
        state.finished_sending = true;
        let is_async = state.callbacks.is_some();
        let non_persistent = state.is_non_persistent;
        let ExchangeState {
            ref mut response,
            ref mut callbacks,
            ..
        } = *state;
        match callbacks {
            Some(cb) => match &outcome {
                Some(err) => cb.error(err),
                None => {
                    if let Some(resp) = response.as_ref() {
                        cb.response_complete(resp);
                    }
                }
            },
            None => {
                let resp = response
                    .as_mut()
                    .expect("sync exchanges always keep their response until send_sync takes it");
                resp.set_sync_status(outcome);
                let (lock_, cvar) = &*resp.completion_signal();
                let mut done = lock(lock_)?;
                *done = true;
                cvar.notify_one();
            }
        }
        (is_async, non_persistent)
    };

    if non_persistent || fatal {
        disconnect_internal(shared)?;
        if is_async {
            let mut state = lock(&exchange)?;
            if let Some(cb) = state.callbacks.as_mut() {
                cb.connection_closed();
            }
        }
    } else {
        // Take the response out for the duration of the flush, the same
        // way `on_receive_ready` does for the header/body receive phase
        // (see the module doc comment): nothing else touches
        // `ExchangeState.response` while this runs under the
        // no-pipelining guarantee.
        let mut response = lock(&exchange)?.response.take();
        if let Some(resp) = response.as_mut() {
            flush_network_data(shared, resp)?;
        }
        lock(&exchange)?.response = response;
    }

    let next = {
        let mut queue = lock(&shared.request_queue)?;
        if queue.front().map_or(false, |front| Arc::ptr_eq(front, &exchange)) {
            queue.pop_front();
        }
        queue.front().cloned()
    };
    if let Some(next_exchange) = next {
        schedule_send(shared.clone(), next_exchange)?;
    }
    Ok(())
}

/// `FlushNetworkData`, spec.md S4.5: drains whatever is left of the
/// current response (trailing bytes the body phase didn't consume, e.g.
/// after `MessageTooLarge`) so they don't contaminate the next response
/// on this persistent connection (testable scenario S3). Per spec.md's
/// own wording, this feeds every byte read into the parser/decoder and
/// loops until `response.parser_state()` reaches `BodyComplete`, falling
/// back to the timeout/`Ok(0)` exit only as a last resort -- relying on
/// the socket timing out instead (as a plain drain-until-quiet loop
/// would) can stop early on a mid-body pause and leave stale body bytes
/// for the next request on this connection to misparse, exactly the
/// failure mode `_flushHttpsNetworkData`'s own comment in the original
/// warns about.
fn flush_network_data<T: Transport>(
    shared: &Arc<Shared<T>>,
    response: &mut ResponseBuffer,
) -> Result<(), Error> {
    // Residue the sync body path captured but never consumed (e.g. it
    // already gave up with `MessageTooLarge`) already left the wire; it
    // has to be accounted for before this ever calls `recv` again.
    response.discard_header_buf_residue()?;
    if response.parser_state() == ParserState::BodyComplete {
        return Ok(());
    }
    let mut scratch = vec![0u8; shared.config.get_max_flush_buffer_size().max(1)];
    loop {
        if response.parser_state() == ParserState::BodyComplete {
            return Ok(());
        }
        let n = {
            let mut guard = lock(&shared.transport)?;
            let transport = match guard.as_mut() {
                Some(t) => t,
                None => return Ok(()),
            };
            match network_recv(transport, &mut scratch) {
                Ok(n) => n,
                Err(Error::TimeoutError) => return Ok(()),
                Err(err) => return Err(err),
            }
        };
        if n == 0 {
            return Ok(());
        }
        response.discard_body(&scratch[..n])?;
    }
}

fn disconnect_internal<T: Transport>(shared: &Arc<Shared<T>>) -> Result<(), Error> {
    shared.is_connected.store(false, Ordering::Release);
    let mut guard = lock(&shared.transport)?;
    if let Some(mut transport) = guard.take() {
        transport.close();
        transport.destroy();
        debug!("https-client: connection closed");
    }
    Ok(())
}
