//! An in-process loopback `Transport`: `send` appends to a shared
//! outbound buffer the test can inspect, `recv` drains a shared inbound
//! buffer the test fills via `push_response`. `push_response` invokes
//! the installed receive-ready callback directly, exercising the same
//! direct-dispatch path a real transport would use.

extern crate https_client;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use self::https_client::{Credentials, Error, ReceiveCallback, ServerInfo, Transport, TransportFactory};

#[derive(Clone)]
pub struct Loopback {
    outbound: Arc<Mutex<Vec<u8>>>,
    inbound: Arc<Mutex<VecDeque<u8>>>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
    closed: Arc<AtomicBool>,
}

impl Loopback {
    pub fn new() -> Loopback {
        Loopback {
            outbound: Arc::new(Mutex::new(Vec::new())),
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            callback: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues `data` as if the server had written it, then runs the
    /// client's receive-ready notifier inline -- the direct-dispatch
    /// variant this crate implements (see DESIGN.md).
    pub fn push_response(&self, data: &[u8]) {
        self.inbound.lock().unwrap().extend(data.iter().cloned());
        let mut guard = self.callback.lock().unwrap();
        if let Some(cb) = guard.as_mut() {
            cb();
        }
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Polls `sent_bytes().len() >= at_least` for up to a second; the
    /// send job runs on a scheduler thread, so tests that need to wait
    /// for the request to go out before simulating a server reply poll
    /// rather than racing it.
    pub fn wait_for_sent_len(&self, at_least: usize) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.sent_bytes().len() < at_least {
            if Instant::now() > deadline {
                panic!("timed out waiting for {} bytes to be sent", at_least);
            }
            ::std::thread::sleep(Duration::from_millis(5));
        }
    }
}

pub struct LoopbackHandle(Loopback);

impl Transport for LoopbackHandle {
    fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        *self.0.callback.lock().unwrap() = Some(callback);
    }

    fn send(&mut self, buf: &[u8]) -> usize {
        self.0.outbound.lock().unwrap().extend_from_slice(buf);
        buf.len()
    }

    fn recv(&mut self, buf: &mut [u8]) -> isize {
        let mut inbound = self.0.inbound.lock().unwrap();
        let n = inbound.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbound.pop_front().unwrap();
        }
        n as isize
    }

    fn close(&mut self) {
        self.0.closed.store(true, Ordering::Release);
    }

    fn destroy(&mut self) {}
}

pub struct LoopbackFactory(pub Loopback);

impl TransportFactory for LoopbackFactory {
    type Handle = LoopbackHandle;

    fn create(
        &self,
        _server: &ServerInfo,
        _credentials: Option<&Credentials>,
    ) -> Result<LoopbackHandle, Error> {
        Ok(LoopbackHandle(self.0.clone()))
    }
}

pub fn server_info() -> ServerInfo {
    ServerInfo {
        host_name: "example.com".into(),
        port: 443,
    }
}
