//! Synchronous request/response round trips against the loopback
//! transport: a plain fixed-length body, HEAD suppression, a body buffer
//! too small for the response, and chunked decoding.

extern crate https_client;

mod support;

use std::sync::Arc;
use std::time::Duration;

use https_client::{
    initialize_request, Config, ConnectSpec, Connection, Method, RequestInfo, ThreadScheduler,
};
use support::{server_info, Loopback, LoopbackFactory};

fn connect(loopback: &Loopback) -> Connection<support::LoopbackHandle> {
    let factory = LoopbackFactory(loopback.clone());
    let spec = ConnectSpec {
        server: server_info(),
        credentials: None,
    };
    let scheduler = Arc::new(ThreadScheduler);
    let config = Config::new().done();
    Connection::connect(&factory, &spec, scheduler, config).unwrap()
}

#[test]
fn fixed_length_body_round_trips() {
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Get,
        path: "/widgets",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request, response) = initialize_request(512, 512, Some(512), &info, &config).unwrap();

    // send_sync blocks this thread until a response arrives, so the
    // canned reply has to be pushed from another thread once the
    // request has actually gone out.
    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
    });

    let mut response = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap();
    responder.join().unwrap();

    assert_eq!(response.read_status().unwrap(), 200);
    assert_eq!(response.read_content_length().unwrap(), 11);
    assert_eq!(response.sync_body().unwrap(), b"hello world");

    let sent = loopback.sent_bytes();
    let sent_text = String::from_utf8(sent).unwrap();
    assert!(sent_text.starts_with("GET /widgets HTTP/1.1\r\n"));
    assert!(sent_text.contains("Host: example.com\r\n"));
    assert!(sent_text.ends_with("Connection: keep-alive\r\n\r\n"));

    let mut out = [0u8; 16];
    let n = response.read_header("content-length", &mut out).unwrap();
    assert_eq!(&out[..n], b"11");
}

#[test]
fn head_request_suppresses_body_even_with_content_length() {
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Head,
        path: "/widgets",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request, response) = initialize_request(512, 512, Some(512), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
    });

    let response = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap();
    responder.join().unwrap();

    assert_eq!(response.read_status().unwrap(), 200);
    assert_eq!(response.sync_body().unwrap(), b"");
}

#[test]
fn small_body_buffer_reports_message_too_large() {
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    // Only 4 bytes of body capacity for an 11-byte response.
    let (request, response) = initialize_request(512, 512, Some(4), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
    });

    let err = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap_err();
    responder.join().unwrap();
    assert!(matches!(err, https_client::Error::MessageTooLarge));
}

#[test]
fn message_too_large_does_not_corrupt_the_next_request_on_the_same_connection() {
    // spec.md S3: after `MessageTooLarge`, `FlushNetworkData` has to drain
    // whatever's left of the over-sized response body before the next
    // request on this persistent connection is allowed to read a reply,
    // or the leftover bytes would be misparsed as part of it.
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();

    let info = RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request, response) = initialize_request(512, 512, Some(4), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
    });
    let err = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap_err();
    responder.join().unwrap();
    assert!(matches!(err, https_client::Error::MessageTooLarge));
    assert!(conn.is_connected());

    let sent_before_second = loopback.sent_bytes().len();
    let info2 = RequestInfo {
        method: Method::Get,
        path: "/next",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request2, response2) = initialize_request(512, 512, Some(512), &info2, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder2 = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(sent_before_second + 1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    });
    let response2 = conn
        .send_sync(request2, response2, Some(Duration::from_secs(2)))
        .unwrap();
    responder2.join().unwrap();

    assert_eq!(response2.read_status().unwrap(), 200);
    assert_eq!(response2.sync_body().unwrap(), b"ok");
}

#[test]
fn chunked_body_decodes_over_sync_path() {
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request, response) = initialize_request(512, 512, Some(64), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              7\r\nMozilla\r\n9\r\nDeveloper\r\n7\r\nNetwork\r\n0\r\n\r\n",
        );
    });

    let response = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap();
    responder.join().unwrap();

    assert_eq!(response.sync_body().unwrap(), b"MozillaDeveloperNetwork");
}

#[test]
fn non_persistent_request_closes_the_connection() {
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        is_async: false,
        is_non_persistent: true,
        sync_body: None,
    };
    let (request, response) = initialize_request(512, 512, Some(512), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    });

    conn.send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap();
    responder.join().unwrap();

    let deadline = ::std::time::Instant::now() + Duration::from_secs(1);
    while !loopback.is_closed() && ::std::time::Instant::now() < deadline {
        ::std::thread::sleep(Duration::from_millis(5));
    }
    assert!(loopback.is_closed());
    assert!(!conn.is_connected());

    // spec.md S4.5's "implicit connect": reopen the now-disconnected
    // handle and confirm a request still goes through on the same
    // `Connection<T>`.
    let factory = LoopbackFactory(loopback.clone());
    let spec = ConnectSpec {
        server: server_info(),
        credentials: None,
    };
    conn.reconnect(&factory, &spec).unwrap();
    assert!(conn.is_connected());

    let sent_before_reconnect_request = loopback.sent_bytes().len();
    let info2 = RequestInfo {
        method: Method::Get,
        path: "/again",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    let (request2, response2) = initialize_request(512, 512, Some(512), &info2, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder2 = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(sent_before_reconnect_request + 1);
        loopback_clone.push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    });
    let response2 = conn
        .send_sync(request2, response2, Some(Duration::from_secs(2)))
        .unwrap();
    responder2.join().unwrap();
    assert_eq!(response2.sync_body().unwrap(), b"ok");
}

#[test]
fn header_buffer_too_small_reports_insufficient_memory_and_disconnects() {
    // spec.md S8 scenario S6 asks for a degraded continuation when the
    // header buffer can't hold every header; this crate makes the
    // documented deviation of treating it as fatal instead (DESIGN.md),
    // since `httparse` needs the whole header block contiguous and has
    // no notion of a "partial but usable" parse to fall back on.
    let loopback = Loopback::new();
    let conn = connect(&loopback);
    let config = Config::new();
    let info = RequestInfo {
        method: Method::Get,
        path: "/",
        host: "example.com",
        is_async: false,
        is_non_persistent: false,
        sync_body: None,
    };
    // Only 24 bytes of response header capacity -- nowhere near enough
    // for the status line plus the header below.
    let (request, response) = initialize_request(512, 24, Some(512), &info, &config).unwrap();

    let loopback_clone = loopback.clone();
    let responder = ::std::thread::spawn(move || {
        loopback_clone.wait_for_sent_len(1);
        loopback_clone.push_response(
            b"HTTP/1.1 200 OK\r\nX-Custom: a-value-long-enough-to-overflow\r\n\r\nbody",
        );
    });

    let err = conn
        .send_sync(request, response, Some(Duration::from_secs(2)))
        .unwrap_err();
    responder.join().unwrap();

    assert!(matches!(err, https_client::Error::InsufficientMemory));

    let deadline = ::std::time::Instant::now() + Duration::from_secs(1);
    while conn.is_connected() && ::std::time::Instant::now() < deadline {
        ::std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!conn.is_connected());
}
