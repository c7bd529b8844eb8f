//! End-to-end exchanges against a running server over real sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reaktor::config::Config;
use reaktor::reactor::{Server, ShutdownHandle};

fn config() -> Config {
    Config {
        port: 0,
        ..Config::default()
    }
}

fn start(config: Config) -> (SocketAddr, ShutdownHandle, JoinHandle<()>) {
    let mut server = Server::new(config).expect("server failed to start");
    let port = server.local_addr().unwrap().port();
    let handle = server.shutdown_handle();
    let thread = thread::spawn(move || server.run());

    (SocketAddr::from(([127, 0, 0, 1], port)), handle, thread)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

fn terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Reads exactly one response: the head up to `CRLF CRLF`, then
/// `Content-Length` body bytes.
fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    while terminator(&buf).is_none() {
        let n = stream.read(&mut chunk).expect("read response head");
        assert!(n > 0, "connection closed before response head");
        buf.extend_from_slice(&chunk[..n]);
    }

    let head_end = terminator(&buf).unwrap() + 4;
    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).expect("read response body");
        assert!(n > 0, "connection closed before response body");
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8(buf).unwrap()
}

fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    match stream.read_to_end(&mut rest) {
        Ok(_) => assert!(rest.is_empty(), "unexpected extra bytes: {rest:?}"),
        // reset is also an acceptable way to learn the server hung up
        Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => {}
        Err(err) => panic!("connection was not closed: {err}"),
    }
}

#[test]
fn http10_request_is_served_then_closed() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);

    stream
        .write_all(b"GET / HTTP/1.0\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("Processed in thread pool. Path: /"));
    assert_closed(&mut stream);

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);

    stream
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let first = read_response(&mut stream);
    assert!(first.ends_with("Processed in thread pool. Path: /a"));

    stream
        .write_all(b"GET /b HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    let second = read_response(&mut stream);
    assert!(second.ends_with("Processed in thread pool. Path: /b"));

    assert_closed(&mut stream);

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn unsupported_method_gets_a_400() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);

    stream
        .write_all(b"PUT / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.ends_with("Bad Request"));

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn post_with_empty_body_is_processed() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);

    stream
        .write_all(b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("Processed in thread pool. Path: /submit"));
    assert_closed(&mut stream);

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn connection_closes_once_the_request_budget_is_spent() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);
    let request = b"GET /n HTTP/1.1\r\nHost: x\r\nKeep-Alive: max=2\r\n\r\n";

    stream.write_all(request).unwrap();
    assert!(read_response(&mut stream).starts_with("HTTP/1.1 200 OK\r\n"));

    stream.write_all(request).unwrap();
    assert!(read_response(&mut stream).starts_with("HTTP/1.1 200 OK\r\n"));

    // the second response spent the budget; the third request gets no answer
    let _ = stream.write_all(request);
    assert_closed(&mut stream);

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn accepts_are_rejected_beyond_the_connection_cap() {
    let mut config = config();
    config.max_connections = 2;
    let (addr, shutdown, thread) = start(config);

    let mut first = connect(addr);
    first
        .write_all(b"GET /1 HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut first).starts_with("HTTP/1.1 200 OK\r\n"));

    let mut second = connect(addr);
    second
        .write_all(b"GET /2 HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut second).starts_with("HTTP/1.1 200 OK\r\n"));

    // both slots taken; the third socket is closed before any byte is read
    let mut third = connect(addr);
    assert_closed(&mut third);

    shutdown.shutdown();
    thread.join().unwrap();
}

#[test]
fn idle_connection_is_swept_after_its_keep_alive_timeout() {
    let (addr, shutdown, thread) = start(config());
    let mut stream = connect(addr);

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nKeep-Alive: timeout=1\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut stream).starts_with("HTTP/1.1 200 OK\r\n"));

    // idle past the 1s deadline; the next sweep closes the connection
    assert_closed(&mut stream);

    shutdown.shutdown();
    thread.join().unwrap();
}
