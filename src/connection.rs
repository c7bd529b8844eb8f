// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-socket connection state
//!
//! A [`Connection`] owns one accepted stream together with its parse and
//! send buffers and its keep-alive policy. The state field doubles as the
//! ownership marker: the reactor drives a connection in `ReadingRequest` and
//! `WritingResponse`, exactly one worker drives it in `Processing`, and
//! nobody touches it once it reaches `Closing`.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::http::request::{header_end, Request};
use crate::http::{ParseError, Version};

const READ_CHUNK: usize = 4096;
const DEFAULT_MAX_REQUESTS: u32 = 10;

/// Lifecycle of a connection. Transitions only ever move along the arrows
/// documented on each variant; `Closing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating bytes until the header terminator arrives. Initial state.
    ReadingRequest,
    /// A worker owns the connection and is building the response.
    Processing,
    /// The reactor is flushing the response buffer.
    WritingResponse,
    /// Response flushed on a reusable connection; about to recycle.
    KeepAliveWaiting,
    /// No further I/O will be attempted; removal is imminent.
    Closing,
}

/// Outcome of draining the socket's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The header terminator is present; stop reading and dispatch.
    HeadersReady,
    /// The kernel has no more bytes for now.
    WouldBlock,
    /// The peer closed its half of the connection.
    PeerClosed,
}

/// State for one accepted TCP peer.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    token: Token,
    state: ConnectionState,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    offset: usize,
    request: Request,
    keep_alive: bool,
    keep_alive_timeout: Option<Duration>,
    max_requests: u32,
    handled_requests: u32,
    last_activity: Instant,
}

impl Connection {
    /// Wraps a freshly accepted stream. Keep-alive starts enabled with no
    /// idle deadline; a `Keep-Alive` header may tighten both later.
    pub fn new(stream: TcpStream) -> Self {
        let token = Token(stream.as_raw_fd() as usize);
        Self {
            stream,
            token,
            state: ConnectionState::ReadingRequest,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            offset: 0,
            request: Request::default(),
            keep_alive: true,
            keep_alive_timeout: None,
            max_requests: DEFAULT_MAX_REQUESTS,
            handled_requests: 0,
            last_activity: Instant::now(),
        }
    }

    /// Token identifying this connection with the demultiplexer; derived
    /// from the socket handle.
    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection may be reused for another request.
    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The request parsed from the current exchange.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Appends received bytes to the parse buffer.
    pub fn add_to_read(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
        self.last_activity = Instant::now();
    }

    /// Drains the socket until it would block, the peer hangs up, or the
    /// header terminator shows up. Reading stops at the terminator so the
    /// connection can be handed to a worker without a second reader racing
    /// it.
    pub fn fill(&mut self) -> io::Result<FillOutcome> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(FillOutcome::PeerClosed),
                Ok(n) => {
                    self.add_to_read(&buf[..n]);
                    if self.headers_received() {
                        return Ok(FillOutcome::HeadersReady);
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(FillOutcome::WouldBlock)
                }
                Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Issues one non-blocking write of the unsent response remainder.
    /// Advances the send offset on progress.
    pub fn send_data(&mut self) -> io::Result<usize> {
        let remaining = &self.write_buffer[self.offset..];
        if remaining.is_empty() {
            return Ok(0);
        }

        let sent = self.stream.write(remaining)?;
        if sent > 0 {
            self.offset += sent;
            self.last_activity = Instant::now();
        }
        Ok(sent)
    }

    /// Whether the parse buffer holds a complete header section.
    #[inline]
    pub fn headers_received(&self) -> bool {
        header_end(&self.read_buffer).is_some()
    }

    /// Whether every response byte has been handed to the kernel.
    #[inline]
    pub fn response_complete(&self) -> bool {
        self.offset >= self.write_buffer.len()
    }

    /// Parses the buffered header section into [`Request`] fields and
    /// applies the connection policy headers. Methods outside the pipeline
    /// fail after policy has been applied, so a bad request on a reusable
    /// connection still honors its `Connection` header.
    pub fn parse_headers(&mut self) -> Result<(), ParseError> {
        self.request = Request::parse(&self.read_buffer)?;
        self.parse_connection_params();

        if !self.request.method.is_supported() {
            return Err(ParseError::Method);
        }
        Ok(())
    }

    /// Applies `Connection` and `Keep-Alive` headers to the reuse policy.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the `Connection` value
    /// contains `close`; HTTP/1.0 defaults to close unless it contains
    /// `keep-alive`. `Keep-Alive: timeout=<n>, max=<n>` tightens the idle
    /// deadline and request budget, clamped to at least 1; malformed
    /// numbers leave the defaults in place.
    fn parse_connection_params(&mut self) {
        let connection = self
            .request
            .headers
            .get("connection")
            .map(|value| value.to_ascii_lowercase());

        self.keep_alive = match self.request.version {
            Version::H1_1 => !connection.is_some_and(|value| value.contains("close")),
            Version::H1_0 => connection.is_some_and(|value| value.contains("keep-alive")),
        };

        if let Some(value) = self.request.headers.get("keep-alive") {
            if let Some(timeout) = param(value, "timeout=").and_then(|v| v.parse::<u64>().ok()) {
                self.keep_alive_timeout = Some(Duration::from_secs(timeout.max(1)));
            }
            if let Some(max) = param(value, "max=").and_then(|v| v.parse::<u32>().ok()) {
                self.max_requests = max.max(1);
            }
        }
    }

    /// Installs the response bytes and moves to `WritingResponse` with the
    /// send offset rewound. Called by the worker that owns the connection.
    pub fn set_response(&mut self, response: Vec<u8>) {
        self.write_buffer = response;
        self.offset = 0;
        self.state = ConnectionState::WritingResponse;
        self.last_activity = Instant::now();
    }

    /// `ReadingRequest` → `Processing`: the reactor relinquishes the
    /// connection to a worker.
    pub fn begin_processing(&mut self) {
        self.state = ConnectionState::Processing;
        self.last_activity = Instant::now();
    }

    /// `WritingResponse` → `KeepAliveWaiting`: the whole response was
    /// flushed on a connection that stays open.
    pub fn enter_keep_alive_wait(&mut self) {
        self.state = ConnectionState::KeepAliveWaiting;
        self.last_activity = Instant::now();
    }

    /// `KeepAliveWaiting` → `ReadingRequest`: recycles the connection for
    /// its next request. Request-scoped state is cleared and the handled
    /// counter bumped; hitting the request budget clears `keep_alive` and
    /// moves to `Closing` instead.
    pub fn handle_keep_alive(&mut self) {
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.offset = 0;
        self.request = Request::default();

        self.handled_requests += 1;
        if self.handled_requests >= self.max_requests {
            self.keep_alive = false;
            self.state = ConnectionState::Closing;
            return;
        }

        self.state = ConnectionState::ReadingRequest;
        self.last_activity = Instant::now();
    }

    /// Marks the connection terminal. No I/O happens past this point.
    pub fn begin_closing(&mut self) {
        self.state = ConnectionState::Closing;
    }

    fn is_timed_out(&self) -> bool {
        match self.keep_alive_timeout {
            Some(timeout) => self.last_activity.elapsed() > timeout,
            None => false,
        }
    }

    /// Whether the sweep should collect this connection: reuse disabled,
    /// request budget spent, idle past the deadline, or already closing.
    pub fn should_close(&self) -> bool {
        !self.keep_alive
            || self.handled_requests >= self.max_requests
            || self.is_timed_out()
            || self.state == ConnectionState::Closing
    }

    /// Registers the stream with the demultiplexer under this connection's
    /// token.
    #[inline]
    pub fn register(&mut self, registry: &Registry, interests: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, interests)
    }

    /// Swaps the interest set the demultiplexer watches for this stream.
    #[inline]
    pub fn reregister(&mut self, registry: &Registry, interests: Interest) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, interests)
    }

    /// Removes the stream from the demultiplexer.
    #[inline]
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

/// Extracts the value following `key` inside a `Keep-Alive` header, cut at
/// the first comma or space.
fn param<'a>(value: &'a str, key: &str) -> Option<&'a str> {
    let start = value.find(key)? + key.len();
    let rest = &value[start..];
    let end = rest.find(|c| c == ',' || c == ' ').unwrap_or(rest.len());
    Some(&rest[..end])
}
