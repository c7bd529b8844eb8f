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

//! The reactor event loop
//!
//! A single thread owns the demultiplexer and every interest-mask change.
//! It accepts connections, reads request bytes, and flushes responses; the
//! only work it delegates is response generation, which runs on the worker
//! pool. A worker hands a finished response back by publishing a wakeup
//! record, which the poll receives alongside socket readiness.
//!
//! Ownership of a connection follows its state: the reactor drives
//! `ReadingRequest` and `WritingResponse`, and enqueueing the task hands
//! `Processing` to exactly one worker. Read interest stays armed while a
//! worker owns the connection so peer hangups are still surfaced, but the
//! state guard keeps the reactor away from the buffers until the wakeup
//! arrives.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, error, info, warn};
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState, FillOutcome};
use crate::error::ServerError;
use crate::http::response::{Response, Status};
use crate::notifier::{self, Notifier, NotificationReceiver};
use crate::pool::ThreadPool;
use crate::registry::{ConnectionHandle, ConnectionRegistry};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Lets another thread ask the reactor to stop. The flag is checked at the
/// top of every loop iteration; the wake bounds the wait.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    notifier: Notifier,
}

impl ShutdownHandle {
    /// Requests a stop. The reactor finishes its current iteration, closes
    /// every connection, and joins the workers.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.wake();
    }
}

/// The origin server: listening socket, demultiplexer, connection registry,
/// worker pool, and wakeup channel, driven by [`run`](Server::run).
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    poll: Poll,
    connections: ConnectionRegistry,
    pool: ThreadPool,
    notifier: Notifier,
    notifications: NotificationReceiver,
    running: Arc<AtomicBool>,
    last_sweep: Instant,
    config: Config,
}

impl Server {
    /// Binds the listening socket and brings up the demultiplexer, wakeup
    /// channel, and worker pool. Any failure here aborts startup.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let mut listener = TcpListener::bind(addr)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;
        let (notifier, notifications) = notifier::channel(poll.registry(), WAKE_TOKEN)?;
        let pool = ThreadPool::new(config.workers)?;

        info!(
            "listening on {} with {} workers",
            listener.local_addr()?,
            pool.size()
        );

        Ok(Self {
            listener,
            poll,
            connections: ConnectionRegistry::new(),
            pool,
            notifier,
            notifications,
            running: Arc::new(AtomicBool::new(true)),
            last_sweep: Instant::now(),
            config,
        })
    }

    /// Address the listener is bound to; useful when port 0 asked the OS to
    /// pick one.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can stop the loop from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
            notifier: self.notifier.clone(),
        }
    }

    /// Runs the event loop until shutdown is requested, then releases every
    /// connection and joins the workers.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(self.config.max_events);
        self.last_sweep = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            if self.last_sweep.elapsed() >= self.config.sweep_interval {
                self.sweep();
                self.last_sweep = Instant::now();
            }

            if let Err(err) = self.poll.poll(&mut events, Some(self.config.poll_timeout)) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("failed to poll for events: {err}");
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    WAKE_TOKEN => self.drain_notifications(),
                    token => self.connection_event(token, event),
                }
            }
        }

        self.shutdown();
    }

    /// Accepts until the listener would block. Each accepted stream is
    /// registered for reads under its own token, or closed on the spot when
    /// the connection cap is reached.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!("connection limit reached; rejecting {addr}");
                        continue;
                    }

                    let mut conn = Connection::new(stream);
                    let token = conn.token();
                    if let Err(err) = conn.register(self.poll.registry(), Interest::READABLE) {
                        error!("failed to register fd {}: {err}", token.0);
                        continue;
                    }

                    debug!("accepted {addr} on fd {}", token.0);
                    self.connections.insert(token, Arc::new(Mutex::new(conn)));
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    error!("accept failed: {err}");
                    return;
                }
            }
        }
    }

    /// Applies wakeup records until the channel is empty. Each record arms
    /// write interest for its connection, provided the connection still
    /// exists and is still writing; anything else is a stale duplicate and
    /// is dropped.
    fn drain_notifications(&mut self) {
        while let Some(notification) = self.notifications.read_notification() {
            let Some(conn) = self.connections.get(notification.token) else {
                continue;
            };

            let mut locked = lock(&conn);
            if locked.state() != ConnectionState::WritingResponse {
                continue;
            }
            if let Err(err) = locked.reregister(self.poll.registry(), notification.interest) {
                error!("failed to arm write for fd {}: {err}", notification.token.0);
                drop(locked);
                self.delete_connection(notification.token);
            }
        }
    }

    fn connection_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get(token) else {
            return;
        };

        if event.is_error() || event.is_read_closed() {
            self.delete_connection(token);
            return;
        }

        if event.is_readable() {
            self.handle_read(token, &conn);
        }
        if event.is_writable() {
            self.handle_write(token, &conn);
        }
    }

    /// Drains readable bytes for a connection in `ReadingRequest`. Once the
    /// header terminator arrives the connection flips to `Processing` and a
    /// task is enqueued; reading stops there so the worker is the only
    /// owner.
    fn handle_read(&mut self, token: Token, conn: &ConnectionHandle) {
        let mut locked = lock(conn);
        if locked.state() != ConnectionState::ReadingRequest {
            return;
        }

        match locked.fill() {
            Ok(FillOutcome::WouldBlock) => {}
            Ok(FillOutcome::PeerClosed) => {
                drop(locked);
                self.delete_connection(token);
            }
            Ok(FillOutcome::HeadersReady) => {
                locked.begin_processing();
                drop(locked);
                self.dispatch(token, conn);
            }
            Err(err) => {
                debug!("recv failed on fd {}: {err}", token.0);
                drop(locked);
                self.delete_connection(token);
            }
        }
    }

    fn dispatch(&mut self, token: Token, conn: &ConnectionHandle) {
        let task_conn = Arc::clone(conn);
        let notifier = self.notifier.clone();

        let enqueued = self
            .pool
            .enqueue(move || process_request(token, &task_conn, &notifier));
        if enqueued.is_err() {
            warn!("thread pool stopped; closing fd {}", token.0);
            self.delete_connection(token);
        }
    }

    /// Flushes the response for a connection in `WritingResponse`. On
    /// completion the connection either recycles for its next request or
    /// closes, per its keep-alive policy.
    fn handle_write(&mut self, token: Token, conn: &ConnectionHandle) {
        let mut locked = lock(conn);
        if locked.state() != ConnectionState::WritingResponse {
            return;
        }

        loop {
            match locked.send_data() {
                Ok(0) if !locked.response_complete() => return,
                Ok(_) => {
                    if !locked.response_complete() {
                        continue;
                    }

                    if locked.keep_alive() && !locked.should_close() {
                        locked.enter_keep_alive_wait();
                        locked.handle_keep_alive();

                        if locked.should_close() {
                            // request budget spent during the recycle
                            drop(locked);
                            self.delete_connection(token);
                        } else if let Err(err) =
                            locked.reregister(self.poll.registry(), Interest::READABLE)
                        {
                            error!("failed to rearm read for fd {}: {err}", token.0);
                            drop(locked);
                            self.delete_connection(token);
                        }
                    } else {
                        drop(locked);
                        self.delete_connection(token);
                    }
                    return;
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!("send failed on fd {}: {err}", token.0);
                    drop(locked);
                    self.delete_connection(token);
                    return;
                }
            }
        }
    }

    /// Collects every connection whose policy says to close, then removes
    /// them. Victims are gathered under the shared lock and erased after
    /// iteration; a connection whose mutex is held by a worker is busy, not
    /// idle, and is skipped.
    fn sweep(&mut self) {
        let mut victims = Vec::new();
        self.connections.for_each(|token, conn| {
            if let Ok(conn) = conn.try_lock() {
                if conn.should_close() {
                    victims.push(token);
                }
            }
        });

        for token in victims {
            debug!("sweep closing fd {}", token.0);
            self.delete_connection(token);
        }
    }

    /// Removes a connection from the registry and the demultiplexer. The
    /// socket closes when the last handle drops, which may be at the end of
    /// an in-flight task; the wakeup that task publishes later finds no
    /// registry entry and is dropped.
    fn delete_connection(&mut self, token: Token) {
        let Some(conn) = self.connections.remove(token) else {
            return;
        };

        let mut locked = lock(&conn);
        locked.begin_closing();
        if let Err(err) = locked.deregister(self.poll.registry()) {
            debug!("failed to deregister fd {}: {err}", token.0);
        }
    }

    /// Releases every connection, then stops the pool. In-flight tasks
    /// finish against their own connection handle before the join returns.
    fn shutdown(&mut self) {
        info!("shutting down");
        self.connections.clear();
        self.pool.stop();
    }
}

/// The request pipeline, run on a worker thread. Parses the buffered
/// headers, installs a response, and wakes the reactor to write it.
fn process_request(token: Token, conn: &ConnectionHandle, notifier: &Notifier) {
    let started = Instant::now();
    let mut locked = lock(conn);

    let response = match locked.parse_headers() {
        Ok(()) => Response::new(
            Status::Ok,
            format!("Processed in thread pool. Path: {}", locked.request().path),
        ),
        Err(err) => {
            debug!("rejecting request on fd {}: {err}", token.0);
            Response::new(Status::BadRequest, "Bad Request")
        }
    };
    locked.set_response(response.serialize());
    drop(locked);

    notifier.notify(token, Interest::WRITABLE);
    debug!(
        "processed request on fd {} in {} us",
        token.0,
        started.elapsed().as_micros()
    );
}

fn lock(conn: &ConnectionHandle) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}
