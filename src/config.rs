//! Server configuration

use std::thread::available_parallelism;
use std::time::Duration;

/// Tunable knobs for the server.
///
/// `Default` yields the production values; tests shrink the limits to make
/// boundary behavior observable.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to listen on. Port 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Number of worker threads draining the task queue.
    pub workers: usize,
    /// Accepted connections beyond this count are closed immediately.
    pub max_connections: usize,
    /// Capacity of the event buffer handed to the demultiplexer.
    pub max_events: usize,
    /// How often idle and over-limit connections are collected.
    pub sweep_interval: Duration,
    /// Upper bound on a single demultiplexer wait; bounds sweep latency.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            workers: available_parallelism().map(usize::from).unwrap_or(1),
            max_connections: 100,
            max_events: 1024,
            sweep_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(10),
        }
    }
}
