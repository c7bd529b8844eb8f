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

//! Worker-to-reactor wakeup channel
//!
//! Workers cannot touch the demultiplexer directly; they publish a
//! [`Notification`] record and wake the reactor's poll. The records travel
//! over a lossless channel while a [`mio::Waker`] makes the poll return, so
//! wakeups and socket readiness are serialized by the same wait. Delivery
//! is at-least-once: the reactor re-queries connection state for every
//! record it drains, so duplicates are harmless.

use std::io;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{error, warn};
use mio::{Interest, Registry, Token, Waker};

/// A readiness request published by a worker and consumed by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Connection the record refers to.
    pub token: Token,
    /// Interest the reactor should arm for that connection.
    pub interest: Interest,
}

/// Producer half, cloned into every worker task.
#[derive(Debug, Clone)]
pub struct Notifier {
    records: Sender<Notification>,
    waker: Arc<Waker>,
}

impl Notifier {
    /// Publishes a record and wakes the reactor.
    ///
    /// Failures are logged and swallowed: a disconnected channel means the
    /// reactor is gone and the record is moot, and a failed wake is
    /// recovered by the poll timeout.
    pub fn notify(&self, token: Token, interest: Interest) {
        let notification = Notification { token, interest };
        if self.records.send(notification).is_err() {
            warn!("reactor gone; dropping notification for fd {}", token.0);
            return;
        }
        if let Err(err) = self.waker.wake() {
            error!("failed to wake reactor: {err}");
        }
    }

    /// Wakes the reactor without publishing a record. Used to interrupt the
    /// poll when only the running flag changed.
    pub fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            error!("failed to wake reactor: {err}");
        }
    }
}

/// Consumer half, owned by the reactor.
#[derive(Debug)]
pub struct NotificationReceiver {
    records: Receiver<Notification>,
}

impl NotificationReceiver {
    /// Takes the next pending record, or `None` once the channel is drained.
    /// The reactor loops on this until empty.
    pub fn read_notification(&self) -> Option<Notification> {
        self.records.try_recv().ok()
    }
}

/// Creates the wakeup channel, registering its waker under `token` with the
/// demultiplexer behind `registry`.
pub fn channel(
    registry: &Registry,
    token: Token,
) -> io::Result<(Notifier, NotificationReceiver)> {
    let waker = Arc::new(Waker::new(registry, token)?);
    let (tx, rx) = crossbeam_channel::unbounded();

    Ok((
        Notifier {
            records: tx,
            waker,
        },
        NotificationReceiver { records: rx },
    ))
}
