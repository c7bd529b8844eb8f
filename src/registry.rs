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

//! Thread-safe connection registry
//!
//! Maps a connection's token (derived from its socket handle) to the shared
//! handle for that connection. The reactor thread inserts, removes, and
//! iterates; workers only look up the connection they were handed. Readers
//! share the lock, writers are exclusive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use mio::Token;

use crate::connection::Connection;

/// Shared handle to one connection. The mutex serializes the reactor and
/// the worker that currently owns the connection.
pub type ConnectionHandle = Arc<Mutex<Connection>>;

/// Concurrent token-to-connection map.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<Token, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the connection registered under `token`.
    pub fn get(&self, token: Token) -> Option<ConnectionHandle> {
        self.read().get(&token).cloned()
    }

    /// Registers `conn` under `token`, replacing any prior entry for a
    /// token the OS has reused.
    pub fn insert(&self, token: Token, conn: ConnectionHandle) {
        self.write().insert(token, conn);
    }

    /// Removes the entry for `token`, handing the connection back to the
    /// caller so it can deregister the stream before the handle drops.
    pub fn remove(&self, token: Token) -> Option<ConnectionHandle> {
        self.write().remove(&token)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every entry. Connections close their sockets when the last
    /// handle to them goes away.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Visits every `(token, connection)` pair under the shared lock.
    ///
    /// `visit` must not call back into the registry; removal during
    /// iteration would need a lock upgrade. Callers collect victims and
    /// remove them afterwards.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(Token, &ConnectionHandle),
    {
        for (token, conn) in self.read().iter() {
            visit(*token, conn);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Token, ConnectionHandle>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Token, ConnectionHandle>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
