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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! reaktor is a non-blocking HTTP/1.x origin server for a single machine.
//!
//! A single reactor thread owns the event demultiplexer. It accepts TCP
//! connections, reads request bytes, and hands each complete header section
//! off to a worker thread pool. Workers parse the request, build the
//! response, and wake the reactor over a notification channel so it can
//! write the response back under its own control. Persistent connections are
//! supported with per-connection request and idle limits, enforced by a
//! periodic sweep.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod notifier;
pub mod pool;
pub mod reactor;
pub mod registry;
