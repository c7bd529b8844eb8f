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

//! Worker thread pool
//!
//! A fixed set of threads drains a FIFO task queue. Workers run alongside
//! the reactor thread: the reactor enqueues one task per parsed request,
//! and whichever worker dequeues it owns that connection until the task
//! finishes. A task that panics is caught and logged so a single failing
//! request never takes a worker down.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::error;

use crate::error::ServerError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Bounded set of worker threads draining a task queue.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<JoinHandle<()>>,
    tasks: Option<Sender<Task>>,
}

impl ThreadPool {
    /// Spawns `size` workers (at least one). Fails only if the OS refuses
    /// to spawn a thread, which is fatal at startup.
    pub fn new(size: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();

        let workers = (0..size.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(rx))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            workers,
            tasks: Some(tx),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Appends a task to the queue, waking one idle worker. Tasks run in
    /// FIFO order with respect to a single enqueuer.
    pub fn enqueue<F>(&self, task: F) -> Result<(), ServerError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.tasks {
            Some(tasks) => tasks
                .send(Box::new(task))
                .map_err(|_| ServerError::PoolStopped),
            None => Err(ServerError::PoolStopped),
        }
    }

    /// Stops accepting tasks and joins every worker. Tasks already in the
    /// queue are drained before the workers exit. Idempotent.
    pub fn stop(&mut self) {
        self.tasks.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(tasks: Receiver<Task>) {
    // recv fails once every sender is gone and the queue is drained.
    while let Ok(task) = tasks.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("task panicked in worker thread");
        }
    }
}
