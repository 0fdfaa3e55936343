//! Fixed-size worker thread pool.
//!
//! All workers share one FIFO queue guarded by a mutex and a condition
//! variable. Tasks run with the queue unlocked. Shutdown lets queued tasks
//! drain before the threads exit; nothing is cancelled.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::SubmitError;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `threads` workers with an unbounded queue.
    pub fn new(threads: usize) -> io::Result<Self> {
        Self::with_queue_capacity(threads, usize::MAX)
    }

    /// Starts `threads` workers. [`add_task`](Self::add_task) fails once
    /// `capacity` tasks are waiting.
    pub fn with_queue_capacity(threads: usize, capacity: usize) -> io::Result<Self> {
        assert!(threads > 0, "worker pool needs at least one thread");
        assert!(capacity > 0, "worker queue capacity must be positive");

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity,
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };
        for id in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("webserv-worker-{id}"))
                .spawn(move || worker_loop(id, shared))?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    /// Queues a task and wakes one idle worker.
    pub fn add_task<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(SubmitError::Closed);
            }
            if state.tasks.len() >= self.shared.capacity {
                return Err(SubmitError::QueueFull(state.tasks.len()));
            }
            state.tasks.push_back(Box::new(task));
        }
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting tasks, lets the queue drain and joins every worker.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.closed && self.workers.is_empty() {
                return;
            }
            state.closed = true;
        }
        self.shared.cond.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    debug!(worker = id, "worker started");
    let mut state = shared.lock();
    loop {
        if let Some(task) = state.tasks.pop_front() {
            drop(state);
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(worker = id, "task panicked");
            }
            state = shared.lock();
        } else if state.closed {
            break;
        } else {
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
    debug!(worker = id, "worker stopped");
}
