//! # memkv-pool — elastic worker pool
//!
//! A thread pool bounded by `[low_watermark, high_watermark]`, with a
//! bounded task queue and idle-time-triggered retirement of threads above
//! the low watermark. Used by the multi-threaded front end to service
//! connection events off the reactor thread.
//!
//! Two correctness properties worth calling out:
//! - retirement never erases a thread from a live vector while that vector
//!   is iterated for `join` elsewhere — each worker owns a slot in a
//!   `HashMap<WorkerId, JoinHandle<_>>` and removes its own entry, under the
//!   pool lock, right before it exits;
//! - `state` is never read without the pool mutex — it lives inside the same
//!   `Mutex` that guards the queue and counters, so every read is
//!   synchronized by construction.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;
type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Stopping,
    Stopped,
}

/// Construction parameters for an [`ElasticPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub max_queue_size: usize,
    pub idle_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// `low_watermark` must be greater than zero.
    ZeroLowWatermark,
    /// `low_watermark` must not exceed `high_watermark`.
    LowExceedsHigh,
    /// `max_queue_size` must be at least one.
    ZeroQueueCapacity,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::ZeroLowWatermark => write!(f, "low_watermark must be > 0"),
            PoolError::LowExceedsHigh => write!(f, "low_watermark must be <= high_watermark"),
            PoolError::ZeroQueueCapacity => write!(f, "max_queue_size must be >= 1"),
        }
    }
}

impl std::error::Error for PoolError {}

struct Shared {
    tasks: VecDeque<Task>,
    state: State,
    threads_total: usize,
    busy_threads: usize,
    next_worker_id: WorkerId,
    handles: HashMap<WorkerId, JoinHandle<()>>,
}

struct Inner {
    low: usize,
    high: usize,
    max_queue_size: usize,
    idle_time: Duration,
    shared: Mutex<Shared>,
    not_empty: Condvar,
    quiescent: Condvar,
}

/// An elastic thread pool. Cheaply cloneable (it's a handle around an
/// `Arc`); every clone refers to the same pool.
#[derive(Clone)]
pub struct ElasticPool {
    inner: Arc<Inner>,
}

impl ElasticPool {
    /// Build a pool and lazily-started `low_watermark` permanent workers.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.low_watermark == 0 {
            return Err(PoolError::ZeroLowWatermark);
        }
        if config.low_watermark > config.high_watermark {
            return Err(PoolError::LowExceedsHigh);
        }
        if config.max_queue_size == 0 {
            return Err(PoolError::ZeroQueueCapacity);
        }

        let inner = Arc::new(Inner {
            low: config.low_watermark,
            high: config.high_watermark,
            max_queue_size: config.max_queue_size,
            idle_time: config.idle_time,
            shared: Mutex::new(Shared {
                tasks: VecDeque::new(),
                state: State::Running,
                threads_total: 0,
                busy_threads: 0,
                next_worker_id: 0,
                handles: HashMap::new(),
            }),
            not_empty: Condvar::new(),
            quiescent: Condvar::new(),
        });

        let pool = ElasticPool { inner };
        for _ in 0..config.low_watermark {
            pool.spawn_worker();
        }
        Ok(pool)
    }

    /// Enqueue `task`. Does not block. Rejects, handing `task` back as `Err`,
    /// if the pool isn't `Running` or the queue is already at
    /// `max_queue_size` — mirroring `std::sync::mpsc::Sender::send`'s
    /// `SendError<T>` rather than silently dropping the caller's work.
    pub fn submit<F>(&self, task: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.inner.shared.lock().unwrap();
        if guard.state != State::Running {
            return Err(task);
        }
        if guard.tasks.len() == self.inner.max_queue_size {
            return Err(task);
        }
        guard.tasks.push_back(Box::new(task));
        let idle_threads = guard.threads_total - guard.busy_threads;
        let should_spawn = idle_threads == 0 && guard.threads_total < self.inner.high;
        drop(guard);

        self.inner.not_empty.notify_one();
        if should_spawn {
            self.spawn_worker();
        }
        Ok(())
    }

    /// Transition `Running -> Stopping` and wake every worker. Idempotent:
    /// a second call on an already-stopping/stopped pool is a no-op.
    ///
    /// If `wait` is `false`, returns immediately — queued tasks still run
    /// to completion on their workers, but the caller does not block for
    /// that. If `wait` is `true`, blocks until the queue has drained, no
    /// worker is busy, and every worker thread has actually joined (so
    /// `threads_total` has reached zero), then marks the pool `Stopped`.
    pub fn stop(&self, wait: bool) {
        {
            let mut guard = self.inner.shared.lock().unwrap();
            if guard.state != State::Running {
                return;
            }
            guard.state = State::Stopping;
        }
        self.inner.not_empty.notify_all();

        if !wait {
            return;
        }

        let mut guard = self.inner.shared.lock().unwrap();
        while !(guard.tasks.is_empty() && guard.busy_threads == 0) {
            guard = self.inner.quiescent.wait(guard).unwrap();
        }
        let handles = std::mem::take(&mut guard.handles);
        drop(guard);

        // Every worker has seen Stopping with an empty queue and is on its
        // way out; join them so threads_total reaches zero before we
        // return the call to the caller.
        for (_, handle) in handles {
            let _ = handle.join();
        }

        self.inner.shared.lock().unwrap().state = State::Stopped;
    }

    pub fn threads_total(&self) -> usize {
        self.inner.shared.lock().unwrap().threads_total
    }

    pub fn busy_threads(&self) -> usize {
        self.inner.shared.lock().unwrap().busy_threads
    }

    pub fn idle_threads(&self) -> usize {
        let g = self.inner.shared.lock().unwrap();
        g.threads_total - g.busy_threads
    }

    pub fn queue_len(&self) -> usize {
        self.inner.shared.lock().unwrap().tasks.len()
    }

    fn spawn_worker(&self) {
        let id = {
            let mut g = self.inner.shared.lock().unwrap();
            let id = g.next_worker_id;
            g.next_worker_id += 1;
            id
        };

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("memkv-worker-{id}"))
            .spawn(move || worker_loop(inner, id))
            .expect("failed to spawn worker thread");

        // Register threads_total and the handle together, under one lock:
        // the new worker's very first action is also to lock `shared`, so
        // it cannot observe itself as "not yet counted".
        let mut g = self.inner.shared.lock().unwrap();
        g.threads_total += 1;
        g.handles.insert(id, handle);
    }
}

impl fmt::Debug for ElasticPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.inner.shared.lock().unwrap();
        f.debug_struct("ElasticPool")
            .field("state", &g.state)
            .field("threads_total", &g.threads_total)
            .field("busy_threads", &g.busy_threads)
            .field("queued", &g.tasks.len())
            .finish()
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        // Last handle going away: request a stop but don't block the
        // dropping thread on worker join. A caller that needs threads
        // fully joined should call `stop(true)` explicitly beforehand.
        if Arc::strong_count(&self.inner) == 1 {
            self.stop(false);
        }
    }
}

fn worker_loop(inner: Arc<Inner>, id: WorkerId) {
    loop {
        let task = {
            let mut g = inner.shared.lock().unwrap();
            loop {
                if !g.tasks.is_empty() || g.state != State::Running {
                    break;
                }
                let (guard, timeout) =
                    inner.not_empty.wait_timeout(g, inner.idle_time).unwrap();
                g = guard;
                if timeout.timed_out() && g.tasks.is_empty() && g.state == State::Running {
                    if g.threads_total > inner.low {
                        g.threads_total -= 1;
                        g.handles.remove(&id);
                        tracing::debug!(worker = id, "retiring idle worker above low watermark");
                        return;
                    }
                    // At the low watermark: these workers are permanent
                    // while Running. Loop back and wait again.
                }
            }

            if g.state != State::Running && g.tasks.is_empty() {
                g.threads_total -= 1;
                g.handles.remove(&id);
                tracing::debug!(worker = id, "worker exiting on stop");
                return;
            }

            g.busy_threads += 1;
            g.tasks.pop_front().expect("queue non-empty by loop invariant")
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(worker = id, "task panicked; worker continues");
        }

        let mut g = inner.shared.lock().unwrap();
        g.busy_threads -= 1;
        if g.state == State::Stopping && g.tasks.is_empty() && g.busy_threads == 0 {
            inner.quiescent.notify_all();
        }
    }
}
