//! Thread-per-connection execution pool.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use std_semaphore::Semaphore;

use crate::error::{Error, Result};
use crate::event::QueryError;
use crate::opts::Opts;
use crate::query::Query;
use crate::state::slot::SlotState;
use crate::stream::{Emitter, Interrupter, ResultStream, channel};

use super::conn::{Connect, Connection};
use super::worker::Worker;

/// An admitted query waiting for, or held by, a worker.
pub(crate) struct Job {
    pub(crate) query: Query,
    pub(crate) emitter: Emitter,
    pub(crate) admitted_at: Instant,
}

/// State shared between the pool handle and its workers.
pub(crate) struct Shared {
    pub(crate) opts: Opts,
    pub(crate) queue: ArrayQueue<Job>,
    /// One permit per queued job, plus one per worker at shutdown.
    pub(crate) available: Semaphore,
    /// Admitted queries that have not finished, running or queued.
    pub(crate) in_flight: AtomicUsize,
    pub(crate) running: AtomicUsize,
    pub(crate) replacements: AtomicU64,
    pub(crate) closed: AtomicBool,
    /// Held shared while admitting and exclusively while closing, so no job
    /// is pushed after shutdown has released the workers.
    gate: RwLock<()>,
    slots: Box<[AtomicU8]>,
    /// Stream of the query each slot is running.
    current: Box<[Mutex<Option<Interrupter>>]>,
}

impl Shared {
    pub(crate) fn new(opts: Opts) -> Self {
        Self {
            queue: ArrayQueue::new(opts.capacity()),
            available: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            replacements: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
            slots: (0..opts.max_pool_size)
                .map(|_| AtomicU8::new(SlotState::Idle as u8))
                .collect(),
            current: (0..opts.max_pool_size).map(|_| Mutex::new(None)).collect(),
            opts,
        }
    }

    pub(crate) fn publish(&self, slot: usize, state: SlotState) {
        if let Some(s) = self.slots.get(slot) {
            s.store(state as u8, Ordering::Release);
        }
    }

    /// Record the stream `slot` is feeding, or clear it with `None`.
    ///
    /// A stream attached after shutdown began is interrupted immediately.
    pub(crate) fn attach(&self, slot: usize, stream: Option<Interrupter>) {
        let Some(current) = self.current.get(slot) else {
            return;
        };
        let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = stream;
        if self.closed.load(Ordering::Acquire) {
            if let Some(stream) = current.as_ref() {
                stream.interrupt();
            }
        }
    }

    fn interrupt_all(&self) {
        for current in self.current.iter() {
            let current = current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(stream) = current.as_ref() {
                stream.interrupt();
            }
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of connection slots; constant for the pool's lifetime.
    pub slots: usize,
    pub idle: usize,
    pub running: usize,
    pub faulted: usize,
    /// Admitted queries not yet picked up by a worker.
    pub queued: usize,
    /// Connections opened to replace faulted ones.
    pub replacements: u64,
}

/// A fixed set of worker threads, each owning one connection.
///
/// [`submit`](Pool::submit) never blocks: a query either starts on an idle
/// slot, waits in the bounded FIFO queue, or is rejected with
/// [`Error::CapacityExceeded`].
pub struct Pool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Open `opts.max_pool_size` connections and start one worker per connection.
    pub fn new<C: Connect>(opts: Opts, connector: C) -> Result<Self> {
        opts.validate()?;
        if !opts.queue_fairness {
            tracing::debug!("queue_fairness=false requested; admission queue is FIFO regardless");
        }

        let mut conns = Vec::with_capacity(opts.max_pool_size);
        for _ in 0..opts.max_pool_size {
            match connector.connect(&opts) {
                Ok(conn) => conns.push(conn),
                Err(err) => {
                    for mut conn in conns {
                        let _ = conn.close();
                    }
                    return Err(err);
                }
            }
        }

        let shared = Arc::new(Shared::new(opts));
        let pool = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(conns.len())),
        };
        let connector = Arc::new(connector);
        let mut conns = conns.into_iter().enumerate();
        for (id, conn) in conns.by_ref() {
            let worker = Worker::new(id, Arc::clone(&shared), Arc::clone(&connector), conn);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", shared.opts.pool_name, id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => pool.lock_workers().push(handle),
                Err(err) => {
                    // The unstarted worker closed its connection on drop; close
                    // the rest, then let `pool` drop to stop the started ones.
                    for (_, mut conn) in conns {
                        let _ = conn.close();
                    }
                    return Err(err.into());
                }
            }
        }

        tracing::debug!(
            slots = shared.opts.max_pool_size,
            queue_depth = shared.opts.queue_depth,
            "prestarted connection pool"
        );
        Ok(pool)
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `query` for execution and return its result stream.
    ///
    /// Fails with [`Error::InvalidUsage`] if a statement is blank.
    pub fn submit(&self, query: impl Into<Query>) -> Result<ResultStream> {
        let query = query.into();
        query.validate()?;

        let shared = &self.shared;
        let _admitting = shared.gate.read().unwrap_or_else(PoisonError::into_inner);
        if shared.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let capacity = shared.opts.capacity();
        let mut current = shared.in_flight.load(Ordering::Acquire);
        loop {
            if current >= capacity {
                let err = Error::CapacityExceeded {
                    running: shared.running.load(Ordering::Acquire),
                    queued: shared.queue.len(),
                };
                tracing::error!(closed = shared.closed.load(Ordering::Acquire), "execution rejected: {}", err);
                return Err(err);
            }
            match shared.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let (emitter, stream) = channel();
        let job = Job {
            query,
            emitter,
            admitted_at: Instant::now(),
        };
        if let Err(job) = shared.queue.push(job) {
            // Unreachable while in_flight bounds the queue; release the slot anyway.
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            drop(job);
            return Err(Error::CapacityExceeded {
                running: shared.running.load(Ordering::Acquire),
                queued: shared.queue.len(),
            });
        }
        shared.available.release();
        Ok(stream)
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let mut status = PoolStatus {
            slots: self.shared.slots.len(),
            idle: 0,
            running: self.shared.running.load(Ordering::Acquire),
            faulted: 0,
            queued: self.shared.queue.len(),
            replacements: self.shared.replacements.load(Ordering::Acquire),
        };
        for slot in self.shared.slots.iter() {
            match SlotState::from_u8(slot.load(Ordering::Acquire)) {
                Some(SlotState::Idle) => status.idle += 1,
                Some(SlotState::Faulted) => status.faulted += 1,
                Some(SlotState::Running) | None => {}
            }
        }
        status
    }

    /// Options the pool was built with.
    pub fn opts(&self) -> &Opts {
        &self.shared.opts
    }

    /// Returns true once [`shutdown`](Pool::shutdown) has begun.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop admitting queries, finish the admitted ones, and join all workers.
    ///
    /// Queries keep running while their consumers have outstanding demand.
    /// A query whose stream is not being read when it next emits ends with
    /// an `Error` caused by [`Error::PoolClosed`], so an unread stream never
    /// blocks shutdown.
    pub fn shutdown(&self) {
        {
            let _closing = self
                .shared
                .gate
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.shared.interrupt_all();

        let handles: Vec<_> = self.lock_workers().drain(..).collect();
        for _ in 0..handles.len() {
            self.shared.available.release();
        }
        for handle in handles {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                tracing::error!(worker = name.as_deref(), "worker thread panicked");
            }
        }

        // Left behind only if a worker thread died.
        while let Some(job) = self.shared.queue.pop() {
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            job.emitter
                .fail(QueryError::from_error(job.query.statement(0), 0, Error::PoolClosed));
        }
        tracing::debug!("connection pool shut down");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
