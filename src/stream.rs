//! Demand-counted result stream between a worker and a consumer.
//!
//! The worker side ([`Emitter`]) may only push a non-terminal event while the
//! consumer has outstanding demand; otherwise it blocks. Terminal signals
//! (completion or one `Error`) never need demand. The consumer side
//! ([`ResultStream`]) is an [`Iterator`] that requests more events whenever
//! it runs dry, or can be driven by explicit [`ResultStream::request`] calls.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::event::{QueryError, ResultEvent};

/// Events requested at a time by an iterating consumer.
pub const DEFAULT_PREFETCH: u64 = 16;

const UNBOUNDED: u64 = u64::MAX;

#[derive(Debug, Default)]
struct State {
    buffer: VecDeque<ResultEvent>,
    /// Events requested but not yet emitted.
    demand: u64,
    /// No more events will be pushed.
    closed: bool,
    cancelled: bool,
    /// Emission without demand fails instead of waiting.
    interrupted: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    /// Signalled when events arrive or the stream closes.
    ready: Condvar,
    /// Signalled when demand is added or the stream is cancelled.
    demand: Condvar,
    #[cfg(feature = "tokio")]
    notify: tokio::sync::Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_consumer(&self) {
        self.ready.notify_all();
        #[cfg(feature = "tokio")]
        self.notify.notify_one();
    }
}

/// Create a connected emitter/stream pair.
pub(crate) fn channel() -> (Emitter, ResultStream) {
    let shared = Arc::new(Shared::default());
    (
        Emitter {
            shared: Arc::clone(&shared),
        },
        ResultStream {
            shared,
            prefetch: DEFAULT_PREFETCH,
            done: false,
        },
    )
}

/// Producer half, owned by the adapter on the worker thread.
#[derive(Debug)]
pub(crate) struct Emitter {
    shared: Arc<Shared>,
}

impl Emitter {
    /// Push one non-terminal event, blocking until the consumer wants it.
    ///
    /// Fails with [`Error::PoolClosed`] instead of blocking once interrupted.
    pub(crate) fn emit(&self, event: ResultEvent) -> Result<()> {
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(Error::Cancelled);
            }
            if state.closed {
                return Err(Error::InvalidUsage("emit after terminal event".into()));
            }
            if state.demand > 0 {
                break;
            }
            if state.interrupted {
                return Err(Error::PoolClosed);
            }
            state = self
                .shared
                .demand
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.demand != UNBOUNDED {
            state.demand -= 1;
        }
        state.buffer.push_back(event);
        drop(state);
        self.shared.wake_consumer();
        Ok(())
    }

    /// End the stream normally. Returns false if it had already ended.
    pub(crate) fn complete(&self) -> bool {
        self.close(None)
    }

    /// End the stream with an error. Returns false if it had already ended.
    pub(crate) fn fail(&self, err: QueryError) -> bool {
        self.close(Some(err))
    }

    fn close(&self, err: Option<QueryError>) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        if let Some(err) = err {
            if !state.cancelled {
                state.buffer.push_back(ResultEvent::Error(err));
            }
        }
        drop(state);
        self.shared.wake_consumer();
        true
    }

    /// A handle that can stop this emitter from waiting on demand.
    pub(crate) fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns true once a terminal signal was sent.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        tracing::warn!("result stream abandoned without a terminal event");
        self.fail(QueryError::from_error(
            None,
            0,
            Error::ConnectionBroken("executor dropped the query".into()),
        ));
    }
}

/// Breaks a producer out of its wait for demand during pool shutdown.
#[derive(Debug, Clone)]
pub(crate) struct Interrupter {
    shared: Arc<Shared>,
}

impl Interrupter {
    pub(crate) fn interrupt(&self) {
        self.shared.lock().interrupted = true;
        self.shared.demand.notify_all();
    }
}

enum Step {
    Event(ResultEvent),
    End,
    Pending,
}

/// Consumer half: the ordered events of one submitted query.
///
/// Iterating yields events until completion (`None`) or until, and
/// including, a single [`ResultEvent::Error`]. Dropping the stream early
/// cancels the query.
#[derive(Debug)]
pub struct ResultStream {
    shared: Arc<Shared>,
    prefetch: u64,
    done: bool,
}

impl ResultStream {
    /// Request up to `n` events per refill while iterating.
    ///
    /// `0` disables automatic requests; the consumer must then call
    /// [`request`](Self::request) or iteration blocks forever.
    pub fn prefetch(mut self, n: u64) -> Self {
        self.prefetch = n;
        self
    }

    /// Let the producer push everything without waiting.
    pub fn unbounded(self) -> Self {
        self.request(UNBOUNDED);
        self.prefetch(0)
    }

    /// Signal demand for `n` more events.
    pub fn request(&self, n: u64) {
        let mut state = self.shared.lock();
        state.demand = state.demand.saturating_add(n);
        drop(state);
        self.shared.demand.notify_all();
    }

    /// Events emitted but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Demand signalled but not yet used by the producer.
    pub fn outstanding_demand(&self) -> u64 {
        self.shared.lock().demand
    }

    /// Returns true once the final event has been consumed.
    pub fn is_terminated(&self) -> bool {
        self.done
    }

    /// Stop the query. Buffered events are discarded.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let mut state = self.shared.lock();
        state.cancelled = true;
        state.buffer.clear();
        drop(state);
        self.shared.demand.notify_all();
    }

    /// Take an event if one is buffered, without blocking.
    pub fn try_next(&mut self) -> Option<ResultEvent> {
        match self.step() {
            Step::Event(event) => Some(event),
            Step::End | Step::Pending => None,
        }
    }

    /// Wait for the next event without blocking a runtime thread.
    #[cfg(feature = "tokio")]
    pub async fn recv(&mut self) -> Option<ResultEvent> {
        loop {
            match self.step() {
                Step::Event(event) => return Some(event),
                Step::End => return None,
                Step::Pending => self.shared.notify.notified().await,
            }
        }
    }

    fn step(&mut self) -> Step {
        if self.done {
            return Step::End;
        }
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        self.step_locked(&mut state)
    }

    fn step_locked(&mut self, state: &mut State) -> Step {
        if let Some(event) = state.buffer.pop_front() {
            if event.is_error() || (state.closed && state.buffer.is_empty()) {
                self.done = true;
            }
            return Step::Event(event);
        }
        if state.closed || state.cancelled {
            self.done = true;
            return Step::End;
        }
        if state.demand == 0 && self.prefetch > 0 {
            state.demand = self.prefetch;
            self.shared.demand.notify_all();
        }
        Step::Pending
    }
}

impl Iterator for ResultStream {
    type Item = ResultEvent;

    fn next(&mut self) -> Option<ResultEvent> {
        if self.done {
            return None;
        }
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        loop {
            match self.step_locked(&mut state) {
                Step::Event(event) => return Some(event),
                Step::End => return None,
                Step::Pending => {
                    state = shared
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
