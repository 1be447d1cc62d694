//! Connection slot workers.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::event::QueryError;
use crate::state::adapter::ResultAdapter;
use crate::state::slot::{SlotEvent, SlotState};

use super::conn::{Connect, Connection};
use super::pool::{Job, Shared};

/// Decrements a pool counter when dropped, even during unwinding.
struct CountGuard<'a>(&'a AtomicUsize);

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// One slot: a dedicated thread owning one connection.
pub(crate) struct Worker<C: Connect> {
    id: usize,
    shared: Arc<Shared>,
    connector: Arc<C>,
    conn: Option<C::Conn>,
    state: SlotState,
    last_used: Instant,
}

impl<C: Connect> Worker<C> {
    pub(crate) fn new(id: usize, shared: Arc<Shared>, connector: Arc<C>, conn: C::Conn) -> Self {
        Self {
            id,
            shared,
            connector,
            conn: Some(conn),
            state: SlotState::Idle,
            last_used: Instant::now(),
        }
    }

    /// Serve jobs until the pool shuts down and the queue is drained.
    pub(crate) fn run(mut self) {
        tracing::debug!(slot = self.id, "worker started");
        loop {
            self.shared.available.acquire();
            let Some(job) = self.shared.queue.pop() else {
                if self.shared.closed.load(Ordering::Acquire) {
                    break;
                }
                continue;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(job)));
            if let Err(payload) = outcome {
                tracing::error!(
                    slot = self.id,
                    "worker failed with uncaught panic: {}",
                    panic_message(payload.as_ref())
                );
                self.fault();
            }
        }

        tracing::debug!(slot = self.id, "worker stopped");
    }

    fn execute(&mut self, job: Job) {
        let shared = Arc::clone(&self.shared);
        let _admitted = CountGuard(&shared.in_flight);
        let Job {
            query,
            emitter,
            admitted_at,
        } = job;

        if let Err(err) = self.ensure_connection() {
            tracing::warn!(slot = self.id, "no connection for query: {}", err);
            emitter.fail(QueryError::from_error(query.statement(0), 0, err));
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        shared.running.fetch_add(1, Ordering::AcqRel);
        let _running = CountGuard(&shared.running);
        self.state = transition(self.id, &self.shared, self.state, SlotEvent::Start);
        tracing::debug!(
            slot = self.id,
            waited_us = admitted_at.elapsed().as_micros() as u64,
            statements = query.len(),
            "about to execute query"
        );

        shared.attach(self.id, Some(emitter.interrupter()));
        let mut adapter = ResultAdapter::with_emitter(query.clone(), emitter);
        let result = catch_unwind(AssertUnwindSafe(|| conn.execute(&query, &mut adapter)));
        let reusable = match result {
            Ok(res) => adapter.settle(res) && !conn.is_broken(),
            Err(payload) => {
                let message = panic_message(payload.as_ref()).to_string();
                tracing::error!(slot = self.id, "driver panicked: {}", message);
                adapter.abort(Error::ConnectionBroken(format!("driver panicked: {}", message)));
                false
            }
        };
        drop(adapter);
        shared.attach(self.id, None);
        self.last_used = Instant::now();

        if reusable {
            self.state = transition(self.id, &self.shared, self.state, SlotEvent::Finish);
            tracing::debug!(slot = self.id, "completed query");
        } else {
            self.fault();
            if shared.closed.load(Ordering::Acquire) {
                return;
            }
            if let Err(err) = self.replace() {
                tracing::warn!(slot = self.id, "connection replacement failed: {}", err);
            }
        }
    }

    /// Make sure the slot holds a usable connection before starting a query.
    fn ensure_connection(&mut self) -> Result<()> {
        if self.last_used.elapsed() > self.shared.opts.idle_timeout {
            let healthy = self.conn.as_mut().is_some_and(|c| c.ping().is_ok());
            if !healthy {
                tracing::debug!(slot = self.id, "idle connection failed health check");
                self.fault();
            }
        }
        if self.state == SlotState::Faulted || self.conn.is_none() {
            self.replace()?;
        }
        Ok(())
    }

    /// Drop the current connection and mark the slot faulted.
    fn fault(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.close();
        }
        if self.state != SlotState::Faulted {
            self.state = transition(self.id, &self.shared, self.state, SlotEvent::Fault);
        }
    }

    /// Open a fresh connection for a faulted slot.
    fn replace(&mut self) -> Result<()> {
        let conn = self.connector.connect(&self.shared.opts)?;
        self.conn = Some(conn);
        self.last_used = Instant::now();
        self.shared.replacements.fetch_add(1, Ordering::AcqRel);
        if self.state == SlotState::Faulted {
            self.state = transition(self.id, &self.shared, self.state, SlotEvent::Replace);
        }
        tracing::debug!(slot = self.id, "connection replaced");
        Ok(())
    }
}

impl<C: Connect> Drop for Worker<C> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.close() {
                tracing::debug!(slot = self.id, "error closing connection: {}", err);
            }
        }
    }
}

fn transition(id: usize, shared: &Shared, from: SlotState, event: SlotEvent) -> SlotState {
    match from.on(event) {
        Ok(to) => {
            shared.publish(id, to);
            to
        }
        Err(err) => {
            tracing::error!(slot = id, "{}", err);
            from
        }
    }
}
