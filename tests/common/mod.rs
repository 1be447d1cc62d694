//! Scripted fake driver shared by the integration tests.
//!
//! Each statement's text selects what the fake connection does:
//!
//! - `ROWS n`: one result set of `n` integer rows
//! - `DRAIN n`: like `ROWS n`, but a refused delivery still finishes execution
//! - `FAIL`: server error, later statements are skipped
//! - `CURSOR`: a cursor-backed result set
//! - `WAIT`: block until [`Script::release`] is called
//! - `PANIC`: panic inside the driver
//! - `BREAK`: return a broken-connection error without finishing
//! - anything else: a command status tagged with the first word

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use zero_pgpool::sync::{Connection, Pool};
use zero_pgpool::{Error, ErrorFields, Field, Opts, Query, ResultHandler, Row};

#[derive(Default)]
pub struct Script {
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
    pub closes: AtomicUsize,
    /// Statements currently blocked in `WAIT`.
    pub waiting: AtomicUsize,
    pub fail_pings: AtomicBool,
    /// Name of the thread that ran each statement.
    pub threads: Mutex<Vec<String>>,
    released: Mutex<bool>,
    gate: Condvar,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.gate.notify_all();
    }

    fn wait_for_release(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.gate.wait(released).unwrap();
        }
        drop(released);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeConn {
    script: Arc<Script>,
}

fn int_rows(n: usize) -> Vec<Row> {
    (0..n).map(|i| Row::from_text([Some(i.to_string())])).collect()
}

/// What to do after one statement.
enum Flow {
    Next,
    Stop,
    /// A hook refused an event; finish at this safe point with the refusal.
    Finish(Error),
}

impl FakeConn {
    pub fn new(script: &Arc<Script>) -> Self {
        Self {
            script: Arc::clone(script),
        }
    }

    fn run(&mut self, sql: &str, handler: &mut dyn ResultHandler) -> zero_pgpool::Result<Flow> {
        let mut words = sql.split_whitespace();
        let verb = words.next().unwrap_or_default();
        match verb {
            "ROWS" => {
                let n = words.next().and_then(|n| n.parse().ok()).unwrap_or(0);
                handler.rows(&[Field::new("n", 23)], int_rows(n), false)?;
            }
            "DRAIN" => {
                let n = words.next().and_then(|n| n.parse().ok()).unwrap_or(0);
                if let Err(err) = handler.rows(&[Field::new("n", 23)], int_rows(n), false) {
                    return Ok(Flow::Finish(err));
                }
            }
            "CURSOR" => handler.rows(&[Field::new("n", 23)], int_rows(3), true)?,
            "FAIL" => {
                handler.error(Error::Server(ErrorFields {
                    severity: Some("ERROR".into()),
                    code: Some("42601".into()),
                    message: Some(format!("syntax error at or near \"{}\"", verb)),
                    ..Default::default()
                }));
                return Ok(Flow::Stop);
            }
            "WAIT" => {
                self.script.wait_for_release();
                handler.command_complete("WAIT", 0, None)?;
            }
            "PANIC" => panic!("driver bug"),
            "BREAK" => return Err(Error::ConnectionBroken("unexpected EOF".into())),
            tag => handler.command_complete(tag, 1, None)?,
        }
        Ok(Flow::Next)
    }
}

impl Connection for FakeConn {
    fn execute(&mut self, query: &Query, handler: &mut dyn ResultHandler) -> zero_pgpool::Result<()> {
        let name = thread::current().name().unwrap_or_default().to_string();
        let mut last_error = None;
        for statement in query.statements() {
            self.script.threads.lock().unwrap().push(name.clone());
            // A refused hook leaves the statement half-delivered: bail out unfinished.
            match self.run(&statement.sql, handler)? {
                Flow::Next => {}
                Flow::Stop => break,
                Flow::Finish(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }
        handler.execution_finished(last_error);
        Ok(())
    }

    fn ping(&mut self) -> zero_pgpool::Result<()> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_pings.load(Ordering::SeqCst) {
            return Err(Error::ConnectionBroken("server closed the connection".into()));
        }
        Ok(())
    }

    fn close(&mut self) -> zero_pgpool::Result<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn opts(max_pool_size: usize, queue_depth: usize) -> Opts {
    Opts {
        pool_name: "test".into(),
        max_pool_size,
        queue_depth,
        ..Opts::default()
    }
}

pub fn pool(opts: Opts, script: &Arc<Script>) -> Pool {
    let script = Arc::clone(script);
    Pool::new(opts, move |_: &Opts| -> zero_pgpool::Result<FakeConn> {
        script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConn::new(&script))
    })
    .unwrap()
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}
