//! Tests for pool admission, execution and slot recovery

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use common::{FakeConn, Script, opts, pool, wait_until};
use zero_pgpool::sync::Pool;
use zero_pgpool::{Error, Opts, Query, ResultEvent, ResultStream, view};

/// Drain `stream` without blocking forever; fails the test if it never ends.
fn finish_within(mut stream: ResultStream, limit: Duration) -> Vec<ResultEvent> {
    let deadline = Instant::now() + limit;
    let mut events = Vec::new();
    loop {
        match stream.try_next() {
            Some(event) => events.push(event),
            None if stream.is_terminated() => return events,
            None => {
                assert!(Instant::now() < deadline, "stream never terminated");
                thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

#[test]
fn admission_runs_queues_then_rejects() {
    let script = Script::new();
    let pool = pool(opts(2, 1), &script);

    let first = pool.submit("WAIT").unwrap();
    let second = pool.submit("WAIT").unwrap();
    wait_until("two running queries", || {
        script.waiting.load(Ordering::SeqCst) == 2
    });
    let third = pool.submit("WAIT").unwrap();

    let status = pool.status();
    assert_eq!(status.slots, 2);
    assert_eq!(status.running, 2);
    assert_eq!(status.queued, 1);

    match pool.submit("WAIT") {
        Err(Error::CapacityExceeded { running, queued }) => {
            assert_eq!(running, 2);
            assert_eq!(queued, 1);
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    script.release();
    for stream in [first, second, third] {
        let status = view::status(stream).unwrap();
        assert_eq!(status.tag, "WAIT");
    }

    wait_until("idle pool", || pool.status().idle == 2);
    assert!(view::status(pool.submit("SET x").unwrap()).is_ok());
}

#[test]
fn statement_indices_are_contiguous() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);
    let query = Query::batch(["ROWS 3", "UPDATE t", "ROWS 0", "ROWS 7001", "INSERT t"]).unwrap();

    let events: Vec<_> = pool.submit(query).unwrap().collect();
    assert!(events.iter().all(|e| !e.is_error()));

    let indices: Vec<_> = events.iter().map(ResultEvent::statement_index).collect();
    assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    let distinct: BTreeSet<_> = indices.into_iter().collect();
    assert_eq!(distinct, (0..5).collect());

    let last_flags: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ResultEvent::RowBatch(b) => Some((b.statement_index, b.len(), b.last)),
            _ => None,
        })
        .collect();
    assert_eq!(
        last_flags,
        vec![(0, 3, true), (2, 0, true), (3, 5000, false), (3, 2001, true)]
    );
}

#[test]
fn error_in_batch_ends_stream() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);
    let query = Query::batch(["ROWS 2", "FAIL", "ROWS 1"]).unwrap();

    let events: Vec<_> = pool.submit(query).unwrap().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ResultEvent::RowBatch(b) if b.statement_index == 0 && b.len() == 2));
    match &events[1] {
        ResultEvent::Error(err) => {
            assert_eq!(err.statement_index, 1);
            assert_eq!(err.statement.as_deref(), Some("FAIL"));
            assert_eq!(err.sql_state.as_deref(), Some("42601"));
            assert!(!err.is_connection_fault());
        }
        other => panic!("unexpected {:?}", other),
    }

    // Statement errors leave the connection usable.
    assert!(view::status(pool.submit("SET y").unwrap()).is_ok());
    assert_eq!(pool.status().replacements, 0);
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn rows_projection_over_pool() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);
    let query = Query::batch(["ROWS 2", "UPDATE t", "ROWS 3"]).unwrap();

    let values: Vec<i64> = view::rows(pool.submit(query).unwrap())
        .map(|row| row.and_then(|r| r.get(0)))
        .collect::<zero_pgpool::Result<_>>()
        .unwrap();
    assert_eq!(values, vec![0, 1, 0, 1, 2]);
}

#[test]
fn cancel_mid_stream_replaces_slot() {
    let script = Script::new();
    let pool = pool(opts(1, 1), &script);

    let mut stream = pool.submit("ROWS 12000").unwrap().prefetch(1);
    match stream.next() {
        Some(ResultEvent::RowBatch(b)) => assert_eq!(b.len(), 5000),
        other => panic!("unexpected {:?}", other),
    }
    drop(stream);

    wait_until("slot replacement", || {
        let s = pool.status();
        s.replacements == 1 && s.running == 0 && s.idle == 1
    });
    assert_eq!(pool.status().slots, 1);
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);

    let values: Vec<_> = view::rows(pool.submit("ROWS 2").unwrap()).collect();
    assert_eq!(values.len(), 2);
}

#[test]
fn cancel_at_safe_point_keeps_connection() {
    let script = Script::new();
    let pool = pool(opts(1, 1), &script);

    let mut stream = pool.submit("DRAIN 12000").unwrap().prefetch(1);
    assert!(matches!(stream.next(), Some(ResultEvent::RowBatch(b)) if b.len() == 5000));
    drop(stream);

    wait_until("slot to settle", || {
        let s = pool.status();
        s.running == 0 && s.idle == 1
    });
    assert_eq!(pool.status().replacements, 0);
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    assert_eq!(script.closes.load(Ordering::SeqCst), 0);

    assert_eq!(view::rows(pool.submit("ROWS 2").unwrap()).count(), 2);
}

#[test]
fn blank_query_is_rejected() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);
    assert!(matches!(pool.submit(""), Err(Error::InvalidUsage(_))));
    assert!(matches!(pool.submit("   "), Err(Error::InvalidUsage(_))));
    assert_eq!(pool.status().queued, 0);
}

#[test]
fn failed_prestart_closes_opened_connections() {
    let script = Script::new();
    let factory = Arc::clone(&script);
    let res = Pool::new(opts(3, 0), move |_: &Opts| -> zero_pgpool::Result<FakeConn> {
        if factory.connects.fetch_add(1, Ordering::SeqCst) == 2 {
            return Err(Error::ConnectionBroken("connection refused".into()));
        }
        Ok(FakeConn::new(&factory))
    });
    assert!(matches!(res, Err(Error::ConnectionBroken(_))));
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn cursor_results_fail_and_reset() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);

    let events: Vec<_> = pool.submit("CURSOR").unwrap().collect();
    match events.as_slice() {
        [ResultEvent::Error(err)] => assert!(err.message.contains("cursor")),
        other => panic!("unexpected {:?}", other),
    }
    wait_until("slot replacement", || pool.status().replacements == 1);
}

#[test]
fn broken_connection_is_replaced() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);

    let events: Vec<_> = pool.submit("BREAK").unwrap().collect();
    match events.as_slice() {
        [ResultEvent::Error(err)] => assert!(err.is_connection_fault()),
        other => panic!("unexpected {:?}", other),
    }
    wait_until("slot replacement", || pool.status().replacements == 1);
    assert!(view::status(pool.submit("SET z").unwrap()).is_ok());
}

#[test]
fn panic_faults_only_one_slot() {
    let script = Script::new();
    let pool = pool(opts(2, 0), &script);

    let events: Vec<_> = pool.submit("PANIC").unwrap().collect();
    match events.as_slice() {
        [ResultEvent::Error(err)] => assert!(err.is_connection_fault()),
        other => panic!("unexpected {:?}", other),
    }
    wait_until("slot replacement", || {
        let s = pool.status();
        s.replacements == 1 && s.idle == 2
    });
    assert_eq!(script.connects.load(Ordering::SeqCst), 3);

    let a = pool.submit("ROWS 1").unwrap();
    let b = pool.submit("ROWS 1").unwrap();
    assert_eq!(view::rows(a).count(), 1);
    assert_eq!(view::rows(b).count(), 1);
}

#[test]
fn idle_connection_is_pinged_and_replaced() {
    let script = Script::new();
    let mut opts = opts(1, 0);
    opts.idle_timeout = Duration::from_millis(20);
    let pool = pool(opts, &script);

    thread::sleep(Duration::from_millis(60));
    script.fail_pings.store(true, Ordering::SeqCst);

    assert!(view::status(pool.submit("SET a").unwrap()).is_ok());
    assert_eq!(script.pings.load(Ordering::SeqCst), 1);
    assert_eq!(pool.status().replacements, 1);
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
}

#[test]
fn shutdown_drains_queue_and_closes() {
    let script = Script::new();
    let pool = pool(opts(1, 2), &script);

    let streams: Vec<_> = (0..3)
        .map(|_| pool.submit("ROWS 1").unwrap().unbounded())
        .collect();
    pool.shutdown();
    assert!(pool.is_closed());

    for stream in streams {
        let events: Vec<_> = stream.collect();
        assert!(matches!(events.as_slice(), [ResultEvent::RowBatch(b)] if b.len() == 1));
    }
    assert!(matches!(pool.submit("SET b"), Err(Error::PoolClosed)));
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);

    pool.shutdown();
}

#[test]
fn dropping_pool_with_unread_stream_returns() {
    let script = Script::new();
    let pool = pool(opts(1, 1), &script);
    let running = pool.submit("ROWS 3").unwrap();
    let queued = pool.submit("ROWS 3").unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let dropper = thread::spawn(move || {
        drop(pool);
        let _ = done_tx.send(());
    });
    assert!(
        done_rx.recv_timeout(Duration::from_secs(3)).is_ok(),
        "pool drop blocked on an unread stream"
    );
    dropper.join().unwrap();

    for stream in [running, queued] {
        let events: Vec<_> = stream.collect();
        match events.as_slice() {
            [ResultEvent::Error(err)] => {
                assert!(matches!(err.cause.as_deref(), Some(Error::PoolClosed)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn submit_racing_shutdown_never_strands_a_query() {
    let script = Script::new();
    let pool = pool(opts(2, 64), &script);
    let shared_pool = &pool;

    let admitted = thread::scope(|s| {
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || {
                    let mut streams = Vec::new();
                    for _ in 0..200 {
                        match shared_pool.submit("SET r") {
                            Ok(stream) => streams.push(stream.unbounded()),
                            Err(Error::PoolClosed) => break,
                            Err(Error::CapacityExceeded { .. }) => thread::yield_now(),
                            Err(err) => panic!("unexpected {:?}", err),
                        }
                    }
                    streams
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(5));
        pool.shutdown();
        submitters
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert!(matches!(pool.submit("SET r"), Err(Error::PoolClosed)));
    for stream in admitted {
        let events = finish_within(stream, Duration::from_secs(3));
        assert!(events.len() <= 1);
    }
    assert_eq!(pool.status().queued, 0);
}

#[test]
fn worker_threads_are_named() {
    let script = Script::new();
    let pool = pool(opts(2, 0), &script);
    assert_eq!(pool.opts().capacity(), 2);
    assert!(view::status(pool.submit("SET c").unwrap()).is_ok());
    let threads = script.threads.lock().unwrap().clone();
    assert!(matches!(threads.as_slice(), [name] if name == "test-0" || name == "test-1"));

    drop(pool);
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_consumer() {
    let script = Script::new();
    let pool = pool(opts(1, 0), &script);

    let mut stream = pool.submit(Query::batch(["ROWS 3", "DELETE t"]).unwrap()).unwrap();
    let mut kinds = Vec::new();
    while let Some(event) = stream.recv().await {
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec!["RowBatch", "CommandStatus"]);
}
