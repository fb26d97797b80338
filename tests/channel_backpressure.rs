//! Channel-level backpressure and close-semantics scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use millrace::error::{IoErrorKind, StreamError};
use millrace::exec::ManualExecutor;
use millrace::promise::Promise;
use millrace::test_logging::{TestEvent, TestLogger};
use millrace::{assert_eq_log, assert_log, test_log, Channel, Readable, SendError};

type Outcome<T> = Arc<Mutex<Option<Result<T, StreamError>>>>;

fn settle_into<T: Send + 'static>(promise: Promise<T>) -> Outcome<T> {
    let slot: Outcome<T> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    promise.on_settle(move |outcome| *sink.lock() = Some(outcome));
    slot
}

fn recv_now(rx: &Readable<u32>, exec: &Arc<ManualExecutor>) -> Result<u32, StreamError> {
    let slot = settle_into(rx.receive());
    exec.run_until_idle();
    let outcome = slot.lock().take();
    outcome.expect("receive did not settle")
}

#[test]
fn filling_and_draining_crosses_both_watermarks() {
    let logger = TestLogger::from_env();
    let exec = ManualExecutor::new();
    let chan = Channel::with_resume_count(exec.queue(), 4, 3);
    let (rx, tx) = chan.into_parts();

    let resumes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resumes);
    tx.set_resume_notification(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..4u32 {
        tx.send(i).expect("send below close");
        test_log!(logger, "fill", "sent {} should_send={}", i, tx.should_send());
    }
    logger.log(TestEvent::Paused);
    assert_log!(logger, !tx.should_send(), "channel must pause at capacity");

    // Draining two values crosses the low watermark; the notification fires
    // exactly once and values come back in send order.
    let first = recv_now(&rx, &exec);
    let second = recv_now(&rx, &exec);
    logger.log(TestEvent::Resumed);

    assert_eq_log!(logger, first, Ok(0));
    assert_eq_log!(logger, second, Ok(1));
    assert_eq_log!(logger, resumes.load(Ordering::SeqCst), 1);
    assert_log!(logger, tx.should_send(), "channel must resume after drain");

    // The remaining buffered values drain without another notification.
    assert_eq_log!(logger, recv_now(&rx, &exec), Ok(2));
    assert_eq_log!(logger, recv_now(&rx, &exec), Ok(3));
    assert_eq_log!(logger, resumes.load(Ordering::SeqCst), 1);
}

#[test]
fn parked_receiver_takes_the_value_directly() {
    let exec = ManualExecutor::new();
    let chan = Channel::new(exec.queue(), 2);
    let (rx, tx) = chan.into_parts();

    let parked = settle_into(rx.receive());
    exec.run_until_idle();
    assert!(parked.lock().is_none(), "no value yet");

    tx.send(5).expect("send");
    exec.run_until_idle();
    assert_eq!(*parked.lock(), Some(Ok(5)));
    assert!(tx.should_send(), "bypassing the queue never pauses");
}

#[test]
fn close_with_cause_rejects_current_and_future_receives() {
    let exec = ManualExecutor::new();
    let chan = Channel::new(exec.queue(), 1);
    let (rx, tx) = chan.into_parts();

    let parked = settle_into(rx.receive());
    exec.run_until_idle();

    tx.close_with(StreamError::Io(IoErrorKind::ConnectionReset));
    exec.run_until_idle();
    assert_eq!(
        *parked.lock(),
        Some(Err(StreamError::Io(IoErrorKind::ConnectionReset)))
    );

    // A receive issued after the close observes the same cause.
    assert_eq!(
        recv_now(&rx, &exec),
        Err(StreamError::Io(IoErrorKind::ConnectionReset))
    );
}

#[test]
fn close_is_idempotent_across_endpoints() {
    let exec = ManualExecutor::new();
    let chan = Channel::new(exec.queue(), 2);
    let (rx, tx) = chan.into_parts();

    tx.send(1).expect("send");
    for _ in 0..3 {
        rx.close();
        tx.close();
    }

    // Data sent before the close still drains, then the generic close shows.
    assert_eq!(recv_now(&rx, &exec), Ok(1));
    assert_eq!(recv_now(&rx, &exec), Err(StreamError::ChannelClosed));

    match tx.send(2) {
        Err(SendError::Closed(v)) => assert_eq!(v, 2),
        other => panic!("send after close must fail, got {other:?}"),
    }
}

#[test]
fn values_cross_threads_in_order() {
    let exec = ManualExecutor::new();
    let chan = Channel::with_resume_count(exec.queue(), 8, 6);
    let (rx, tx) = chan.into_parts();

    const COUNT: u32 = 200;

    let producer = std::thread::spawn(move || {
        for i in 0..COUNT {
            // Cooperative producer: spin until the consumer has drained.
            loop {
                if tx.should_send() {
                    break;
                }
                std::thread::yield_now();
            }
            tx.send(i).expect("receiver alive");
        }
    });

    let mut received = Vec::new();
    while received.len() < COUNT as usize {
        let slot = settle_into(rx.receive());
        loop {
            exec.run_until_idle();
            if let Some(outcome) = slot.lock().take() {
                received.push(outcome.expect("no close during transfer"));
                break;
            }
            std::thread::yield_now();
        }
    }

    producer.join().expect("producer thread");
    let expected: Vec<u32> = (0..COUNT).collect();
    assert_eq!(received, expected, "no gaps, duplicates, or reordering");
}

#[test]
fn resume_notification_fires_once_per_transition() {
    let exec = ManualExecutor::new();
    let chan = Channel::with_resume_count(exec.queue(), 2, 2);
    let (rx, tx) = chan.into_parts();

    let resumes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resumes);
    tx.set_resume_notification(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Three full pause/drain cycles: one firing each.
    for cycle in 1..=3 {
        tx.send(0).expect("send");
        tx.send(1).expect("send");
        assert!(!tx.should_send());

        let _ = recv_now(&rx, &exec);
        let _ = recv_now(&rx, &exec);
        assert_eq!(resumes.load(Ordering::SeqCst), cycle);
    }
}
