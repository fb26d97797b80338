//! End-to-end socket scenarios over the deterministic lab reactor.

use std::sync::Arc;

use parking_lot::Mutex;

use millrace::bytes::ByteBlock;
use millrace::channel::Readable;
use millrace::error::{IoErrorKind, StreamError};
use millrace::reactor::lab::LabReactor;
use millrace::reactor::{StreamHandle, WriteStatus};
use millrace::test_logging::TestLogger;
use millrace::{assert_eq_log, assert_log, test_log, SocketOptions, StreamSocket};

/// Receives one settled block from an inbound endpoint, draining the reactor
/// queues as needed.
fn recv_block(
    rx: &Readable<ByteBlock>,
    reactor: &Arc<LabReactor>,
) -> Result<ByteBlock, StreamError> {
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    rx.receive().on_settle(move |outcome| *sink.lock() = Some(outcome));
    reactor.run();
    let outcome = slot.lock().take();
    outcome.expect("receive did not settle")
}

// A full backlog of unconsumed inbound blocks must stop OS reads; no further
// buffers are allocated until the consumer drains below the low watermark.
#[test]
fn inbound_backlog_stops_os_reads_until_drained() {
    let logger = TestLogger::from_env();
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let incoming = socket.incoming();

    // Default backlog_in is 6 blocks; deliver 7 without any consumer.
    for i in 0..7u8 {
        wire.deliver(vec![i; 100]);
    }
    reactor.run();

    assert_eq_log!(logger, wire.read_stop_count(), 1);
    assert_log!(logger, !wire.is_reading(), "reads must be stopped");
    assert_eq_log!(
        logger,
        wire.alloc_count(),
        6,
        "no buffer allocated past the backlog"
    );

    // Drain below the low watermark (default resume count for 6 is 4):
    // three receives bring the buffer to 3 and reads restart.
    for i in 0..3u8 {
        let block = recv_block(&incoming, &reactor).expect("buffered block");
        assert_eq_log!(logger, block.as_slice(), &[i; 100][..]);
    }
    test_log!(logger, "drain", "reads active again: {}", wire.is_reading());

    assert_log!(logger, wire.is_reading(), "resume notification restarts reads");
    assert_eq_log!(
        logger,
        wire.alloc_count(),
        7,
        "queued input flows after resume"
    );

    // The rest of the stream arrives intact and in order.
    for i in 3..7u8 {
        let block = recv_block(&incoming, &reactor).expect("remaining block");
        assert_eq_log!(logger, block.as_slice(), &[i; 100][..]);
    }
}

// Outbound bytes are pipelined into the OS only while the submitted-but-
// uncompleted total stays under the write cache; completions admit more.
#[test]
fn outbound_pump_bounds_outstanding_bytes() {
    let logger = TestLogger::from_env();
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let options = SocketOptions {
        write_cache_size: 100,
        ..SocketOptions::default()
    };
    let socket = StreamSocket::attach_with(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
        options,
    );
    let outgoing = socket.outgoing();

    const BLOCK: usize = 40;
    const COUNT: usize = 10;
    let mut expected = Vec::new();
    for i in 0..COUNT {
        let payload = vec![i as u8; BLOCK];
        expected.extend_from_slice(&payload);
        outgoing.send(ByteBlock::from_vec(payload)).expect("send");
    }
    reactor.run();

    // 40 + 40 < 100, so a third submit is admitted before the pump parks.
    assert_eq_log!(logger, wire.pending_write_count(), 3);
    assert_eq_log!(logger, wire.outstanding_write_bytes(), 3 * BLOCK);

    // No completions, no further submits.
    reactor.run();
    assert_eq_log!(logger, wire.pending_write_count(), 3);

    // Drive completions one at a time; outstanding bytes never exceed the
    // cache plus one block.
    let mut completed = 0;
    while completed < COUNT {
        assert_log!(
            logger,
            wire.complete_next_write(WriteStatus::Ok),
            "a write must be pending"
        );
        completed += 1;
        reactor.run();
        assert_log!(
            logger,
            wire.outstanding_write_bytes() <= 100 + BLOCK,
            "outstanding bytes exceeded the cache bound"
        );
    }

    assert_eq_log!(logger, wire.written(), expected);
    assert_eq_log!(logger, wire.pending_write_count(), 0);
}

// Echo: everything sent to one socket's outbound arrives on the peer's
// inbound, concatenating to the same byte sequence.
#[test]
fn echo_round_trip_preserves_byte_order() {
    let reactor = LabReactor::new();
    let (wire_a, wire_b) = reactor.pair();
    let socket_a = StreamSocket::attach(
        Arc::clone(&wire_a) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let socket_b = StreamSocket::attach(
        Arc::clone(&wire_b) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );

    let outgoing = socket_a.outgoing();
    let incoming = socket_b.incoming();

    let blocks: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i; 1 + i as usize * 7]).collect();
    let sent: Vec<u8> = blocks.concat();

    for payload in &blocks {
        outgoing
            .send(ByteBlock::from_vec(payload.clone()))
            .expect("send");
        // Interleave queue drains with sends, as a runtime would.
        reactor.run();
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        let block = recv_block(&incoming, &reactor).expect("echoed block");
        received.extend_from_slice(block.as_slice());
    }

    assert_eq!(received, sent);
}

// A peer reset mid-stream: buffered data still drains, then the translated
// error shows on inbound, sends fail, and the socket tears down.
#[test]
fn peer_reset_propagates_translated_error() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let incoming = socket.incoming();
    let outgoing = socket.outgoing();

    wire.deliver(b"partial".to_vec());
    wire.deliver_error(-104); // ECONNRESET
    reactor.run();

    // Close-after-data: the bytes that made it in are observed first.
    let block = recv_block(&incoming, &reactor).expect("data before the reset");
    assert_eq!(block.as_slice(), b"partial");

    assert_eq!(
        recv_block(&incoming, &reactor),
        Err(StreamError::Io(IoErrorKind::ConnectionReset))
    );
    assert!(outgoing.send(ByteBlock::from_vec(vec![1])).is_err());
    assert!(socket.is_closed());

    // The reactor has acknowledged handle shutdown and released its
    // callback-table entry.
    reactor.run();
    assert!(!wire.events_installed());
}

// EOF closes cleanly: the consumer sees the generic close, not an error.
#[test]
fn eof_closes_inbound_cleanly() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let incoming = socket.incoming();

    wire.deliver(b"tail".to_vec());
    wire.deliver_eof();
    reactor.run();

    assert_eq!(
        recv_block(&incoming, &reactor).expect("data").as_slice(),
        b"tail"
    );
    assert_eq!(
        recv_block(&incoming, &reactor),
        Err(StreamError::ChannelClosed)
    );
    assert!(socket.is_closed());
}

// Closing the inbound readable while reads are paused must not revive the
// socket: the pending resume notification holds only a weak reference.
#[test]
fn reader_close_while_paused_stops_reads_for_good() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let incoming = socket.incoming();

    for i in 0..8u8 {
        wire.deliver(vec![i]);
    }
    reactor.run();
    assert!(!wire.is_reading(), "backlog paused reads");

    incoming.close();
    reactor.run();

    // Anything still queued on the wire stays there; no new reads start.
    let stops_before = wire.read_stop_count();
    wire.deliver(vec![99]);
    reactor.run();
    assert!(!wire.is_reading());
    assert_eq!(wire.read_stop_count(), stops_before);
}

// Dropping an undetached socket closes both channels and the handle.
#[test]
fn dropping_the_socket_closes_everything() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let incoming = socket.incoming();
    let outgoing = socket.outgoing();

    drop(socket);
    reactor.run();

    assert!(incoming.is_closed());
    assert!(outgoing.is_closed());
    assert!(!wire.events_installed());
    assert_eq!(
        recv_block(&incoming, &reactor),
        Err(StreamError::ChannelClosed)
    );
}

// After detach, the socket survives its handle and lives until the user
// closes the endpoints; in-flight writes still drain to the wire.
#[test]
fn detached_socket_flushes_writes_after_handle_drop() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let mut socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let outgoing = socket.outgoing();

    socket.detach();
    drop(socket);
    reactor.run();

    outgoing
        .send(ByteBlock::from_vec(b"late".to_vec()))
        .expect("detached socket still accepts writes");
    reactor.run();
    while wire.complete_next_write(WriteStatus::Ok) {
        reactor.run();
    }
    assert_eq!(wire.written(), b"late");

    // Closing the outbound endpoint tears the socket down.
    outgoing.close();
    reactor.run();
    assert!(!wire.events_installed());
}

// A failed OS write closes the socket; the writer observes closure.
#[test]
fn write_error_closes_the_socket() {
    let reactor = LabReactor::new();
    let wire = reactor.stream();
    let socket = StreamSocket::attach(
        Arc::clone(&wire) as Arc<dyn StreamHandle>,
        &reactor.context(),
    );
    let outgoing = socket.outgoing();

    outgoing
        .send(ByteBlock::from_vec(vec![0; 16]))
        .expect("send");
    reactor.run();
    assert!(wire.complete_next_write(WriteStatus::Error(-32))); // EPIPE
    reactor.run();

    assert!(socket.is_closed());
    assert!(outgoing.send(ByteBlock::from_vec(vec![1])).is_err());
    assert!(!wire.events_installed());
}
