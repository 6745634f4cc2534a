use crate::*;

/// Whatever the engine makes of a segment, it is re-injected exactly once
/// and unchanged.
#[tokio::test(flavor = "multi_thread")]
async fn test_every_segment_forwarded_exactly_once() {
    let engine = Engine::start();
    let feed = engine.watch(MAIN_SERVER);

    let midstream = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    let wrong_code = Flow::new("192.168.1.10:50001", "51.75.130.180:443");
    let malformed = Flow::new("192.168.1.10:50002", "51.75.130.180:443");
    let healthy = Flow::new("192.168.1.10:50003", "51.75.130.180:443");

    let input = vec![
        // captured mid-stream: server speaks first
        midstream.recv(CommandCode::new(4, 4), b"state"),
        midstream.send(9, CommandCode::MAIN_HANDSHAKE, b""),
        // not our protocol
        wrong_code.send(1, CommandCode::new(1, 2), b"hello"),
        wrong_code.send(2, CommandCode::MAIN_HANDSHAKE, b""),
        // desynchronised stream
        malformed.send(1, CommandCode::MAIN_HANDSHAKE, b""),
        malformed.inbound_raw(vec![0xff; 8]),
        malformed.recv(CommandCode::new(6, 6), b"after"),
        // a healthy flow with a partial frame and an empty segment
        healthy.outbound_raw(vec![0x05, 0x01]),
        healthy.outbound_raw(Vec::new()),
        healthy.outbound_raw(vec![0x1c, 0x01, 0xaa, 0xbb, 0xcc, 0xdd]),
        healthy.fin(),
        healthy.send(3, CommandCode::new(7, 7), b"lingering"),
    ];
    for segment in &input {
        feed.inject(segment.clone());
    }

    assert!(eventually(|| feed.sent_count() == input.len()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed.sent(), input);

    // only the healthy flow and the desynchronised one ever linked
    assert_eq!(engine.stats.sessions(), 2);
}

/// Stopping the engine closes the capture handle and ends the drivers.
#[tokio::test(flavor = "multi_thread")]
async fn test_stop_ends_capture() {
    let engine = Engine::start();
    let feed = engine.watch(MAIN_SERVER);
    let driver = engine.scanner.driver(ip(MAIN_SERVER)).unwrap();

    engine.stop();
    assert!(driver.is_closed());
    assert!(eventually(|| engine.scanner.outstanding() == 0).await);

    let flow = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    feed.inject(flow.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed.sent_count(), 0);
}
