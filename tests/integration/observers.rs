use crate::*;

struct Failing;

impl Observer for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn packet_sent(&self, _event: SessionEvent) -> anyhow::Result<()> {
        anyhow::bail!("observer rejected the packet")
    }

    fn packet_received(&self, _event: SessionEvent) -> anyhow::Result<()> {
        anyhow::bail!("observer rejected the packet")
    }
}

struct Panicking;

impl Observer for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn packet_sent(&self, _event: SessionEvent) -> anyhow::Result<()> {
        panic!("observer bug")
    }

    fn packet_received(&self, _event: SessionEvent) -> anyhow::Result<()> {
        panic!("observer bug")
    }
}

/// A broken observer neither stalls forwarding nor starves the others.
#[tokio::test(flavor = "multi_thread")]
async fn test_broken_observers_are_isolated() {
    let engine = Engine::start_with(
        NetworkConfig::default(),
        vec![Arc::new(Failing), Arc::new(Panicking)],
    );
    let feed = engine.watch(MAIN_SERVER);
    let flow = Flow::new("192.168.1.10:50000", "51.75.130.180:443");

    feed.inject(flow.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    feed.inject(flow.recv(CommandCode::new(5, 2), b"map"));
    feed.inject(flow.send(2, CommandCode::new(4, 4), b"move"));

    assert!(eventually(|| engine.recorder.len() == 3).await);
    assert_eq!(feed.sent_count(), 3);

    let directions: Vec<_> = engine
        .recorder
        .events()
        .iter()
        .map(|e| e.direction)
        .collect();
    assert_eq!(
        directions,
        vec![Direction::Outbound, Direction::Inbound, Direction::Outbound]
    );
}

/// Each observer reads its own copy of the packet.
#[tokio::test(flavor = "multi_thread")]
async fn test_observers_get_private_copies() {
    struct Draining;

    impl Observer for Draining {
        fn name(&self) -> &str {
            "draining"
        }

        fn packet_sent(&self, mut event: SessionEvent) -> anyhow::Result<()> {
            while event.packet.read_u8().is_ok() {}
            Ok(())
        }

        fn packet_received(&self, mut event: SessionEvent) -> anyhow::Result<()> {
            while event.packet.read_u8().is_ok() {}
            Ok(())
        }
    }

    let engine = Engine::start_with(NetworkConfig::default(), vec![Arc::new(Draining)]);
    let feed = engine.watch(MAIN_SERVER);
    let flow = Flow::new("192.168.1.10:50000", "51.75.130.180:443");

    feed.inject(flow.send(7, CommandCode::MAIN_HANDSHAKE, b"\x01\x02"));
    feed.inject(flow.recv(CommandCode::new(5, 2), b"map"));
    assert!(eventually(|| engine.recorder.len() == 2).await);

    let events = engine.recorder.events();
    let mut sent = events[0].packet.clone();
    assert_eq!(sent.pos(), 1);
    assert_eq!(sent.read_code().unwrap(), CommandCode::MAIN_HANDSHAKE);

    let mut received = events[1].packet.clone();
    assert_eq!(received.pos(), 0);
    assert_eq!(received.read_code().unwrap(), CommandCode::new(5, 2));
}
