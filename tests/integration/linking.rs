use crate::*;

use tap_services::Role;

/// Main handshake, bulle switch, bulle handshake: one session spanning
/// both connections.
#[tokio::test(flavor = "multi_thread")]
async fn test_main_and_bulle_link_into_one_session() {
    let engine = Engine::start();
    let main_feed = engine.watch(MAIN_SERVER);
    let main = Flow::new("192.168.1.10:50000", "51.75.130.180:443");

    main_feed.inject(main.send(1, CommandCode::MAIN_HANDSHAKE, b"\x00\x00\x02\x4a"));
    assert!(eventually(|| engine.stats.sessions() == 1).await, "no session created");

    let key: CorrelationKey = *b"correlation!";
    main_feed.inject(main.recv(CommandCode::BULLE_SWITCH, &switch_body(&key, BULLE_SERVER)));
    assert!(
        eventually(|| engine.scanner.watched().contains(&ip(BULLE_SERVER))).await,
        "bulle address not monitored"
    );
    assert_eq!(engine.registry.len(), 1);

    let bulle_feed = engine.backends.feed(ip(BULLE_SERVER));
    let bulle = Flow::new("192.168.1.10:50001", "51.75.130.190:5555");
    bulle_feed.inject(bulle.send(0, CommandCode::BULLE_HANDSHAKE, &key));
    assert!(eventually(|| engine.stats.linked() == 1).await, "bulle never linked");
    assert!(engine.registry.is_empty());

    assert!(eventually(|| engine.recorder.len() == 3).await);
    let events = engine.recorder.events();
    let session = events[0].session.clone();
    assert_eq!(session.main().local, main.local);
    assert_eq!(session.bulle().map(|c| c.local), Some(bulle.local));

    let bulle_event = events.iter().find(|e| e.channel.role == Role::Bulle).unwrap();
    assert!(Arc::ptr_eq(&bulle_event.session, &session));
    assert_eq!(bulle_event.fingerprint, Some(0));
}

/// A bulle handshake that arrives before the switch is never linked.
#[tokio::test(flavor = "multi_thread")]
async fn test_bulle_before_switch_is_ignored() {
    let engine = Engine::start();
    let bulle_feed = engine.watch(BULLE_SERVER);
    let bulle = Flow::new("192.168.1.10:50001", "51.75.130.190:5555");

    bulle_feed.inject(bulle.send(0, CommandCode::BULLE_HANDSHAKE, b"unknown key!"));
    bulle_feed.inject(bulle.recv(CommandCode::new(5, 5), b"later traffic"));
    assert!(eventually(|| bulle_feed.sent_count() == 2).await);

    assert_eq!(engine.stats.linked(), 0);
    assert_eq!(engine.stats.ignored(), 1);
    assert_eq!(engine.recorder.len(), 0);
}

/// Two clients on the main server get separate sessions.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients_get_separate_sessions() {
    let engine = Engine::start();
    let feed = engine.watch(MAIN_SERVER);
    let alice = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    let bob = Flow::new("192.168.1.11:50000", "51.75.130.180:443");

    feed.inject(alice.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    feed.inject(bob.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    assert!(eventually(|| engine.recorder.len() == 2).await);

    let events = engine.recorder.events();
    assert!(!Arc::ptr_eq(&events[0].session, &events[1].session));
    assert_eq!(engine.stats.sessions(), 2);
}

/// A room change sends the client to another bulle; the session follows it.
#[tokio::test(flavor = "multi_thread")]
async fn test_room_change_relinks_session_to_new_bulle() {
    let engine = Engine::start();
    let main_feed = engine.watch(MAIN_SERVER);
    let main = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    main_feed.inject(main.send(1, CommandCode::MAIN_HANDSHAKE, b""));

    let first_key: CorrelationKey = [1; 12];
    main_feed.inject(main.recv(CommandCode::BULLE_SWITCH, &switch_body(&first_key, BULLE_SERVER)));
    assert!(eventually(|| engine.scanner.watched().contains(&ip(BULLE_SERVER))).await);
    let first = Flow::new("192.168.1.10:50001", "51.75.130.190:5555");
    engine
        .backends
        .feed(ip(BULLE_SERVER))
        .inject(first.send(0, CommandCode::BULLE_HANDSHAKE, &first_key));
    assert!(eventually(|| engine.stats.linked() == 1).await);

    let second_server = "51.75.130.191";
    let second_key: CorrelationKey = [2; 12];
    main_feed.inject(main.recv(CommandCode::BULLE_SWITCH, &switch_body(&second_key, second_server)));
    assert!(eventually(|| engine.scanner.watched().contains(&ip(second_server))).await);
    let second = Flow::new("192.168.1.10:50002", "51.75.130.191:5555");
    let second_feed = engine.backends.feed(ip(second_server));
    second_feed.inject(second.send(0, CommandCode::BULLE_HANDSHAKE, &second_key));
    second_feed.inject(second.recv(CommandCode::new(5, 21), b"new room"));
    assert!(eventually(|| engine.stats.linked() == 2).await, "second bulle never linked");
    assert!(eventually(|| engine.recorder.len() == 6).await);

    let events = engine.recorder.events();
    let session = events[0].session.clone();
    assert_eq!(session.bulle().map(|c| c.local), Some(second.local));
    let from_second = events.iter().filter(|e| e.channel.local == second.local).count();
    assert_eq!(from_second, 2);
    assert!(engine.registry.is_empty());
}
