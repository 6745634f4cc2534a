use crate::*;

use tap_core::MessageKey;

fn login_body(id: u32, name: &str, login_id: u32) -> Vec<u8> {
    let mut packet = Packet::new();
    packet
        .write_u32(id)
        .write_utf(name)
        .write_u32(120)
        .write_u8(1)
        .write_u32(login_id);
    packet.into_bytes()
}

/// Chat body as the client sends it: ciphered with the session key.
fn ciphered_chat(key: &MessageKey, fp: u8, text: &[u8]) -> Vec<u8> {
    let mut body = text.to_vec();
    key.apply(fp, &mut body);
    body
}

fn chat_echo(name: &str, text: &[u8]) -> Vec<u8> {
    let mut packet = Packet::new();
    packet.write_utf(name).write_bytes(text);
    packet.into_bytes()
}

/// Login, a ciphered chat message and its echo recover the message key.
#[tokio::test(flavor = "multi_thread")]
async fn test_key_recovered_from_own_chat_echo() {
    let engine = Engine::start();
    let feed = engine.watch(MAIN_SERVER);
    let main = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    let key = MessageKey::new(*b"\x11\x22\x33\x44\x55\x66\x77\x88\x99\xaa\xbb\xcc\xdd\xee\xff\x01\x02\x03\x04\x05");
    let text = b"bonjour tout le monde, ca va ?";

    feed.inject(main.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    feed.inject(main.recv(CommandCode::LOGIN, &login_body(4242, "Tigrounette#0000", 77)));
    feed.inject(main.send(37, CommandCode::CHAT, &ciphered_chat(&key, 37, text)));
    feed.inject(main.recv(CommandCode::CHAT, &chat_echo("Someone#1234", text)));
    feed.inject(main.recv(CommandCode::CHAT, &chat_echo("Tigrounette#0000", text)));
    assert!(eventually(|| engine.recorder.len() == 5).await);

    let session = engine.recorder.events()[0].session.clone();
    let identity = session.identity().unwrap();
    assert_eq!(identity.id, 4242);
    assert_eq!(identity.name, "Tigrounette#0000");
    assert_eq!(identity.login_id, 77);
    assert!(!identity.is_anonymous);
    assert_eq!(session.message_key(), Some(key.clone()));

    // with the key, later messages can be read
    let reply = b"tres bien merci, et toi ?";
    let events_before = engine.recorder.len();
    feed.inject(main.send(38, CommandCode::CHAT, &ciphered_chat(&key, 38, reply)));
    assert!(eventually(|| engine.recorder.len() == events_before + 1).await);

    let mut sent = engine.recorder.events().pop().unwrap().packet;
    assert_eq!(sent.read_code().unwrap(), CommandCode::CHAT);
    let offset = sent.pos();
    sent.xor_cipher(&session.message_key().unwrap(), 38, offset);
    assert_eq!(&sent.as_bytes()[offset..], reply);
}

/// Chat before login is not captured.
#[tokio::test(flavor = "multi_thread")]
async fn test_no_recovery_without_login() {
    let engine = Engine::start();
    let feed = engine.watch(MAIN_SERVER);
    let main = Flow::new("192.168.1.10:50000", "51.75.130.180:443");
    let key = MessageKey::new([0x42; 20]);
    let text = b"twenty-something bytes of text";

    feed.inject(main.send(1, CommandCode::MAIN_HANDSHAKE, b""));
    feed.inject(main.send(2, CommandCode::CHAT, &ciphered_chat(&key, 2, text)));
    feed.inject(main.recv(CommandCode::LOGIN, &login_body(0, "*Souris", 1)));
    feed.inject(main.recv(CommandCode::CHAT, &chat_echo("*Souris", text)));
    assert!(eventually(|| engine.recorder.len() == 4).await);

    let session = engine.recorder.events()[0].session.clone();
    assert!(session.identity().unwrap().is_anonymous);
    assert!(session.message_key().is_none());
}
