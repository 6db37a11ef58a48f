//! Full datagram sessions against scripted peers on loopback sockets.
//!
//! The peers assert the exact frames the client emits: ids, destinations
//! (configured port versus the per-session port) and confirmation traffic.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use ipk24chat_client::client::state::ClientState;
use ipk24chat_client::client::Client;
use ipk24chat_client::config::{ClientConfig, TransportKind};
use ipk24chat_client::protocol::message::{Message, MessageId};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = BytesMut::new();
    msg.ser_udp(&mut buf);
    buf.to_vec()
}

fn confirm(ref_id: u16) -> Vec<u8> {
    encode(&Message::Confirm { ref_id: MessageId::from_raw(ref_id) })
}

fn reply(id: u16, ok: bool, ref_id: u16, content: &str) -> Vec<u8> {
    encode(&Message::Reply {
        id: MessageId::from_raw(id),
        ok,
        ref_id: Some(MessageId::from_raw(ref_id)),
        content: content.into(),
    })
}

async fn client_for(server: &UdpSocket, max_retransmissions: u32) -> Client {
    let mut config = ClientConfig::new(TransportKind::Udp, "127.0.0.1");
    config.port = server.local_addr().unwrap().port();
    config.confirm_timeout = Duration::from_millis(100);
    config.max_retransmissions = max_retransmissions;
    Client::connect(&config).await.unwrap()
}

#[tokio::test]
async fn test_happy_path_with_port_switch() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let session = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 3).await;

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];

        // AUTH id 0 arrives on the configured port
        let (len, client_addr) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\x02\x00\x00user\0Alice\0pw\0"[..]);

        // confirm and reply from the per-session port
        session.send_to(&confirm(0), client_addr).await.unwrap();
        session.send_to(&reply(0, true, 0, "welcome"), client_addr).await.unwrap();

        // the reply gets confirmed on the per-session port
        let (len, _) = session.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &confirm(0)[..]);

        // chat message id 1 follows on the per-session port
        let (len, _) = session.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\x04\x00\x01Alice\0hello\0"[..]);
        session.send_to(&confirm(1), client_addr).await.unwrap();

        // farewell id 2
        let (len, _) = session.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\xFF\x00\x02"[..]);
        session.send_to(&confirm(2), client_addr).await.unwrap();
    });

    let input = BufReader::new(&b"/auth user pw Alice\nhello\n/exit\n"[..]);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    assert!(success);
    assert_eq!(client.state(), ClientState::End);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_silent_server_retransmission_bound() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 2).await;

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        // initial send plus two retransmissions, same id each time
        for _ in 0..3 {
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &b"\x02\x00\x00user\0Alice\0pw\0"[..]);
        }
        // nothing after the budget is exhausted
        let extra = timeout(Duration::from_millis(500), server.recv_from(&mut buf)).await;
        assert!(extra.is_err());
    });

    let input = BufReader::new(&b"/auth user pw Alice\n"[..]);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    // a silent server is a clean end, not a client fault
    assert!(success);
    assert_eq!(client.state(), ClientState::End);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_reply_is_suppressed_but_confirmed_twice() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 3).await;

    let (mut stdin, stdin_feed) = tokio::io::duplex(64);

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];

        stdin.write_all(b"/auth user pw Alice\n").await.unwrap();

        let (_, client_addr) = server.recv_from(&mut buf).await.unwrap();
        server.send_to(&confirm(0), client_addr).await.unwrap();

        // the same reply delivered twice
        server.send_to(&reply(7, true, 0, "welcome"), client_addr).await.unwrap();
        server.send_to(&reply(7, true, 0, "welcome"), client_addr).await.unwrap();

        // both deliveries are confirmed
        for _ in 0..2 {
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &confirm(7)[..]);
        }

        // only now let the user leave; the farewell id proves the duplicate
        // burned no extra ids or state
        stdin.write_all(b"/exit\n").await.unwrap();
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\xFF\x00\x01"[..]);
        server.send_to(&confirm(1), client_addr).await.unwrap();
    });

    let input = BufReader::new(stdin_feed);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    assert!(success);
    assert_eq!(client.state(), ClientState::End);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_wrong_reply_reference_is_fatal() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 3).await;

    let (mut stdin, stdin_feed) = tokio::io::duplex(64);

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];

        stdin.write_all(b"/auth user pw Alice\n").await.unwrap();

        let (_, client_addr) = server.recv_from(&mut buf).await.unwrap();
        server.send_to(&confirm(0), client_addr).await.unwrap();
        server.send_to(&reply(5, true, 99, "welcome"), client_addr).await.unwrap();

        // the bogus reply is still confirmed before the session fails
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &confirm(5)[..]);

        // shutdown emits ERR with the diagnostic, then BYE
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(
            &buf[..len],
            &b"\xFE\x00\x01Alice\0Received reply for wrong message\0"[..]
        );
        server.send_to(&confirm(1), client_addr).await.unwrap();

        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\xFF\x00\x02"[..]);
        server.send_to(&confirm(2), client_addr).await.unwrap();

        // keep stdin open until the session is over
        stdin
    });

    let input = BufReader::new(stdin_feed);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    assert!(!success);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_eof_in_start_sends_bye_and_exits_cleanly() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 3).await;

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, client_addr) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\xFF\x00\x00"[..]);
        server.send_to(&confirm(0), client_addr).await.unwrap();
    });

    let input = BufReader::new(&b""[..]);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    assert!(success);
    assert_eq!(client.state(), ClientState::End);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_interleaved_message_during_confirmation_wait() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(&server, 3).await;

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 1500];

        let (_, client_addr) = server.recv_from(&mut buf).await.unwrap();

        // a chat message squeezes in before the AUTH confirmation
        server
            .send_to(&encode(&Message::Msg {
                id: MessageId::from_raw(3),
                display_name: "bob".into(),
                content: "early".into(),
            }), client_addr)
            .await
            .unwrap();
        server.send_to(&confirm(0), client_addr).await.unwrap();

        // the interleaved message is confirmed while the client still waits
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &confirm(3)[..]);

        server.send_to(&reply(0, true, 0, "welcome"), client_addr).await.unwrap();
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &confirm(0)[..]);

        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &b"\xFF\x00\x01"[..]);
        server.send_to(&confirm(1), client_addr).await.unwrap();
    });

    let input = BufReader::new(&b"/auth user pw Alice\n/exit\n"[..]);
    let success = timeout(TEST_TIMEOUT, client.run(input)).await.unwrap();

    assert!(success);
    assert_eq!(client.state(), ClientState::End);
    peer.await.unwrap();
}
