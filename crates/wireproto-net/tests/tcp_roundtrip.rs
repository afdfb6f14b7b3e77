use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use wireproto_net::tcp::{Connection, FrameAction, Listener};
use wireproto_net::{Config, ConnectionConfig, DisconnectReason, ListenerConfig};
use wireproto_pool::MessagePool;

fn free_addr() -> SocketAddr {
    let probe = std::net::TcpListener::bind(SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))).expect("probe bind");
    let addr = probe.local_addr().expect("probe addr");
    drop(probe);
    addr
}

/// Starts a `Listener` that, for each accepted connection, forwards every
/// completed message's (type, payload) and the eventual disconnect reason
/// to `tx`.
fn spawn_echo_listener(addr: SocketAddr) -> (Listener, mpsc::Receiver<(u8, Vec<u8>)>, mpsc::Receiver<DisconnectReason>) {
    spawn_echo_listener_with_config(addr, ListenerConfig::default())
}

/// Same as [`spawn_echo_listener`] but with caller-supplied listener/connection
/// tunables (e.g. a tight `max_receive_fragments_per_packet`).
fn spawn_echo_listener_with_config(
    addr: SocketAddr,
    listener_config: ListenerConfig,
) -> (Listener, mpsc::Receiver<(u8, Vec<u8>)>, mpsc::Receiver<DisconnectReason>) {
    let listener = Listener::new();
    let (msg_tx, msg_rx) = mpsc::channel();
    let (disc_tx, disc_rx) = mpsc::channel();
    let pool = Config::default().with_pool_capacity(8).build_pool();

    listener
        .listen(
            addr,
            pool,
            listener_config,
            None::<fn(SocketAddr) -> bool>,
            move |conn| {
                let msg_tx = msg_tx.clone();
                let disc_tx = disc_tx.clone();
                thread::spawn(move || {
                    conn.read_loop(
                        move |mut msg| {
                            let mut payload = vec![0u8; msg.size() - wireproto_codec::HEADER_SIZE];
                            if !payload.is_empty() {
                                msg.read_bytes(&mut payload).unwrap();
                            }
                            let _ = msg_tx.send((msg.message_type(), payload));
                            FrameAction::Recycle(msg)
                        },
                        move |reason| {
                            let _ = disc_tx.send(reason);
                        },
                    )
                    .unwrap();
                });
            },
        )
        .expect("listen failed");

    // Give the accept thread a moment to bind before clients connect.
    thread::sleep(Duration::from_millis(20));
    (listener, msg_rx, disc_rx)
}

fn recv_timeout<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(Duration::from_secs(5)).expect("timed out waiting for message")
}

#[test]
fn minimal_round_trip() {
    let addr = free_addr();
    let (listener, msg_rx, _disc_rx) = spawn_echo_listener(addr);

    let pool = MessagePool::new(4);
    let client = Connection::connect(addr, pool, ConnectionConfig::default()).expect("connect");
    client.send_with(3, |msg| msg.write_string("Hello").unwrap()).expect("send");

    let (ty, payload) = recv_timeout(&msg_rx);
    assert_eq!(ty, 3);
    assert_eq!(payload, b"\x05\x00Hello");

    client.close();
    listener.stop();
}

#[test]
fn fragmented_delivery_byte_at_a_time() {
    let addr = free_addr();
    let (listener, msg_rx, _disc_rx) = spawn_echo_listener(addr);

    let mut raw = TcpStream::connect(addr).expect("raw connect");
    let wire = [0x0B, 0x00, 0x00, 0x03, 0x05, 0x00, b'H', b'e', b'l', b'l', b'o'];
    for b in wire {
        raw.write_all(&[b]).unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    let (ty, payload) = recv_timeout(&msg_rx);
    assert_eq!(ty, 3);
    assert_eq!(payload, &wire[4..]);

    drop(raw);
    listener.stop();
}

#[test]
fn coalesced_messages_delivered_in_order() {
    let addr = free_addr();
    let (listener, msg_rx, _disc_rx) = spawn_echo_listener(addr);

    let mut raw = TcpStream::connect(addr).expect("raw connect");
    let wire = [
        0x04, 0x00, 0x00, 0x00, // type 0, empty payload
        0x05, 0x00, 0x00, 0x01, 0x42, // type 1, payload [0x42]
        0x07, 0x00, 0x00, 0x02, 0x01, 0x02, 0x03, // type 2, payload [1,2,3]
    ];
    raw.write_all(&wire).unwrap();

    assert_eq!(recv_timeout(&msg_rx), (0, vec![]));
    assert_eq!(recv_timeout(&msg_rx), (1, vec![0x42]));
    assert_eq!(recv_timeout(&msg_rx), (2, vec![1, 2, 3]));

    drop(raw);
    listener.stop();
}

#[test]
fn large_message_round_trips() {
    let addr = free_addr();
    let (listener, msg_rx, _disc_rx) = spawn_echo_listener(addr);

    let pool = MessagePool::new(4);
    let client = Connection::connect(addr, pool, ConnectionConfig::default()).expect("connect");

    let big = vec![0xABu8; 2 * 1024 * 1024];
    let big_for_send = big.clone();
    client
        .send_with(9, move |msg| {
            msg.write_bytes(&big_for_send, 0, big_for_send.len()).unwrap();
        })
        .expect("send");

    let (ty, payload) = recv_timeout(&msg_rx);
    assert_eq!(ty, 9);
    assert_eq!(payload, big);

    client.close();
    listener.stop();
}

#[test]
fn over_length_header_triggers_protocol_disconnect() {
    let addr = free_addr();
    let (listener, _msg_rx, disc_rx) = spawn_echo_listener(addr);

    let mut raw = TcpStream::connect(addr).expect("raw connect");
    // Declared length far beyond max_packet_size.
    let header = [0xFF, 0xFF, 0xFF, 0x01];
    raw.write_all(&header).unwrap();

    let reason = recv_timeout(&disc_rx);
    assert!(matches!(reason, DisconnectReason::Protocol(_)));

    drop(raw);
    listener.stop();
}

#[test]
fn fragment_limit_exceeded_triggers_protocol_disconnect() {
    let addr = free_addr();
    let mut listener_config = ListenerConfig::default();
    listener_config.connection.config = listener_config.connection.config.with_max_receive_fragments_per_packet(2);
    let (listener, _msg_rx, disc_rx) = spawn_echo_listener_with_config(addr, listener_config);

    let mut raw = TcpStream::connect(addr).expect("raw connect");
    // The header alone needs 4 bytes; trickling them one at a time blows
    // past the 2-fragment limit before the header even completes.
    for b in [0x05u8, 0x00, 0x00] {
        raw.write_all(&[b]).unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    let reason = recv_timeout(&disc_rx);
    assert!(matches!(reason, DisconnectReason::Protocol(_)));

    drop(raw);
    listener.stop();
}

#[test]
fn peer_close_during_payload_delivers_completed_messages_only() {
    let addr = free_addr();
    let (listener, msg_rx, disc_rx) = spawn_echo_listener(addr);

    let mut raw = TcpStream::connect(addr).expect("raw connect");
    // Two complete messages (type 5 header-only, type 6 with payload 0x41)
    // plus one trailing byte that starts a third message's header before
    // the peer closes.
    let wire = [0x04, 0x00, 0x00, 0x05, 0x05, 0x00, 0x00, 0x06, 0x41, 0x42];
    raw.write_all(&wire).unwrap();

    assert_eq!(recv_timeout(&msg_rx), (5, vec![]));
    assert_eq!(recv_timeout(&msg_rx), (6, vec![0x41]));

    drop(raw);

    let reason = recv_timeout(&disc_rx);
    assert_eq!(reason, DisconnectReason::PeerClosed);
    assert!(msg_rx.recv_timeout(Duration::from_millis(200)).is_err(), "no third message should ever be delivered");

    listener.stop();
}

#[test]
fn local_close_is_not_reported_as_a_disconnect() {
    let addr = free_addr();
    let (listener, _msg_rx, disc_rx) = spawn_echo_listener(addr);

    let pool = MessagePool::new(4);
    let client = Connection::connect(addr, pool, ConnectionConfig::default()).expect("connect");
    client.send_with(1, |msg| msg.write_u8(7).unwrap()).expect("send");
    client.close();

    // The server side observed the peer's FIN (from the client's close),
    // which is indistinguishable on the wire from a graceful shutdown, so
    // it still reports PeerClosed — local suppression only applies to the
    // side that called close() itself.
    let reason = recv_timeout(&disc_rx);
    assert_eq!(reason, DisconnectReason::PeerClosed);

    listener.stop();
}
