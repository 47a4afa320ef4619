//! End-to-end scenarios driving `Engine` against real loopback sockets.

mod util;

use std::time::Duration;

use mio::Token;
use netcore::{AcceptOutcome, Engine, FrameEvent, SocketConfig, SocketFlags, State};

fn listening_engine() -> (Engine, Token, u16) {
    let mut engine = Engine::new().expect("poll");
    let token = engine
        .listen(util::any_local_address(), SocketFlags::server(), SocketConfig::default())
        .expect("listen");
    let port = engine.server(token).unwrap().local_addr().unwrap().port();
    (engine, token, port)
}

#[test]
fn plain_text_echo_round_trip() {
    util::init();
    let (mut engine, server_token, port) = listening_engine();
    let client_token =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect");

    // Drive the accept + connect-completion handshake to `Connected` on both ends.
    let client_up = util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.client(client_token).map(|c| c.state() == State::Connected).unwrap_or(false)
    });
    assert!(client_up, "client never reached Connected");

    let server_got_client = util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.server(server_token).map(|s| s.total_clients() > 0).unwrap_or(false)
    });
    assert!(server_got_client, "server never recorded an accepted client");

    let accepted_token = engine.server(server_token).unwrap().clients()[0].connections[0];

    engine.client_mut(client_token).unwrap().write(b"hello").unwrap();

    let got = util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.client_mut(accepted_token).map(|c| {
            let mut buf = [0u8; 5];
            matches!(c.read(&mut buf), Ok(5)) && &buf == b"hello"
        }).unwrap_or(false)
    });
    assert!(got, "server side never observed the written bytes");
}

#[test]
fn framed_message_exchange() {
    util::init();
    let (mut engine, server_token, port) = listening_engine();
    let client_token =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect");

    util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.client(client_token).map(|c| c.state() == State::Connected).unwrap_or(false)
    });
    util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.server(server_token).map(|s| s.total_clients() > 0).unwrap_or(false)
    });
    let accepted_token = engine.server(server_token).unwrap().clients()[0].connections[0];

    engine.client_mut(client_token).unwrap().write_msg(b"Hello").unwrap();

    let mut received = None;
    util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        match e.client_mut(accepted_token).unwrap().read_msg() {
            Ok(FrameEvent::Complete { payload, declared_crc }) => {
                received = Some((payload, declared_crc));
                true
            }
            _ => false,
        }
    });

    let (payload, crc) = received.expect("framed message never completed");
    assert_eq!(payload, b"Hello");
    assert_eq!(crc, netcore::crc32(b"Hello"));
}

#[test]
fn oversize_payload_is_rejected_before_it_reaches_the_wire() {
    let limit = 16u32;
    let too_big = vec![0u8; limit as usize + 1];
    assert!(matches!(netcore::encode(&too_big, limit), Err(netcore::NetError::OutOfRange)));
}

#[test]
fn duplicate_client_connection_is_rejected_without_multi_connect() {
    util::init();
    let mut engine = Engine::new().expect("poll");
    let server_token = engine
        .listen(util::any_local_address(), SocketFlags::server(), SocketConfig::default().with_client_limit(8))
        .expect("listen");
    let port = engine.server(server_token).unwrap().local_addr().unwrap().port();

    let _first =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect 1");
    util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.server(server_token).map(|s| s.total_clients() == 1).unwrap_or(false)
    });

    // A second connection from the same loopback address, with MULTI_CONNECT
    // off, must not grow the client graph past one record.
    let _second =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect 2");
    util::wait_until(&mut engine, Duration::from_secs(1), |_| false);

    assert_eq!(engine.server(server_token).unwrap().total_clients(), 1);
    assert_eq!(engine.server(server_token).unwrap().clients()[0].total_connections(), 1);
}

#[test]
fn accept_one_reports_client_limit_without_fabricating_a_socket() {
    util::init();
    let mut engine = Engine::new().expect("poll");
    let server_token = engine
        .listen(util::any_local_address(), SocketFlags::server(), SocketConfig::default().with_client_limit(0))
        .expect("listen");
    let port = engine.server(server_token).unwrap().local_addr().unwrap().port();

    let _client =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect");

    let rejected = util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        // With client_limit 0, accept_one must reject without ever
        // constructing a ClientSocket; total_clients stays at zero.
        e.server(server_token).map(|s| s.total_clients()).unwrap_or(1) == 0
    });
    assert!(rejected);
    assert_eq!(engine.server(server_token).unwrap().total_clients(), 0);
}

#[test]
fn orderly_disconnect_unlinks_the_client_record() {
    util::init();
    let (mut engine, server_token, port) = listening_engine();
    let _client_token =
        engine.connect("127.0.0.1", port, SocketFlags::empty(), SocketConfig::default()).expect("connect");

    util::wait_until(&mut engine, Duration::from_secs(2), |e| {
        e.server(server_token).map(|s| s.total_clients() > 0).unwrap_or(false)
    });
    let accepted_token = engine.server(server_token).unwrap().clients()[0].connections[0];

    engine.client_mut(accepted_token).unwrap().disconnect();
    engine.remove(accepted_token);

    assert_eq!(engine.server(server_token).unwrap().total_clients(), 0);
    assert!(engine.server(server_token).unwrap().clients().is_empty());
    let _ = AcceptOutcome::ClientLimitReached; // exercise the public re-export
}
