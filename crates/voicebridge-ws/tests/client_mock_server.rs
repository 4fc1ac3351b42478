//! WS client tests against an in-process TCP mock.
//!
//! Each test stands up a real `TcpListener` on a loopback port, scripts the
//! server side by hand (raw bytes — the point is to pin the wire format),
//! and drives a `WsClient` against it.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use voicebridge_ws::frame::{self, Opcode};
use voicebridge_ws::{WsClient, WsConfig, WsError, WsState};

// ── Mock server plumbing ───────────────────────────────────────────

/// Bind a listener on an ephemeral port and run `serve` on the first
/// accepted connection. Returns the port and the server thread handle.
fn spawn_server<T: Send + 'static>(
    serve: impl FnOnce(TcpStream) -> T + Send + 'static,
) -> (u16, thread::JoinHandle<T>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        serve(stream)
    });
    (port, handle)
}

fn test_config(port: u16) -> WsConfig {
    WsConfig {
        host: "127.0.0.1".to_string(),
        port,
        path: "/asr".to_string(),
        connect_timeout: Duration::from_secs(5),
        recv_timeout: Duration::from_millis(50),
        retry_delay: Duration::from_millis(20),
        ..WsConfig::default()
    }
}

/// Read the HTTP upgrade request up to the blank line.
fn read_upgrade_request(stream: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "client hung up during handshake");
        request.push(byte[0]);
    }
    String::from_utf8(request).unwrap()
}

fn accept_upgrade(stream: &mut TcpStream) -> String {
    let request = read_upgrade_request(stream);
    stream
        .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
        .unwrap();
    request
}

/// Read one masked client frame; returns (first header byte, unmasked payload).
/// Only handles the short length encoding — all control traffic in these
/// tests fits in it.
fn read_client_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(header[1] & 0x80, 0x80, "client frames must be masked");
    let len = usize::from(header[1] & 0x7F);
    assert!(len < 126, "test helper only reads short frames");

    let mut mask = [0u8; 4];
    stream.read_exact(&mut mask).unwrap();
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    frame::apply_mask(&mut payload, mask);
    (header[0], payload)
}

// ── S1: handshake round-trip ───────────────────────────────────────

#[test]
fn handshake_round_trip() {
    let (port, server) = spawn_server(|mut stream| accept_upgrade(&mut stream));

    let client = WsClient::new(test_config(port));
    client.connect().expect("connect should succeed");
    assert_eq!(client.state(), WsState::Connected);

    let request = server.join().unwrap();
    let expected_prefix = format!("GET /asr HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n");
    assert!(
        request.starts_with(&expected_prefix),
        "unexpected request start: {request:?}"
    );
    assert!(request.contains("Upgrade: websocket\r\n"));
    assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
}

#[test]
fn connect_is_idempotent_when_connected() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        // Hold the socket open while the client re-connects.
        thread::sleep(Duration::from_millis(100));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();
    client.connect().unwrap();
    assert_eq!(client.state(), WsState::Connected);
    server.join().unwrap();
}

#[test]
fn non_101_response_fails_the_handshake() {
    let (port, server) = spawn_server(|mut stream| {
        read_upgrade_request(&mut stream);
        stream
            .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
            .unwrap();
    });

    let client = WsClient::new(test_config(port));
    let err = client.connect().unwrap_err();
    assert!(matches!(err, WsError::Handshake(_)), "got {err:?}");
    assert_eq!(client.state(), WsState::Error);
    server.join().unwrap();
}

// ── S2: text frame round-trip ──────────────────────────────────────

#[test]
fn text_frame_round_trip() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);

        // Expect the client's masked "hi" on the wire.
        let mut wire = [0u8; 8];
        stream.read_exact(&mut wire).unwrap();
        assert_eq!(wire[0], 0x81, "FIN + text opcode");
        assert_eq!(wire[1], 0x82, "mask bit + length 2");
        let mask = [wire[2], wire[3], wire[4], wire[5]];
        assert_eq!(wire[6], b'h' ^ mask[0]);
        assert_eq!(wire[7], b'i' ^ mask[1]);

        // Reply with an unmasked "hello".
        stream
            .write_all(&[0x81, 0x05, 0x68, 0x65, 0x6C, 0x6C, 0x6F])
            .unwrap();
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();
    client.send_text("hi").unwrap();

    let received = wait_for_frame(&client);
    assert_eq!(received.opcode, Opcode::Text);
    assert!(received.fin);
    assert_eq!(received.payload, b"hello");
    server.join().unwrap();
}

// ── S3: ping auto-reply ────────────────────────────────────────────

#[test]
fn ping_is_answered_with_a_masked_pong() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);

        stream
            .write_all(&[0x89, 0x04, b'p', b'i', b'n', b'g'])
            .unwrap();

        let (first_byte, payload) = read_client_frame(&mut stream);
        assert_eq!(first_byte, 0x8A, "FIN + pong opcode");
        assert_eq!(payload, b"ping");
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    // The ping itself is surfaced to the caller.
    let received = wait_for_frame(&client);
    assert_eq!(received.opcode, Opcode::Ping);
    assert_eq!(received.payload, b"ping");
    assert_eq!(client.state(), WsState::Connected);
    server.join().unwrap();
}

// ── Receive edge cases ─────────────────────────────────────────────

#[test]
fn quiet_socket_returns_no_frame() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        thread::sleep(Duration::from_millis(200));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    let received = client.receive_frame().unwrap();
    assert!(received.is_none());
    assert_eq!(client.state(), WsState::Connected, "idleness is not an error");
    server.join().unwrap();
}

#[test]
fn extended_length_frame_is_reassembled() {
    let payload: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let (port, server) = spawn_server(move |mut stream| {
        accept_upgrade(&mut stream);
        let mut wire = vec![0x82, 126];
        wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        wire.extend_from_slice(&payload);
        stream.write_all(&wire).unwrap();
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    let received = wait_for_frame(&client);
    assert_eq!(received.opcode, Opcode::Binary);
    assert_eq!(received.payload, expected);
    server.join().unwrap();
}

#[test]
fn oversized_frame_poisons_the_connection() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        // Announce a 2 MiB payload against a 1 MiB limit.
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(2u64 * 1024 * 1024).to_be_bytes());
        stream.write_all(&wire).unwrap();
        thread::sleep(Duration::from_millis(50));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    let err = loop {
        match client.receive_frame() {
            Ok(None) => {}
            Ok(Some(f)) => panic!("expected an error, got {f:?}"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, WsError::FrameTooLarge { .. }), "got {err:?}");
    assert_eq!(client.state(), WsState::Error);
    assert!(matches!(
        client.send_text("nope"),
        Err(WsError::NotConnected)
    ));
    server.join().unwrap();
}

#[test]
fn close_frame_moves_the_client_to_closing() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        stream.write_all(&[0x88, 0x00]).unwrap();
        thread::sleep(Duration::from_millis(50));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    let received = wait_for_frame(&client);
    assert_eq!(received.opcode, Opcode::Close);
    assert_eq!(client.state(), WsState::Closing);
    server.join().unwrap();
}

#[test]
fn peer_hangup_mid_stream_is_a_transport_error() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        stream.write_all(&[0x81, 0x05, b'p', b'a']).unwrap();
        // Drop the socket with three payload bytes outstanding.
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();
    server.join().unwrap();

    let err = loop {
        match client.receive_frame() {
            Ok(None) => {}
            Ok(Some(f)) => panic!("expected an error, got {f:?}"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, WsError::Io(_)), "got {err:?}");
    assert_eq!(client.state(), WsState::Error);
}

// ── Sending edge cases ─────────────────────────────────────────────

#[test]
fn oversized_send_is_rejected_without_touching_the_socket() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        thread::sleep(Duration::from_millis(50));
    });

    let mut config = test_config(port);
    config.max_frame_size = 16;
    let client = WsClient::new(config);
    client.connect().unwrap();

    let err = client.send_binary(&[0u8; 17]).unwrap_err();
    assert!(matches!(err, WsError::FrameTooLarge { size: 17, max: 16 }));
    // An over-limit payload is the caller's bug, not the socket's.
    assert_eq!(client.state(), WsState::Connected);
    server.join().unwrap();
}

#[test]
fn close_frame_carries_code_and_reason() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        let (first_byte, payload) = read_client_frame(&mut stream);
        assert_eq!(first_byte, 0x88);
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&payload[2..], b"done");
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();
    client.send_close(1000, "done").unwrap();
    server.join().unwrap();
}

// ── Reconnection ───────────────────────────────────────────────────

#[test]
fn retries_are_exhausted_when_nobody_listens() {
    // Bind and immediately drop to get a port with no listener.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = test_config(port);
    config.connect_timeout = Duration::from_millis(200);
    config.max_retries = 2;
    let client = WsClient::new(config);

    assert!(client.connect_with_retry().is_err());
    assert_eq!(client.state(), WsState::Error);
    assert_eq!(client.retry_count(), 3, "initial attempt plus two retries");
}

#[test]
fn ensure_connected_reconnects_after_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        // First connection: handshake then immediate hangup.
        let (mut stream, _) = listener.accept().unwrap();
        accept_upgrade(&mut stream);
        drop(stream);

        // Second connection: stay up.
        let (mut stream, _) = listener.accept().unwrap();
        accept_upgrade(&mut stream);
        thread::sleep(Duration::from_millis(100));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    // Drive the client into the error state via the dead socket.
    let err = loop {
        match client.receive_frame() {
            Ok(None) => {}
            Ok(Some(_)) => {}
            Err(e) => break e,
        }
    };
    assert!(matches!(err, WsError::Io(_)));
    assert_eq!(client.state(), WsState::Error);

    client.ensure_connected().expect("reconnect should succeed");
    assert_eq!(client.state(), WsState::Connected);
    server.join().unwrap();
}

// ── Polling ────────────────────────────────────────────────────────

#[test]
fn poll_reports_pending_data_without_consuming_it() {
    let (port, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        stream.write_all(&[0x81, 0x02, b'o', b'k']).unwrap();
        thread::sleep(Duration::from_millis(100));
    });

    let client = WsClient::new(test_config(port));
    client.connect().unwrap();

    // Wait until the frame is in the socket buffer.
    let mut readable = false;
    for _ in 0..100 {
        if client.poll(Duration::from_millis(10)) {
            readable = true;
            break;
        }
    }
    assert!(readable, "poll never saw the pending frame");

    // The data is still there for receive_frame.
    let received = wait_for_frame(&client);
    assert_eq!(received.payload, b"ok");
    server.join().unwrap();
}

// ── Helpers ────────────────────────────────────────────────────────

/// Poll `receive_frame` until a frame shows up (bounded by ~5 s).
fn wait_for_frame(client: &WsClient) -> voicebridge_ws::WsFrame {
    for _ in 0..100 {
        if let Some(received) = client.receive_frame().expect("receive failed") {
            return received;
        }
    }
    panic!("no frame within the polling budget");
}
