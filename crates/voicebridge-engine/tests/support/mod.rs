//! In-process mock WS server for engine integration tests.
//!
//! Accepts a fixed number of connections, performs the server side of the
//! upgrade, then hands each connection to the test's script. Frame
//! encode/decode reuses the `voicebridge-ws` codec — the client under test
//! and this mock share the pure functions but none of the socket code.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use voicebridge_ws::frame::{self, Opcode};
use voicebridge_ws::handshake;

/// One upgraded server-side connection.
pub struct ServerConn {
    stream: TcpStream,
    /// The raw upgrade request, for header assertions.
    #[allow(dead_code)]
    pub request: String,
}

impl ServerConn {
    /// Read one client frame, unmasking the payload.
    pub fn read_frame(&mut self) -> (Opcode, Vec<u8>) {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).unwrap();
        let prefix = frame::parse_header_prefix(header[0], header[1]).unwrap();
        assert!(prefix.masked, "client frames must be masked");

        let ext_n = frame::extended_len_bytes(prefix.len7);
        let mut ext = [0u8; 8];
        if ext_n > 0 {
            self.stream.read_exact(&mut ext[..ext_n]).unwrap();
        }
        let len = usize::try_from(frame::decode_payload_len(prefix.len7, &ext[..ext_n])).unwrap();

        let mut mask = [0u8; 4];
        self.stream.read_exact(&mut mask).unwrap();
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).unwrap();
        frame::apply_mask(&mut payload, mask);
        (prefix.opcode, payload)
    }

    pub fn send_binary(&mut self, data: &[u8]) {
        self.send_frame(0x82, data);
    }

    pub fn send_text(&mut self, text: &str) {
        self.send_frame(0x81, text.as_bytes());
    }

    #[allow(dead_code)]
    pub fn send_close(&mut self) {
        self.send_frame(0x88, &[]);
    }

    /// Server frames are unmasked.
    fn send_frame(&mut self, first_byte: u8, payload: &[u8]) {
        let mut wire = vec![first_byte];
        if payload.len() < 126 {
            #[allow(clippy::cast_possible_truncation)]
            wire.push(payload.len() as u8);
        } else if payload.len() < 65_536 {
            wire.push(126);
            #[allow(clippy::cast_possible_truncation)]
            wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            wire.push(127);
            wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        wire.extend_from_slice(payload);
        self.stream.write_all(&wire).unwrap();
    }
}

/// Listener plus the thread scripting its connections.
pub struct MockServer {
    pub port: u16,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    /// Serve exactly `connections` upgrades, calling `script` with each
    /// connection's index. Panics inside the script surface on `join`.
    pub fn start(
        connections: usize,
        mut script: impl FnMut(usize, &mut ServerConn) + Send + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for index in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(10)))
                    .unwrap();
                let mut conn = upgrade(stream);
                script(index, &mut conn);
            }
        });
        Self {
            port,
            handle: Some(handle),
        }
    }

    /// Wait for the script to finish all connections.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

/// Server side of the opening handshake.
fn upgrade(mut stream: TcpStream) -> ServerConn {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "client hung up during handshake");
        request.push(byte[0]);
    }
    let request = String::from_utf8(request).unwrap();

    let key = request
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .expect("upgrade request must carry a key");

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        handshake::accept_key(key)
    );
    stream.write_all(response.as_bytes()).unwrap();

    ServerConn { stream, request }
}
