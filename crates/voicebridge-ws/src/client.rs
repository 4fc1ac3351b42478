//! Blocking WS client owning a single TCP socket.
//!
//! One [`WsClient`] serves one remote speech session. All public operations
//! serialize on an internal mutex; the intended caller is a single
//! background worker, with the media path never touching the client
//! directly. Receive is poll-shaped: [`WsClient::receive_frame`] returns
//! `Ok(None)` when nothing arrived within the configured receive timeout,
//! so a worker can interleave socket polling with its queue without
//! dedicating a thread to reads.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::WsError;
use crate::frame::{self, Opcode};
use crate::handshake;

/// Grace multiplier on the receive timeout for reads in the middle of a
/// frame: the header already announced the bytes, so a stall here is a
/// broken peer, not idleness.
const MID_FRAME_TIMEOUT_FACTOR: u32 = 10;

/// Handshake responses larger than this are rejected outright.
const MAX_HANDSHAKE_RESPONSE: usize = 8192;

/// Close-frame reasons are truncated to fit the 125-byte control budget
/// alongside the 2-byte status code.
const MAX_CLOSE_REASON: usize = 123;

// ── Configuration ──────────────────────────────────────────────────

/// Connection parameters, copied into the client at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    pub host: String,
    pub port: u16,
    pub path: String,

    /// Budget for resolve + TCP connect + handshake.
    pub connect_timeout: Duration,

    /// Socket write budget per frame.
    pub send_timeout: Duration,

    /// Per-poll read budget. Kept short so the owning worker stays
    /// responsive between frames.
    pub recv_timeout: Duration,

    /// Extra connection attempts after the first failure.
    pub max_retries: u32,

    /// Pause between connection attempts.
    pub retry_delay: Duration,

    /// Upper bound on payload size, both directions.
    pub max_frame_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            path: "/".to_string(),
            connect_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            recv_timeout: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_frame_size: 1024 * 1024,
        }
    }
}

// ── Connection state ───────────────────────────────────────────────

/// Connection lifecycle state.
///
/// `Error` is terminal for the current socket; only a fresh
/// [`WsClient::connect`] (or drop) leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Connecting,
    Connected,
    /// The peer sent a close frame; no further traffic is expected.
    Closing,
    Error,
}

/// One received frame. The payload is owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub opcode: Opcode,
    pub fin: bool,
    pub payload: Vec<u8>,
}

struct Conn {
    stream: Option<TcpStream>,
    state: WsState,
    retry_count: u32,
    last_activity: Option<Instant>,
}

// ── Client ─────────────────────────────────────────────────────────

/// A WS client bound to one remote endpoint.
pub struct WsClient {
    config: WsConfig,
    conn: Mutex<Conn>,
}

impl WsClient {
    /// Create a disconnected client from a configuration snapshot.
    #[must_use]
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(Conn {
                stream: None,
                state: WsState::Disconnected,
                retry_count: 0,
                last_activity: None,
            }),
        }
    }

    /// The configuration this client was created with.
    #[must_use]
    pub const fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> WsState {
        self.lock().state
    }

    /// Whether the connection is established and usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == WsState::Connected
    }

    /// Connection attempts burned since the last successful connect.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Open the TCP connection and perform the upgrade handshake.
    /// Idempotent when already connected. Any failure tears the socket
    /// down and leaves the client in [`WsState::Error`].
    pub fn connect(&self) -> Result<(), WsError> {
        let mut conn = self.lock();
        if conn.state == WsState::Connected {
            return Ok(());
        }
        conn.state = WsState::Connecting;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            path = %self.config.path,
            "connecting"
        );

        match self.open_and_upgrade() {
            Ok(stream) => {
                conn.stream = Some(stream);
                conn.state = WsState::Connected;
                conn.retry_count = 0;
                conn.last_activity = Some(Instant::now());
                tracing::info!(host = %self.config.host, port = self.config.port, "connected");
                Ok(())
            }
            Err(e) => {
                conn.stream = None;
                conn.state = WsState::Error;
                tracing::error!(
                    host = %self.config.host,
                    port = self.config.port,
                    error = %e,
                    "connect failed"
                );
                Err(e)
            }
        }
    }

    /// [`connect`](Self::connect) with up to `max_retries` additional
    /// attempts, `retry_delay` apart.
    pub fn connect_with_retry(&self) -> Result<(), WsError> {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match self.connect() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.lock().retry_count = attempt + 1;
                    if attempt < self.config.max_retries {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max = self.config.max_retries,
                            "connection failed, retrying"
                        );
                        thread::sleep(self.config.retry_delay);
                    }
                    last_err = Some(e);
                }
            }
        }
        tracing::error!("all connection retries exhausted");
        Err(last_err.unwrap_or(WsError::NotConnected))
    }

    /// No-op when connected, otherwise [`connect_with_retry`](Self::connect_with_retry).
    pub fn ensure_connected(&self) -> Result<(), WsError> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect_with_retry()
    }

    /// Close the socket, optionally sending a close frame first.
    pub fn disconnect(&self, send_close: bool) {
        let mut conn = self.lock();
        if send_close && conn.state == WsState::Connected {
            // Best effort; the socket is going away either way.
            let _ = self.write_frame(&mut conn, Opcode::Close, &[]);
        }
        if let Some(stream) = conn.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        conn.state = WsState::Disconnected;
        tracing::info!(host = %self.config.host, port = self.config.port, "disconnected");
    }

    // ── Sending ────────────────────────────────────────────────────

    /// Send a masked text frame.
    pub fn send_text(&self, text: &str) -> Result<(), WsError> {
        let mut conn = self.lock();
        self.write_frame(&mut conn, Opcode::Text, text.as_bytes())
    }

    /// Send a masked binary frame.
    pub fn send_binary(&self, data: &[u8]) -> Result<(), WsError> {
        let mut conn = self.lock();
        self.write_frame(&mut conn, Opcode::Binary, data)
    }

    /// Send a zero-length ping.
    pub fn send_ping(&self) -> Result<(), WsError> {
        let mut conn = self.lock();
        self.write_frame(&mut conn, Opcode::Ping, &[])
    }

    /// Send a close frame. A zero `code` sends an empty payload; otherwise
    /// the payload is the big-endian code followed by up to 123 bytes of
    /// `reason`.
    pub fn send_close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        let payload = close_payload(code, reason);
        let mut conn = self.lock();
        self.write_frame(&mut conn, Opcode::Close, &payload)
    }

    // ── Receiving ──────────────────────────────────────────────────

    /// Socket-level readiness probe. Does not consume any bytes.
    pub fn poll(&self, timeout: Duration) -> bool {
        let conn = self.lock();
        if conn.state != WsState::Connected {
            return false;
        }
        let Some(stream) = conn.stream.as_ref() else {
            return false;
        };
        // A zero read timeout would mean "block forever"; clamp it.
        let wait = timeout.max(Duration::from_micros(1));
        if stream.set_read_timeout(Some(wait)).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let readable = stream.peek(&mut probe).is_ok();
        let _ = stream.set_read_timeout(Some(self.config.recv_timeout));
        readable
    }

    /// Read one frame if the peer has sent one.
    ///
    /// Returns `Ok(None)` when no header byte arrived within the receive
    /// timeout — that is ordinary idleness. A stall once a frame has
    /// started, an oversized announcement, or any socket error is fatal:
    /// the client transitions to [`WsState::Error`] and the error is
    /// returned.
    ///
    /// Pings are answered with a masked pong carrying the same payload and
    /// are still surfaced to the caller. A close frame moves the client to
    /// [`WsState::Closing`].
    pub fn receive_frame(&self) -> Result<Option<WsFrame>, WsError> {
        let mut conn = self.lock();
        if conn.state != WsState::Connected {
            return Err(WsError::NotConnected);
        }
        let stream = conn.stream.as_mut().ok_or(WsError::NotConnected)?;

        match Self::read_frame(stream, &self.config) {
            Ok(None) => Ok(None),
            Ok(Some(received)) => {
                conn.last_activity = Some(Instant::now());
                match received.opcode {
                    Opcode::Close => {
                        tracing::info!("close frame received");
                        conn.state = WsState::Closing;
                    }
                    Opcode::Ping => {
                        tracing::debug!(bytes = received.payload.len(), "ping, replying pong");
                        if let Err(e) = self.write_frame(&mut conn, Opcode::Pong, &received.payload)
                        {
                            tracing::warn!(error = %e, "failed to send pong");
                        }
                    }
                    _ => {}
                }
                Ok(Some(received))
            }
            Err(e) => {
                conn.stream = None;
                conn.state = WsState::Error;
                tracing::error!(error = %e, "receive failed");
                Err(e)
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Conn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve, connect, upgrade. Returns the ready stream with its read
    /// timeout set for frame polling.
    fn open_and_upgrade(&self) -> Result<TcpStream, WsError> {
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| WsError::Resolve {
                host: self.config.host.clone(),
                port: self.config.port,
            })?;

        let mut stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.config.send_timeout))?;
        stream.set_read_timeout(Some(self.config.connect_timeout))?;

        let key = handshake::generate_key();
        let request =
            handshake::build_request(&self.config.host, self.config.port, &self.config.path, &key);
        stream.write_all(request.as_bytes())?;

        let response = read_handshake_response(&mut stream)?;
        handshake::validate_response(&response, &key)?;

        stream.set_read_timeout(Some(self.config.recv_timeout))?;
        Ok(stream)
    }

    /// Mask and write one frame. Any socket failure poisons the connection.
    fn write_frame(&self, conn: &mut Conn, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        if conn.state != WsState::Connected {
            return Err(WsError::NotConnected);
        }
        if payload.len() > self.config.max_frame_size {
            return Err(WsError::FrameTooLarge {
                size: payload.len(),
                max: self.config.max_frame_size,
            });
        }
        let stream = conn.stream.as_mut().ok_or(WsError::NotConnected)?;

        let mask = frame::random_mask();
        let header = frame::encode_frame_header(opcode, payload.len(), mask);

        let result = (|| -> std::io::Result<()> {
            stream.write_all(&header)?;
            if !payload.is_empty() {
                let mut masked = payload.to_vec();
                frame::apply_mask(&mut masked, mask);
                stream.write_all(&masked)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.last_activity = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                conn.stream = None;
                conn.state = WsState::Error;
                tracing::error!(error = %e, "send failed");
                Err(e.into())
            }
        }
    }

    /// Read one complete frame off the wire, or `None` when the initial
    /// header read times out.
    fn read_frame(stream: &mut TcpStream, config: &WsConfig) -> Result<Option<WsFrame>, WsError> {
        let grace = config.recv_timeout * MID_FRAME_TIMEOUT_FACTOR;

        let mut header = [0u8; 2];
        let got = match stream.read(&mut header) {
            Ok(0) => {
                return Err(WsError::Io(ErrorKind::UnexpectedEof.into()));
            }
            Ok(n) => n,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if got < 2 {
            // Header started; the rest must follow promptly.
            read_exact_deadline(stream, &mut header[got..], grace)?;
        }

        let prefix = frame::parse_header_prefix(header[0], header[1])?;

        let ext_n = frame::extended_len_bytes(prefix.len7);
        let mut ext = [0u8; 8];
        if ext_n > 0 {
            read_exact_deadline(stream, &mut ext[..ext_n], grace)?;
        }
        let announced = frame::decode_payload_len(prefix.len7, &ext[..ext_n]);
        if announced > config.max_frame_size as u64 {
            return Err(WsError::FrameTooLarge {
                size: usize::try_from(announced).unwrap_or(usize::MAX),
                max: config.max_frame_size,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let payload_len = announced as usize;

        // Servers should not mask, but the parser tolerates it.
        let mut mask = [0u8; 4];
        if prefix.masked {
            read_exact_deadline(stream, &mut mask, grace)?;
        }

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            read_exact_deadline(stream, &mut payload, grace)?;
            if prefix.masked {
                frame::apply_mask(&mut payload, mask);
            }
        }

        Ok(Some(WsFrame {
            opcode: prefix.opcode,
            fin: prefix.fin,
            payload,
        }))
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.disconnect(true);
    }
}

// ── Free helpers ───────────────────────────────────────────────────

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Read exactly `buf.len()` bytes, riding out per-read timeouts until
/// `grace` has elapsed.
fn read_exact_deadline(
    stream: &mut TcpStream,
    buf: &mut [u8],
    grace: Duration,
) -> Result<(), WsError> {
    let deadline = Instant::now() + grace;
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(WsError::Io(ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => {
                if Instant::now() >= deadline {
                    return Err(WsError::TruncatedFrame {
                        remaining: buf.len() - filled,
                    });
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Collect the HTTP upgrade response up to and including the blank line.
fn read_handshake_response(stream: &mut TcpStream) -> Result<String, WsError> {
    let mut response = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(WsError::Handshake(
                "connection closed before handshake response".to_string(),
            ));
        }
        response.extend_from_slice(&chunk[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_HANDSHAKE_RESPONSE {
            return Err(WsError::Handshake(
                "oversized handshake response".to_string(),
            ));
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    if code == 0 {
        return Vec::new();
    }
    let mut payload = Vec::with_capacity(2 + reason.len().min(MAX_CLOSE_REASON));
    payload.extend_from_slice(&code.to_be_bytes());
    let mut cut = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }
    payload.extend_from_slice(&reason.as_bytes()[..cut]);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_is_disconnected() {
        let client = WsClient::new(WsConfig::default());
        assert_eq!(client.state(), WsState::Disconnected);
        assert!(!client.is_connected());
    }

    #[test]
    fn sends_require_a_connection() {
        let client = WsClient::new(WsConfig::default());
        assert!(matches!(
            client.send_text("hi"),
            Err(WsError::NotConnected)
        ));
        assert!(matches!(client.send_ping(), Err(WsError::NotConnected)));
    }

    #[test]
    fn close_payload_layout() {
        assert!(close_payload(0, "ignored").is_empty());

        let payload = close_payload(1000, "bye");
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&payload[2..], b"bye");
    }

    #[test]
    fn close_reason_is_truncated_to_fit_a_control_frame() {
        let reason = "x".repeat(500);
        let payload = close_payload(1001, &reason);
        assert_eq!(payload.len(), 2 + MAX_CLOSE_REASON);
    }

    #[test]
    fn close_reason_truncation_respects_utf8_boundaries() {
        let reason = "é".repeat(100); // 200 bytes
        let payload = close_payload(1000, &reason);
        assert!(payload.len() <= 2 + MAX_CLOSE_REASON);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }
}
