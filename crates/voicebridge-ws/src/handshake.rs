//! Opening handshake: HTTP/1.1 upgrade request and response validation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use crate::error::WsError;

/// RFC 6455 §1.3 magic string mixed into the accept-key digest.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// The `Sec-WebSocket-Accept` value the server must derive from `key`.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Assemble the upgrade request for `path` on `host:port`.
#[must_use]
pub fn build_request(host: &str, port: u16, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Validate the handshake response against the key we sent.
///
/// The status line must carry `101`. When the server echoes a
/// `Sec-WebSocket-Accept` header it must match the RFC 6455 digest of our
/// key; servers that omit the header entirely are tolerated, since the
/// speech services this bridge talks to do not all send it.
pub fn validate_response(response: &str, key: &str) -> Result<(), WsError> {
    let status_line = response.lines().next().unwrap_or("");
    if !status_line.contains("101") {
        return Err(WsError::Handshake(format!(
            "expected 101 Switching Protocols, got: {status_line}"
        )));
    }

    if let Some(sent) = header_value(response, "Sec-WebSocket-Accept") {
        let expected = accept_key(key);
        if sent != expected {
            return Err(WsError::Handshake(format!(
                "Sec-WebSocket-Accept mismatch: got {sent}, expected {expected}"
            )));
        }
    } else {
        tracing::debug!("server omitted Sec-WebSocket-Accept; accepting 101 as-is");
    }

    Ok(())
}

/// Case-insensitive header lookup in a raw HTTP response.
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().skip(1).find_map(|line| {
        let (header, value) = line.split_once(':')?;
        header
            .trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}
