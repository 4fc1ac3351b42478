//! WS client error types.

/// Errors produced by the WS client and wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// Hostname did not resolve to any usable address.
    #[error("failed to resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
    },

    /// Socket-level failure. Fatal for the current connection.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The server did not complete the opening handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// Frame payload exceeds the configured limit (either direction).
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        size: usize,
        max: usize,
    },

    /// A received frame header carried an opcode this client does not speak.
    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),

    /// The peer stalled in the middle of a frame. The stream position is
    /// unrecoverable, so the connection is torn down.
    #[error("timed out mid-frame with {remaining} bytes outstanding")]
    TruncatedFrame {
        remaining: usize,
    },
}
