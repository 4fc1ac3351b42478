//! A from-scratch RFC 6455 client over blocking TCP.
//!
//! This crate exists because the speech services the voicebridge engines
//! talk to sit behind a plain-TCP WS endpoint and the bridge needs precise
//! control over polling cadence and timeouts — every receive doubles as a
//! scheduling tick for the engine worker. The surface is deliberately
//! small: client role only, no extensions, no permessage-deflate, no TLS.
//!
//! Layering:
//!
//! - [`frame`] — pure header/masking codec
//! - [`handshake`] — HTTP upgrade request/response handling
//! - [`client`] — the stateful socket owner
//! - [`json`] — string escaping for hand-assembled request bodies

pub mod client;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod json;

// Re-export key types for convenience
pub use client::{WsClient, WsConfig, WsFrame, WsState};
pub use error::WsError;
pub use frame::Opcode;
