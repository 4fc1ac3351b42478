//! Engine configuration resolved from the host's parameter map.
//!
//! The host hands each engine a flat string map (`ws-host`, `ws-port`, …).
//! Resolution is forgiving: unknown keys are ignored and unparseable values
//! fall back to their defaults with a warning — a bad deployment parameter
//! must never take the whole media server down.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voicebridge_ws::WsConfig;

/// Parameter map shape supplied by the host.
pub type ParamMap = HashMap<String, String>;

// ── Shared defaults ────────────────────────────────────────────────

pub const DEFAULT_WS_HOST: &str = "localhost";
pub const DEFAULT_WS_PORT: u16 = 8080;

/// Recognizer audio buffer: ~16 s at 8 kHz s16le.
pub const RECOG_BUFFER_SIZE: usize = 512 * 1024;

/// Streaming chunk: 200 ms at 8 kHz s16le.
pub const STREAM_CHUNK_SIZE: usize = 3200;

/// Recognizer worker poll tick.
pub const RECOG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Total budget for one recognize request.
pub const MAX_RECOGNIZE_DURATION: Duration = Duration::from_secs(60);

/// Synthesizer audio buffer default (~2 MiB of PCM).
pub const SYNTH_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Hard ceiling on the configurable synthesizer buffer.
pub const SYNTH_BUFFER_CEILING: usize = 50 * 1024 * 1024;

/// Total budget for one speak request.
pub const MAX_SPEAK_DURATION: Duration = Duration::from_secs(300);

/// Receive polls with no frame before the synthesizer gives up
/// (≈50 s at the default 100 ms receive timeout).
pub const MAX_IDLE_POLLS: u32 = 500;

// ── Recognizer ─────────────────────────────────────────────────────

/// Resolved recognizer engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub ws: WsConfig,

    /// Stream chunks while the utterance is still in progress instead of
    /// shipping one buffered blob at the end.
    pub streaming: bool,

    pub buffer_size: usize,
    pub stream_chunk_size: usize,
    pub max_duration: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            ws: WsConfig {
                host: DEFAULT_WS_HOST.to_string(),
                port: DEFAULT_WS_PORT,
                path: "/asr".to_string(),
                recv_timeout: RECOG_POLL_INTERVAL,
                ..WsConfig::default()
            },
            streaming: false,
            buffer_size: RECOG_BUFFER_SIZE,
            stream_chunk_size: STREAM_CHUNK_SIZE,
            max_duration: MAX_RECOGNIZE_DURATION,
        }
    }
}

impl RecognizerConfig {
    /// Resolve from host engine parameters.
    #[must_use]
    pub fn from_params(params: &ParamMap) -> Self {
        let mut config = Self::default();
        apply_ws_params(&mut config.ws, params);
        if let Some(streaming) = params.get("streaming") {
            config.streaming = streaming.eq_ignore_ascii_case("true");
        }
        tracing::info!(
            host = %config.ws.host,
            port = config.ws.port,
            path = %config.ws.path,
            streaming = config.streaming,
            "recognizer configuration resolved"
        );
        config
    }
}

// ── Synthesizer ────────────────────────────────────────────────────

/// Resolved synthesizer engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    pub ws: WsConfig,

    /// Capacity of the received-audio buffer.
    pub buffer_size: usize,

    pub max_duration: Duration,
    pub max_idle_polls: u32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            ws: WsConfig {
                host: DEFAULT_WS_HOST.to_string(),
                port: DEFAULT_WS_PORT,
                path: "/tts".to_string(),
                ..WsConfig::default()
            },
            buffer_size: SYNTH_BUFFER_SIZE,
            max_duration: MAX_SPEAK_DURATION,
            max_idle_polls: MAX_IDLE_POLLS,
        }
    }
}

impl SynthesizerConfig {
    /// Resolve from host engine parameters.
    #[must_use]
    pub fn from_params(params: &ParamMap) -> Self {
        let mut config = Self::default();
        apply_ws_params(&mut config.ws, params);
        if let Some(raw) = params.get("max-audio-size") {
            match raw.parse::<usize>() {
                Ok(size) => config.buffer_size = size.min(SYNTH_BUFFER_CEILING),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparseable max-audio-size");
                }
            }
        }
        tracing::info!(
            host = %config.ws.host,
            port = config.ws.port,
            path = %config.ws.path,
            buffer = config.buffer_size,
            "synthesizer configuration resolved"
        );
        config
    }
}

// ── Shared parameter handling ──────────────────────────────────────

fn apply_ws_params(ws: &mut WsConfig, params: &ParamMap) {
    if let Some(host) = params.get("ws-host") {
        ws.host.clone_from(host);
    }
    if let Some(raw) = params.get("ws-port") {
        match raw.parse::<u16>() {
            Ok(port) => ws.port = port,
            Err(_) => tracing::warn!(value = %raw, "ignoring unparseable ws-port"),
        }
    }
    if let Some(path) = params.get("ws-path") {
        ws.path.clone_from(path);
    }
}
